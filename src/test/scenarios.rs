use std::sync::Arc;
use uuid::Uuid;

use super::{memory::InMemoryRepository, RecordingLastSeen, RecordingPublisher, RecordingPush};
use crate::{
    api::error,
    modules::{
        attachment::{LocalAttachmentStorage, UploadConfig, UploadedFile},
        conversation::{
            schema::ParticipantSlot,
            service::{ConversationService, ServiceLimits},
        },
        message::{
            model::{
                DeleteScope, MessagePageQuery, OutgoingMessage, MAX_BODY_LEN, TOMBSTONE_PLACEHOLDER,
            },
            repository::MessageRepository,
            schema::{Attachment, MessageKind},
        },
        websocket::{
            message::ServerEvent,
            presence::{PresenceService, PresenceTracker},
        },
    },
};

type Service = ConversationService<InMemoryRepository, InMemoryRepository>;

struct Harness {
    service: Service,
    repo: InMemoryRepository,
    presence: Arc<PresenceService>,
    publisher: Arc<RecordingPublisher>,
    push: Arc<RecordingPush>,
    last_seen: Arc<RecordingLastSeen>,
}

fn harness() -> Harness {
    let repo = InMemoryRepository::default();
    let publisher = Arc::new(RecordingPublisher::default());
    let push = Arc::new(RecordingPush::default());
    let last_seen = Arc::new(RecordingLastSeen::default());
    let presence = Arc::new(PresenceService::new(
        Arc::new(PresenceTracker::new()),
        last_seen.clone(),
        publisher.clone(),
    ));

    let service = ConversationService::with_dependencies(
        Arc::new(repo.clone()),
        Arc::new(repo.clone()),
        presence.clone(),
        publisher.clone(),
        push.clone(),
        ServiceLimits { pending_batch: 200, page_size: 50 },
    );

    Harness { service, repo, presence, publisher, push, last_seen }
}

fn text(sender_id: i64, recipient_id: i64, body: &str) -> OutgoingMessage {
    OutgoingMessage {
        sender_id,
        recipient_id,
        context_id: None,
        body: Some(body.to_string()),
        kind: MessageKind::Text,
        attachment: None,
    }
}

fn first_page() -> MessagePageQuery {
    MessagePageQuery { before: None, limit: None }
}

fn status_events(events: &[ServerEvent]) -> Vec<&ServerEvent> {
    events.iter().filter(|e| matches!(e, ServerEvent::MessageStatus { .. })).collect()
}

#[actix_web::test]
async fn test_offline_message_is_delivered_on_reconnect_then_read_on_open() {
    let h = harness();

    let message = h.service.send(text(1, 2, "hi")).await.unwrap();
    assert!(!message.delivered);
    assert_eq!(message.conversation_id, "1_2");

    let new_for_recipient = h.publisher.user_events(2);
    assert!(matches!(&new_for_recipient[..], [ServerEvent::MessageNew { .. }]));
    assert!(status_events(&h.publisher.user_events(1)).is_empty());

    let notices = h.push.notices();
    assert_eq!(notices.len(), 1);
    assert_eq!(notices[0].user_id, 2);
    assert_eq!(notices[0].payload.preview, "hi");

    // recipient reconnects
    h.presence.connect(2, Uuid::now_v7());
    h.publisher.clear();
    assert_eq!(h.service.deliver_pending(2).await.unwrap(), 1);

    let sender_events = h.publisher.user_events(1);
    let [ServerEvent::MessageStatus { conversation_id, message_ids, delivered, read, .. }] =
        &sender_events[..]
    else {
        panic!("expected one status event, got {sender_events:?}");
    };
    assert_eq!(conversation_id, "1_2");
    assert_eq!(message_ids, &vec![message.id]);
    assert_eq!(*delivered, Some(true));
    assert_eq!(*read, None);

    // already delivered messages are not re-announced
    assert_eq!(h.service.deliver_pending(2).await.unwrap(), 0);

    h.publisher.clear();
    let page = h.service.open_conversation("1_2", 2, first_page()).await.unwrap();
    assert_eq!(page.messages.len(), 1);
    assert!(page.messages[0].flags.read);
    assert!(page.messages[0].flags.delivered);
    assert_eq!(page.cursor, None);

    let conversation = h.repo.conversation("1_2").await.unwrap();
    assert_eq!(conversation.unread(ParticipantSlot::High), 0);
    assert!(matches!(
        &h.publisher.user_events(1)[..],
        [ServerEvent::MessageStatus { read: Some(true), delivered: Some(true), .. }]
    ));
}

#[actix_web::test]
async fn test_online_recipient_gets_immediate_delivery_and_no_push() {
    let h = harness();
    h.presence.connect(2, Uuid::now_v7());
    h.publisher.clear();

    let message = h.service.send(text(1, 2, "hello")).await.unwrap();
    assert!(message.delivered);
    assert!(h.push.notices().is_empty());

    let sender_events = h.publisher.user_events(1);
    assert!(matches!(sender_events[0], ServerEvent::MessageNew { .. }));
    assert!(matches!(
        sender_events[1],
        ServerEvent::MessageStatus { delivered: Some(true), read: None, .. }
    ));
}

#[actix_web::test]
async fn test_unread_counter_tracks_recipient_slot_only() {
    let h = harness();

    h.service.send(text(2, 1, "one")).await.unwrap();
    h.service.send(text(2, 1, "two")).await.unwrap();
    h.service.send(text(1, 2, "back")).await.unwrap();

    let conversation = h.repo.conversation("1_2").await.unwrap();
    assert_eq!(conversation.unread(ParticipantSlot::Low), 2);
    assert_eq!(conversation.unread(ParticipantSlot::High), 1);
    assert_eq!(conversation.last_message_snapshot.as_deref(), Some("back"));

    assert_eq!(h.service.mark_read("1_2", 1).await.unwrap(), 2);
    let conversation = h.repo.conversation("1_2").await.unwrap();
    assert_eq!(conversation.unread(ParticipantSlot::Low), 0);
    assert_eq!(conversation.unread(ParticipantSlot::High), 1);
}

#[actix_web::test]
async fn test_muted_recipient_gets_no_push() {
    let h = harness();
    h.service.start_conversation(1, 2, None).await.unwrap();

    assert!(h.service.toggle_mute("1_2", 2).await.unwrap());
    h.service.send(text(1, 2, "quiet")).await.unwrap();
    assert!(h.push.notices().is_empty());

    assert!(!h.service.toggle_mute("1_2", 2).await.unwrap());
    h.service.send(text(1, 2, "loud")).await.unwrap();
    assert_eq!(h.push.notices().len(), 1);
}

#[actix_web::test]
async fn test_push_failure_does_not_fail_send() {
    let h = harness();
    h.push.fail();

    let message = h.service.send(text(1, 2, "still stored")).await.unwrap();
    assert!(h.repo.message(&message.id).await.is_some());
}

#[actix_web::test]
async fn test_block_only_stops_the_blocked_direction() {
    let h = harness();
    h.service.start_conversation(1, 2, None).await.unwrap();

    assert!(h.service.toggle_block("1_2", 2).await.unwrap());

    let err = h.service.send(text(1, 2, "let me in")).await.unwrap_err();
    assert!(matches!(err, error::SystemError::Blocked(_)));
    assert!(h.service.send(text(2, 1, "i can still talk")).await.is_ok());

    let conversation = h.repo.conversation("1_2").await.unwrap();
    assert_eq!(conversation.unread(ParticipantSlot::High), 0);

    assert!(!h.service.toggle_block("1_2", 2).await.unwrap());
    assert!(h.service.send(text(1, 2, "thanks")).await.is_ok());
}

#[actix_web::test]
async fn test_delete_for_everyone_leaves_tombstone_and_freezes_message() {
    let h = harness();
    let message = h.service.send(text(1, 2, "oops")).await.unwrap();
    h.publisher.clear();

    let deleted = h.service.delete(&message.id, 1, DeleteScope::All).await.unwrap();
    assert_eq!(deleted.scope, DeleteScope::All);

    for user in [1, 2] {
        let events = h.publisher.user_events(user);
        assert!(matches!(events[0], ServerEvent::MessageUpdate { .. }));
        assert!(matches!(
            events[1],
            ServerEvent::MessageDelete { scope: DeleteScope::All, .. }
        ));
    }

    let page = h.service.open_conversation("1_2", 2, first_page()).await.unwrap();
    let tombstone = &page.messages[0];
    assert_eq!(tombstone.body, None);
    assert_eq!(tombstone.kind, MessageKind::System);
    assert_eq!(tombstone.placeholder, Some(TOMBSTONE_PLACEHOLDER));

    let edit = h.service.edit(&message.id, 1, "fixed").await.unwrap_err();
    assert!(matches!(edit, error::SystemError::InvalidTransition(_)));
    let again = h.service.delete(&message.id, 1, DeleteScope::All).await.unwrap_err();
    assert!(matches!(again, error::SystemError::InvalidTransition(_)));
}

#[actix_web::test]
async fn test_only_sender_can_edit_or_delete_for_everyone() {
    let h = harness();
    let message = h.service.send(text(1, 2, "mine")).await.unwrap();

    assert!(matches!(
        h.service.edit(&message.id, 2, "yours").await,
        Err(error::SystemError::AccessDenied(_))
    ));
    assert!(matches!(
        h.service.delete(&message.id, 2, DeleteScope::All).await,
        Err(error::SystemError::AccessDenied(_))
    ));
    assert!(matches!(
        h.service.delete(&message.id, 3, DeleteScope::Me).await,
        Err(error::SystemError::AccessDenied(_))
    ));

    h.publisher.clear();
    let edited = h.service.edit(&message.id, 1, " still mine ").await.unwrap();
    assert!(edited.edited);
    assert_eq!(edited.body.as_deref(), Some("still mine"));
    assert!(matches!(&h.publisher.user_events(2)[..], [ServerEvent::MessageUpdate { .. }]));
}

#[actix_web::test]
async fn test_delete_for_me_hides_only_for_actor() {
    let h = harness();
    let message = h.service.send(text(1, 2, "private")).await.unwrap();
    h.publisher.clear();

    h.service.delete(&message.id, 2, DeleteScope::Me).await.unwrap();
    assert!(h.publisher.user_events(1).is_empty());
    assert!(h.publisher.user_events(2).is_empty());

    let hidden = h.service.open_conversation("1_2", 2, first_page()).await.unwrap();
    assert!(hidden.messages.is_empty());

    let visible = h.service.open_conversation("1_2", 1, first_page()).await.unwrap();
    assert_eq!(visible.messages.len(), 1);
    assert_eq!(visible.messages[0].body.as_deref(), Some("private"));
}

#[actix_web::test]
async fn test_pages_walk_backwards_with_cursor() {
    let h = harness();
    for body in ["first", "second", "third"] {
        h.service.send(text(1, 2, body)).await.unwrap();
        actix_web::rt::time::sleep(std::time::Duration::from_millis(2)).await;
    }

    let latest = h
        .service
        .open_conversation("1_2", 1, MessagePageQuery { before: None, limit: Some(2) })
        .await
        .unwrap();
    let bodies: Vec<_> = latest.messages.iter().map(|m| m.body.clone().unwrap()).collect();
    assert_eq!(bodies, vec!["second", "third"]);
    let cursor = latest.cursor.expect("full page yields a cursor");

    let older = h
        .service
        .open_conversation("1_2", 1, MessagePageQuery { before: Some(cursor), limit: Some(2) })
        .await
        .unwrap();
    assert_eq!(older.messages.len(), 1);
    assert_eq!(older.messages[0].body.as_deref(), Some("first"));
    assert_eq!(older.cursor, None);

    let bad = h
        .service
        .open_conversation(
            "1_2",
            1,
            MessagePageQuery { before: Some("yesterday".into()), limit: None },
        )
        .await;
    assert!(matches!(bad, Err(error::SystemError::InvalidArgument(_))));
}

#[actix_web::test]
async fn test_outsider_cannot_open_or_toggle() {
    let h = harness();
    h.service.send(text(1, 2, "just us")).await.unwrap();

    assert!(matches!(
        h.service.open_conversation("1_2", 3, first_page()).await,
        Err(error::SystemError::AccessDenied(_))
    ));
    assert!(matches!(
        h.service.toggle_block("1_2", 3).await,
        Err(error::SystemError::AccessDenied(_))
    ));
    assert!(matches!(
        h.service.open_conversation("1_3", 1, first_page()).await,
        Err(error::SystemError::NotFound(_))
    ));
}

#[actix_web::test]
async fn test_attachment_without_body_uses_placeholder_snapshot() {
    let h = harness();
    let outgoing = OutgoingMessage {
        sender_id: 4,
        recipient_id: 3,
        context_id: Some(9),
        body: None,
        kind: MessageKind::File,
        attachment: Some(Attachment {
            url: "http://files.local/uploads/a.pdf".into(),
            mime: "application/pdf".into(),
            size: 10,
            original_name: "report.pdf".into(),
        }),
    };

    let message = h.service.send(outgoing).await.unwrap();
    assert_eq!(message.conversation_id, "3_4_9");

    let conversation = h.repo.conversation("3_4_9").await.unwrap();
    assert_eq!(conversation.last_message_snapshot.as_deref(), Some("[File] report.pdf"));
    assert_eq!(h.push.notices()[0].payload.preview, "[File] report.pdf");
}

#[actix_web::test]
async fn test_typing_is_forwarded_only_between_participants() {
    let h = harness();
    h.service.typing(1, 2, "1_2", true).unwrap();
    assert!(matches!(
        &h.publisher.user_events(2)[..],
        [ServerEvent::Typing { from_user_id: 1, typing: true, .. }]
    ));

    assert!(matches!(
        h.service.typing(3, 2, "1_2", true),
        Err(error::SystemError::AccessDenied(_))
    ));
    assert!(matches!(
        h.service.typing(1, 3, "1_2", true),
        Err(error::SystemError::InvalidArgument(_))
    ));
    assert!(matches!(
        h.service.typing(1, 2, "not-a-conversation", false),
        Err(error::SystemError::InvalidArgument(_))
    ));
}

#[actix_web::test]
async fn test_list_projects_caller_view_and_hides_archived() {
    let h = harness();
    h.service.send(text(1, 2, "to two")).await.unwrap();
    actix_web::rt::time::sleep(std::time::Duration::from_millis(2)).await;
    h.service.send(text(3, 2, "to two from three")).await.unwrap();

    h.presence.connect(3, Uuid::now_v7());
    let seen = chrono::Utc::now();
    h.last_seen.seed(1, seen);

    let list = h.service.list_conversations(2).await.unwrap();
    assert_eq!(list.len(), 2);
    assert_eq!(list[0].id, "2_3");
    assert_eq!(list[0].other_participant_id, 3);
    assert_eq!(list[0].unread_count, 1);
    assert!(list[0].online);
    assert_eq!(list[1].other_participant_id, 1);
    assert!(!list[1].online);
    assert_eq!(list[1].last_seen_at, Some(seen));

    h.service.archive("1_2", 2).await.unwrap();
    let list = h.service.list_conversations(2).await.unwrap();
    assert_eq!(list.len(), 1);

    // a new message brings it back
    h.service.send(text(1, 2, "ping")).await.unwrap();
    assert_eq!(h.service.list_conversations(2).await.unwrap().len(), 2);
}

#[actix_web::test]
async fn test_start_conversation_is_idempotent_and_rejects_self() {
    let h = harness();
    let a = h.service.start_conversation(5, 2, None).await.unwrap();
    let b = h.service.start_conversation(2, 5, None).await.unwrap();
    assert_eq!(a.id, b.id);
    assert_eq!(h.repo.conversation_count().await, 1);

    assert!(matches!(
        h.service.start_conversation(5, 5, None).await,
        Err(error::SystemError::InvalidArgument(_))
    ));
}

fn upload_storage() -> LocalAttachmentStorage {
    let dir = std::env::temp_dir().join(format!("uploads-{}", Uuid::now_v7()));
    LocalAttachmentStorage::new(UploadConfig {
        max_file_size: 1024,
        upload_dir: dir.to_string_lossy().into_owned(),
        base_url: "http://files.local/uploads".to_string(),
    })
}

fn png() -> UploadedFile {
    UploadedFile {
        original_name: "cat.png".to_string(),
        declared_mime: Some("image/png".to_string()),
        bytes: vec![0x89, b'P', b'N', b'G'],
    }
}

fn files_in(storage: &LocalAttachmentStorage) -> usize {
    std::fs::read_dir(storage.upload_dir()).map(|dir| dir.count()).unwrap_or(0)
}

#[actix_web::test]
async fn test_upload_is_sent_as_image_message() {
    let h = harness();
    let storage = upload_storage();

    let message = h.service.send_upload(&storage, text(1, 2, ""), png()).await.unwrap();
    assert_eq!(message.kind, MessageKind::Image);
    let attachment = message.attachment.unwrap();
    assert_eq!(attachment.original_name, "cat.png");
    assert!(attachment.url.starts_with("http://files.local/uploads/"));
    assert_eq!(files_in(&storage), 1);

    let conversation = h.repo.conversation("1_2").await.unwrap();
    assert_eq!(conversation.last_message_snapshot.as_deref(), Some("[Image]"));

    std::fs::remove_dir_all(storage.upload_dir()).ok();
}

#[actix_web::test]
async fn test_refused_upload_writes_nothing() {
    let h = harness();
    let storage = upload_storage();
    h.service.start_conversation(1, 2, None).await.unwrap();
    h.service.toggle_block("1_2", 2).await.unwrap();

    let err = h.service.send_upload(&storage, text(1, 2, ""), png()).await.unwrap_err();
    assert!(matches!(err, error::SystemError::Blocked(_)));
    assert_eq!(files_in(&storage), 0);
}

#[actix_web::test]
async fn test_failed_send_removes_the_stored_upload() {
    let h = harness();
    let storage = upload_storage();

    let caption = "x".repeat(MAX_BODY_LEN + 1);
    let err = h.service.send_upload(&storage, text(1, 2, &caption), png()).await.unwrap_err();
    assert!(matches!(err, error::SystemError::InvalidArgument(_)));
    assert_eq!(files_in(&storage), 0);
    assert!(h.repo.find_unread("1_2", 2).await.unwrap().is_empty());

    std::fs::remove_dir_all(storage.upload_dir()).ok();
}
