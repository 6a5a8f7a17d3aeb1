use std::sync::Arc;
use uuid::Uuid;

use crate::api::error;
use crate::modules::conversation::schema::{ConversationEntity, ParticipantSlot};
use crate::modules::message::{
    model::{DeleteScope, InsertMessage, MessageQuery, OutgoingMessage, MAX_BODY_LEN},
    repository::MessageRepository,
    schema::{MessageEntity, MessageKind, StatusRow},
    state::{Outcome, Transition},
};

/// Result of a delete request, enough to build the matching event.
#[derive(Debug, Clone, PartialEq)]
pub enum Deletion {
    Tombstoned(MessageEntity),
    Hidden(MessageEntity),
}

/// Message persistence guarded by the lifecycle state machine.
pub struct MessageStore<M>
where
    M: MessageRepository + Send + Sync,
{
    message_repo: Arc<M>,
}

impl<M> MessageStore<M>
where
    M: MessageRepository + Send + Sync,
{
    pub fn new(message_repo: Arc<M>) -> Self {
        Self { message_repo }
    }

    /// Persists a new message in `Sent` (or `Delivered` when the recipient is
    /// connected right now).
    pub async fn create(
        &self,
        conversation: &ConversationEntity,
        outgoing: OutgoingMessage,
        recipient_online: bool,
    ) -> Result<MessageEntity, error::SystemError> {
        let recipient_slot =
            admit_sender(conversation, outgoing.sender_id, outgoing.recipient_id)?;

        let OutgoingMessage { sender_id, recipient_id, body, kind, attachment, .. } = outgoing;
        let body = body.map(|b| b.trim().to_string()).filter(|b| !b.is_empty());

        if let Some(b) = &body {
            if b.chars().count() > MAX_BODY_LEN {
                return Err(error::SystemError::invalid_argument(format!(
                    "Message body exceeds {MAX_BODY_LEN} characters"
                )));
            }
        }

        let snapshot = match (kind, &body, &attachment) {
            (MessageKind::System, _, _) => {
                return Err(error::SystemError::invalid_argument(
                    "System messages cannot be sent by clients",
                ));
            }
            (MessageKind::Text, Some(b), _) => b.clone(),
            (MessageKind::Text, None, _) => {
                return Err(error::SystemError::invalid_argument("Message body is required"));
            }
            (MessageKind::Image | MessageKind::File, _, None) => {
                return Err(error::SystemError::invalid_argument(
                    "Attachment is required for this message kind",
                ));
            }
            (MessageKind::Image | MessageKind::File, Some(b), Some(_)) => b.clone(),
            (MessageKind::Image | MessageKind::File, None, Some(a)) => {
                attachment_placeholder(kind, &a.mime, &a.original_name)
            }
        };

        let insert = InsertMessage {
            id: Uuid::now_v7(),
            conversation_id: conversation.id.clone(),
            sender_id,
            recipient_id,
            recipient_slot,
            body,
            kind,
            attachment,
            snapshot,
            delivered: recipient_online,
            created_at: chrono::Utc::now(),
        };

        self.message_repo.append(&insert).await
    }

    pub async fn find(&self, message_id: &Uuid) -> Result<MessageEntity, error::SystemError> {
        self.message_repo
            .find_by_id(message_id)
            .await?
            .ok_or_else(|| error::SystemError::not_found("Message not found"))
    }

    /// Messages the viewer may see, newest first.
    pub async fn visible(&self, query: &MessageQuery) -> Result<Vec<MessageEntity>, error::SystemError> {
        self.message_repo.find_visible(query).await
    }

    /// Bulk read for `reader_id`. Returns only the messages whose flag changed.
    pub async fn mark_read(
        &self,
        conversation: &ConversationEntity,
        reader_id: i64,
    ) -> Result<Vec<StatusRow>, error::SystemError> {
        let reader_slot = conversation.slot_of(reader_id).ok_or_else(|| {
            error::SystemError::access_denied("You are not a participant of this conversation")
        })?;

        let candidates = self.message_repo.find_unread(&conversation.id, reader_id).await?;
        let ids = allowed(&candidates, Transition::Read);

        self.message_repo
            .mark_conversation_read(&conversation.id, reader_id, reader_slot, &ids, chrono::Utc::now())
            .await
    }

    pub async fn deliver_pending(
        &self,
        recipient_id: i64,
        limit: i64,
    ) -> Result<Vec<StatusRow>, error::SystemError> {
        let candidates = self.message_repo.find_undelivered(recipient_id, limit).await?;
        let ids = allowed(&candidates, Transition::Deliver);
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        self.message_repo.mark_delivered(&ids, chrono::Utc::now()).await
    }

    pub async fn edit(
        &self,
        message_id: &Uuid,
        editor_id: i64,
        body: &str,
    ) -> Result<MessageEntity, error::SystemError> {
        let body = body.trim();
        if body.is_empty() || body.chars().count() > MAX_BODY_LEN {
            return Err(error::SystemError::invalid_argument(format!(
                "Message body must be 1 to {MAX_BODY_LEN} characters"
            )));
        }

        let message = self.find(message_id).await?;
        if message.sender_id != editor_id {
            return Err(error::SystemError::access_denied("Only the sender can edit a message"));
        }
        message.state().apply(Transition::Edit)?;

        // A concurrent tombstone between the read and the write leaves no row.
        self.message_repo
            .update_body(message_id, body, chrono::Utc::now())
            .await?
            .ok_or_else(|| error::SystemError::invalid_transition("A deleted message cannot be edited"))
    }

    pub async fn delete(
        &self,
        message_id: &Uuid,
        actor_id: i64,
        scope: DeleteScope,
    ) -> Result<Deletion, error::SystemError> {
        let message = self.find(message_id).await?;

        match scope {
            DeleteScope::All => {
                if message.sender_id != actor_id {
                    return Err(error::SystemError::access_denied(
                        "Only the sender can delete a message for everyone",
                    ));
                }
                message.state().apply(Transition::DeleteForEveryone)?;

                let tombstone = self
                    .message_repo
                    .tombstone(message_id, chrono::Utc::now())
                    .await?
                    .ok_or_else(|| {
                        error::SystemError::invalid_transition(
                            "Message is already deleted for everyone",
                        )
                    })?;
                Ok(Deletion::Tombstoned(tombstone))
            }
            DeleteScope::Me => {
                if !message.involves(actor_id) {
                    return Err(error::SystemError::access_denied(
                        "You are not a participant of this conversation",
                    ));
                }

                message.state().apply(Transition::HideForViewer)?;

                let hidden = self
                    .message_repo
                    .hide_for(message_id, actor_id)
                    .await?
                    .ok_or_else(|| error::SystemError::not_found("Message not found"))?;
                Ok(Deletion::Hidden(hidden))
            }
        }
    }
}

/// Slot of the recipient when `sender_id` may write to `recipient_id` here.
pub fn admit_sender(
    conversation: &ConversationEntity,
    sender_id: i64,
    recipient_id: i64,
) -> Result<ParticipantSlot, error::SystemError> {
    let sender_slot = conversation.slot_of(sender_id).ok_or_else(|| {
        error::SystemError::access_denied("You are not a participant of this conversation")
    })?;
    let recipient_slot = sender_slot.other();

    if conversation.participant(recipient_slot) != recipient_id {
        return Err(error::SystemError::invalid_argument(
            "Recipient does not belong to this conversation",
        ));
    }

    if conversation.blocked(recipient_slot) {
        return Err(error::SystemError::blocked("The recipient has blocked you"));
    }

    Ok(recipient_slot)
}

/// Ids of the candidates the lifecycle table moves forward under `transition`.
fn allowed(candidates: &[MessageEntity], transition: Transition) -> Vec<Uuid> {
    candidates
        .iter()
        .filter(|message| match message.state().apply(transition) {
            Ok(Outcome::Applied(_)) => true,
            Ok(Outcome::Unchanged) => false,
            Err(e) => {
                tracing::debug!("Skipping message {}: {}", message.id, e);
                false
            }
        })
        .map(|message| message.id)
        .collect()
}

/// Snapshot text for media messages without a caption.
pub fn attachment_placeholder(kind: MessageKind, mime: &str, original_name: &str) -> String {
    match kind {
        MessageKind::Image => "[Image]".to_string(),
        _ if mime.starts_with("audio/") => "[Audio]".to_string(),
        _ => format!("[File] {original_name}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::conversation::{
        registry::ConversationRegistry,
        repository::ConversationRepository,
        schema::ParticipantFlag,
    };
    use crate::modules::message::schema::Attachment;
    use crate::test::memory::InMemoryRepository;

    struct Fixture {
        registry: ConversationRegistry<InMemoryRepository>,
        store: MessageStore<InMemoryRepository>,
        repo: InMemoryRepository,
    }

    fn fixture() -> Fixture {
        let repo = InMemoryRepository::default();
        Fixture {
            registry: ConversationRegistry::new(Arc::new(repo.clone())),
            store: MessageStore::new(Arc::new(repo.clone())),
            repo,
        }
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

    #[actix_web::test]
    async fn test_create_bumps_recipient_unread_and_snapshot() {
        let f = fixture();
        let conversation = f.registry.get_or_create(1, 2, None).await.unwrap();

        let message = f.store.create(&conversation, text(1, 2, "  hello "), false).await.unwrap();
        assert_eq!(message.body.as_deref(), Some("hello"));
        assert!(!message.delivered && !message.read);

        let conversation = f.repo.conversation(&conversation.id).await.unwrap();
        assert_eq!((conversation.unread_low, conversation.unread_high), (0, 1));
        assert_eq!(conversation.last_message_snapshot.as_deref(), Some("hello"));
    }

    #[actix_web::test]
    async fn test_create_rejects_outsider_and_invalid_kinds() {
        let f = fixture();
        let conversation = f.registry.get_or_create(1, 2, None).await.unwrap();

        let err = f.store.create(&conversation, text(3, 2, "hi"), false).await.unwrap_err();
        assert!(matches!(err, error::SystemError::AccessDenied(_)));

        let err = f.store.create(&conversation, text(1, 2, "   "), false).await.unwrap_err();
        assert!(matches!(err, error::SystemError::InvalidArgument(_)));

        let mut system = text(1, 2, "x");
        system.kind = MessageKind::System;
        let err = f.store.create(&conversation, system, false).await.unwrap_err();
        assert!(matches!(err, error::SystemError::InvalidArgument(_)));

        let mut image = text(1, 2, "");
        image.kind = MessageKind::Image;
        let err = f.store.create(&conversation, image, false).await.unwrap_err();
        assert!(matches!(err, error::SystemError::InvalidArgument(_)));
    }

    #[actix_web::test]
    async fn test_attachment_without_caption_uses_placeholder_snapshot() {
        let f = fixture();
        let conversation = f.registry.get_or_create(1, 2, None).await.unwrap();

        let outgoing = OutgoingMessage {
            body: None,
            kind: MessageKind::File,
            attachment: Some(Attachment {
                url: "http://files/report.pdf".into(),
                mime: "application/pdf".into(),
                size: 1024,
                original_name: "report.pdf".into(),
            }),
            ..text(1, 2, "")
        };
        let message = f.store.create(&conversation, outgoing, false).await.unwrap();
        assert!(message.body.is_none());

        let conversation = f.repo.conversation(&conversation.id).await.unwrap();
        assert_eq!(conversation.last_message_snapshot.as_deref(), Some("[File] report.pdf"));
    }

    #[actix_web::test]
    async fn test_edit_only_by_sender() {
        let f = fixture();
        let conversation = f.registry.get_or_create(1, 2, None).await.unwrap();
        let message = f.store.create(&conversation, text(1, 2, "helo"), false).await.unwrap();

        let err = f.store.edit(&message.id, 2, "hacked").await.unwrap_err();
        assert!(matches!(err, error::SystemError::AccessDenied(_)));

        let edited = f.store.edit(&message.id, 1, "hello").await.unwrap();
        assert!(edited.edited);
        assert!(edited.edited_at.is_some());
        assert_eq!(edited.body.as_deref(), Some("hello"));
    }

    #[actix_web::test]
    async fn test_delete_for_everyone_is_sender_only_and_terminal() {
        let f = fixture();
        let conversation = f.registry.get_or_create(1, 2, None).await.unwrap();
        let message = f.store.create(&conversation, text(1, 2, "oops"), false).await.unwrap();

        let err = f.store.delete(&message.id, 2, DeleteScope::All).await.unwrap_err();
        assert!(matches!(err, error::SystemError::AccessDenied(_)));

        let Deletion::Tombstoned(tombstone) =
            f.store.delete(&message.id, 1, DeleteScope::All).await.unwrap()
        else {
            panic!("expected a tombstone");
        };
        assert!(tombstone.deleted_for_everyone);
        assert!(tombstone.body.is_none() && tombstone.attachment.is_none());
        assert_eq!(tombstone.kind, MessageKind::System);

        let err = f.store.delete(&message.id, 1, DeleteScope::All).await.unwrap_err();
        assert!(matches!(err, error::SystemError::InvalidTransition(_)));
        let err = f.store.edit(&message.id, 1, "again").await.unwrap_err();
        assert!(matches!(err, error::SystemError::InvalidTransition(_)));
    }

    #[actix_web::test]
    async fn test_hide_is_idempotent_and_leaves_flags_alone() {
        let f = fixture();
        let conversation = f.registry.get_or_create(1, 2, None).await.unwrap();
        let message = f.store.create(&conversation, text(1, 2, "secret"), false).await.unwrap();

        let err = f.store.delete(&message.id, 9, DeleteScope::Me).await.unwrap_err();
        assert!(matches!(err, error::SystemError::AccessDenied(_)));

        f.store.delete(&message.id, 2, DeleteScope::Me).await.unwrap();
        let Deletion::Hidden(hidden) =
            f.store.delete(&message.id, 2, DeleteScope::Me).await.unwrap()
        else {
            panic!("expected hidden");
        };
        assert_eq!(hidden.hidden_for, vec![2]);
        assert!(!hidden.read && !hidden.delivered);

        let conversation = f.repo.conversation(&conversation.id).await.unwrap();
        assert_eq!(conversation.unread_high, 1);
    }

    #[actix_web::test]
    async fn test_deliver_pending_respects_cap_and_is_monotonic() {
        let f = fixture();
        let conversation = f.registry.get_or_create(1, 2, None).await.unwrap();
        for i in 0..5 {
            f.store.create(&conversation, text(1, 2, &format!("m{i}")), false).await.unwrap();
        }

        assert_eq!(f.store.deliver_pending(2, 3).await.unwrap().len(), 3);
        assert_eq!(f.store.deliver_pending(2, 3).await.unwrap().len(), 2);
        assert!(f.store.deliver_pending(2, 3).await.unwrap().is_empty());
    }

    #[actix_web::test]
    async fn test_mark_read_flags_only_unread_rows_including_tombstones() {
        let f = fixture();
        let conversation = f.registry.get_or_create(1, 2, None).await.unwrap();
        let first = f.store.create(&conversation, text(1, 2, "one"), true).await.unwrap();
        let second = f.store.create(&conversation, text(1, 2, "two"), false).await.unwrap();
        f.store.create(&conversation, text(2, 1, "reply"), false).await.unwrap();
        f.store.delete(&second.id, 1, DeleteScope::All).await.unwrap();

        let rows = f.store.mark_read(&conversation, 2).await.unwrap();
        let ids: Vec<Uuid> = rows.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![first.id, second.id]);

        let read = f.repo.message(&first.id).await.unwrap();
        assert!(read.read && read.delivered);
        assert!(read.delivered_at.unwrap() <= read.read_at.unwrap());

        assert!(f.store.mark_read(&conversation, 2).await.unwrap().is_empty());
        let conversation = f.repo.conversation(&conversation.id).await.unwrap();
        assert_eq!((conversation.unread_low, conversation.unread_high), (1, 0));
    }

    #[actix_web::test]
    async fn test_unread_counter_keeps_messages_appended_after_the_read_snapshot() {
        let f = fixture();
        let conversation = f.registry.get_or_create(1, 2, None).await.unwrap();
        f.store.create(&conversation, text(1, 2, "early"), false).await.unwrap();

        let candidates = f.repo.find_unread(&conversation.id, 2).await.unwrap();
        let late = f.store.create(&conversation, text(1, 2, "late"), false).await.unwrap();
        let ids: Vec<Uuid> = candidates.iter().map(|m| m.id).collect();
        f.repo
            .mark_conversation_read(&conversation.id, 2, ParticipantSlot::High, &ids, chrono::Utc::now())
            .await
            .unwrap();

        assert!(!f.repo.message(&late.id).await.unwrap().read);
        let conversation = f.repo.conversation(&conversation.id).await.unwrap();
        assert_eq!(conversation.unread_high, 1);
    }

    #[actix_web::test]
    async fn test_deliver_pending_skips_rows_already_read() {
        let f = fixture();
        let conversation = f.registry.get_or_create(1, 2, None).await.unwrap();
        f.store.create(&conversation, text(1, 2, "seen"), false).await.unwrap();
        f.store.mark_read(&conversation, 2).await.unwrap();
        let fresh = f.store.create(&conversation, text(1, 2, "fresh"), false).await.unwrap();

        let rows = f.store.deliver_pending(2, 10).await.unwrap();
        assert_eq!(rows.iter().map(|r| r.id).collect::<Vec<_>>(), vec![fresh.id]);
    }

    #[actix_web::test]
    async fn test_block_set_after_lookup_still_rejects_the_append() {
        let f = fixture();
        let stale = f.registry.get_or_create(1, 2, None).await.unwrap();
        f.repo.toggle_flag(&stale.id, ParticipantFlag::Blocked, ParticipantSlot::High).await.unwrap();

        let err = f.store.create(&stale, text(1, 2, "still there?"), false).await.unwrap_err();
        assert!(matches!(err, error::SystemError::Blocked(_)));

        let conversation = f.repo.conversation(&stale.id).await.unwrap();
        assert_eq!(conversation.unread_high, 0);
        assert!(conversation.last_message_snapshot.is_none());
        assert!(f.repo.find_unread(&stale.id, 2).await.unwrap().is_empty());
    }

    #[test]
    fn test_attachment_placeholders() {
        assert_eq!(attachment_placeholder(MessageKind::Image, "image/png", "a.png"), "[Image]");
        assert_eq!(attachment_placeholder(MessageKind::File, "audio/ogg", "v.ogg"), "[Audio]");
        assert_eq!(attachment_placeholder(MessageKind::File, "text/plain", "n.txt"), "[File] n.txt");
    }
}
