use std::{collections::BTreeMap, sync::Arc};
use uuid::Uuid;

use crate::{
    api::error,
    modules::{
        attachment::{AttachmentStorage, UploadedFile},
        conversation::{
            model::{ConversationKey, ConversationView},
            registry::ConversationRegistry,
            repository::ConversationRepository,
            schema::{ConversationEntity, ParticipantFlag},
        },
        message::{
            model::{
                DeleteMessageResponse, DeleteScope, MessagePage, MessagePageQuery, MessageQuery,
                MessageView, OutgoingMessage,
            },
            repository::MessageRepository,
            schema::{Attachment, MessageEntity, MessageKind, StatusRow},
            store::{admit_sender, attachment_placeholder, Deletion, MessageStore},
        },
        push::{PushDelivery, PushNotice, PushPayload},
        websocket::{
            events::EventPublisher,
            message::{MessageUpdateView, ServerEvent},
            presence::PresenceService,
        },
    },
};

const PUSH_PREVIEW_LEN: usize = 120;

#[derive(Debug, Clone, Copy)]
pub struct ServiceLimits {
    /// Max messages marked delivered per reconnect
    pub pending_batch: i64,
    pub page_size: i64,
}

/// Orchestrates a send or status change: persist first, then fan out.
/// Fan-out and push never undo a committed write.
pub struct ConversationService<C, M>
where
    C: ConversationRepository + Send + Sync + 'static,
    M: MessageRepository + Send + Sync + 'static,
{
    registry: ConversationRegistry<C>,
    conversation_repo: Arc<C>,
    store: MessageStore<M>,
    presence: Arc<PresenceService>,
    publisher: Arc<dyn EventPublisher>,
    push: Arc<dyn PushDelivery>,
    limits: ServiceLimits,
}

impl<C, M> ConversationService<C, M>
where
    C: ConversationRepository + Send + Sync + 'static,
    M: MessageRepository + Send + Sync + 'static,
{
    pub fn with_dependencies(
        conversation_repo: Arc<C>,
        message_repo: Arc<M>,
        presence: Arc<PresenceService>,
        publisher: Arc<dyn EventPublisher>,
        push: Arc<dyn PushDelivery>,
        limits: ServiceLimits,
    ) -> Self {
        ConversationService {
            registry: ConversationRegistry::new(conversation_repo.clone()),
            conversation_repo,
            store: MessageStore::new(message_repo),
            presence,
            publisher,
            push,
            limits,
        }
    }

    pub async fn start_conversation(
        &self,
        user_id: i64,
        recipient_id: i64,
        context_id: Option<i64>,
    ) -> Result<ConversationEntity, error::SystemError> {
        let conversation = self.registry.get_or_create(user_id, recipient_id, context_id).await?;

        if !conversation.active {
            self.conversation_repo.set_active(&conversation.id, true).await?;
        }

        Ok(conversation)
    }

    pub async fn send(&self, outgoing: OutgoingMessage) -> Result<MessageEntity, error::SystemError> {
        let conversation = self
            .registry
            .get_or_create(outgoing.sender_id, outgoing.recipient_id, outgoing.context_id)
            .await?;

        let recipient_online = self.presence.is_online(outgoing.recipient_id);
        let message = self.store.create(&conversation, outgoing, recipient_online).await?;

        tracing::debug!(
            "Message {} persisted in {} (delivered: {})",
            message.id,
            conversation.id,
            message.delivered
        );

        self.publisher.to_users(
            &[message.sender_id, message.recipient_id],
            ServerEvent::MessageNew {
                conversation_id: conversation.id.clone(),
                message: MessageView::from(&message),
            },
        );

        if message.delivered {
            self.publisher.to_user(
                message.sender_id,
                ServerEvent::MessageStatus {
                    conversation_id: conversation.id.clone(),
                    message_ids: vec![message.id],
                    delivered: Some(true),
                    read: None,
                    at: message.delivered_at.unwrap_or(message.created_at),
                },
            );
        } else if !recipient_muted(&conversation, message.recipient_id) {
            self.notify_offline(&conversation, &message).await;
        }

        Ok(message)
    }

    /// Stores `file` and sends it as the attachment of `outgoing`. Nothing is
    /// written when the sender is refused, and the file is removed again when
    /// the send itself fails.
    pub async fn send_upload(
        &self,
        storage: &dyn AttachmentStorage,
        mut outgoing: OutgoingMessage,
        file: UploadedFile,
    ) -> Result<MessageEntity, error::SystemError> {
        let conversation = self
            .registry
            .get_or_create(outgoing.sender_id, outgoing.recipient_id, outgoing.context_id)
            .await?;
        admit_sender(&conversation, outgoing.sender_id, outgoing.recipient_id)?;

        let UploadedFile { original_name, declared_mime, bytes } = file;
        let stored = storage.store(&original_name, bytes, declared_mime.as_deref()).await?;

        outgoing.kind =
            if stored.mime.starts_with("image/") { MessageKind::Image } else { MessageKind::File };
        outgoing.attachment = Some(Attachment {
            url: stored.url.clone(),
            mime: stored.mime.clone(),
            size: stored.size,
            original_name,
        });

        match self.send(outgoing).await {
            Ok(message) => Ok(message),
            Err(e) => {
                if let Err(cleanup) = storage.remove(&stored).await {
                    tracing::warn!("Could not remove orphaned upload {}: {}", stored.name, cleanup);
                }
                Err(e)
            }
        }
    }

    async fn notify_offline(&self, conversation: &ConversationEntity, message: &MessageEntity) {
        let preview: String = match (&message.body, &message.attachment) {
            (Some(body), _) => body.clone(),
            (None, Some(a)) => attachment_placeholder(message.kind, &a.mime, &a.original_name),
            (None, None) => String::new(),
        }
        .chars()
        .take(PUSH_PREVIEW_LEN)
        .collect();

        let notice = PushNotice {
            user_id: message.recipient_id,
            payload: PushPayload {
                conversation_id: conversation.id.clone(),
                message_id: message.id,
                sender_id: message.sender_id,
                preview,
            },
        };

        if let Err(e) = self.push.enqueue(&notice).await {
            tracing::warn!("Push enqueue failed for user {}: {}", message.recipient_id, e);
        }
    }

    /// Opening a conversation marks it read for the viewer, then returns one
    /// page of visible messages, oldest to newest.
    pub async fn open_conversation(
        &self,
        conversation_id: &str,
        viewer_id: i64,
        page: MessagePageQuery,
    ) -> Result<MessagePage, error::SystemError> {
        let conversation = self.registry.find_for_participant(conversation_id, viewer_id).await?;

        let before = page
            .before
            .as_deref()
            .map(|raw| {
                chrono::DateTime::parse_from_rfc3339(raw)
                    .map(|at| at.with_timezone(&chrono::Utc))
                    .map_err(|_| error::SystemError::invalid_argument("Invalid cursor"))
            })
            .transpose()?;
        let limit = page.limit.unwrap_or(self.limits.page_size).clamp(1, 100);

        self.mark_conversation_read(&conversation, viewer_id).await?;

        let mut messages = self
            .store
            .visible(&MessageQuery {
                conversation_id: conversation.id.clone(),
                viewer_id,
                before,
                limit,
            })
            .await?;

        let cursor = if messages.len() as i64 == limit {
            messages
                .last()
                .map(|oldest| oldest.created_at.to_rfc3339_opts(chrono::SecondsFormat::Micros, true))
        } else {
            None
        };
        messages.reverse();

        Ok(MessagePage { messages: messages.iter().map(MessageView::from).collect(), cursor })
    }

    pub async fn mark_read(
        &self,
        conversation_id: &str,
        reader_id: i64,
    ) -> Result<usize, error::SystemError> {
        let conversation = self.registry.find_for_participant(conversation_id, reader_id).await?;
        self.mark_conversation_read(&conversation, reader_id).await
    }

    async fn mark_conversation_read(
        &self,
        conversation: &ConversationEntity,
        reader_id: i64,
    ) -> Result<usize, error::SystemError> {
        let changed = self.store.mark_read(conversation, reader_id).await?;
        let count = changed.len();

        for ((conversation_id, sender_id), message_ids) in group_by_sender(changed) {
            self.publisher.to_user(
                sender_id,
                ServerEvent::MessageStatus {
                    conversation_id,
                    message_ids,
                    delivered: Some(true),
                    read: Some(true),
                    at: chrono::Utc::now(),
                },
            );
        }

        Ok(count)
    }

    /// Marks messages that arrived while `user_id` was offline as delivered
    /// and tells each sender, one event per conversation.
    pub async fn deliver_pending(&self, user_id: i64) -> Result<usize, error::SystemError> {
        let changed = self.store.deliver_pending(user_id, self.limits.pending_batch).await?;
        let count = changed.len();

        for ((conversation_id, sender_id), message_ids) in group_by_sender(changed) {
            self.publisher.to_user(
                sender_id,
                ServerEvent::MessageStatus {
                    conversation_id,
                    message_ids,
                    delivered: Some(true),
                    read: None,
                    at: chrono::Utc::now(),
                },
            );
        }

        if count > 0 {
            tracing::info!("Delivered {} pending message(s) to user {}", count, user_id);
        }

        Ok(count)
    }

    pub async fn edit(
        &self,
        message_id: &Uuid,
        editor_id: i64,
        body: &str,
    ) -> Result<MessageEntity, error::SystemError> {
        let message = self.store.edit(message_id, editor_id, body).await?;
        self.publish_update(&message);
        Ok(message)
    }

    pub async fn delete(
        &self,
        message_id: &Uuid,
        actor_id: i64,
        scope: DeleteScope,
    ) -> Result<DeleteMessageResponse, error::SystemError> {
        match self.store.delete(message_id, actor_id, scope).await? {
            Deletion::Tombstoned(message) => {
                self.publish_update(&message);
                self.publisher.to_users(
                    &[message.sender_id, message.recipient_id],
                    ServerEvent::MessageDelete {
                        conversation_id: message.conversation_id.clone(),
                        message_id: message.id,
                        scope,
                    },
                );
            }
            // Only the actor's own view changes.
            Deletion::Hidden(_) => {}
        }

        Ok(DeleteMessageResponse { message_id: *message_id, scope })
    }

    fn publish_update(&self, message: &MessageEntity) {
        self.publisher.to_users(
            &[message.sender_id, message.recipient_id],
            ServerEvent::MessageUpdate {
                conversation_id: message.conversation_id.clone(),
                message: MessageUpdateView::from(message),
            },
        );
    }

    /// Returns the caller's new muted flag.
    pub async fn toggle_mute(
        &self,
        conversation_id: &str,
        user_id: i64,
    ) -> Result<bool, error::SystemError> {
        self.toggle(conversation_id, user_id, ParticipantFlag::Muted).await
    }

    /// Returns the caller's new blocked flag. While set, the other participant
    /// cannot send to the caller.
    pub async fn toggle_block(
        &self,
        conversation_id: &str,
        user_id: i64,
    ) -> Result<bool, error::SystemError> {
        self.toggle(conversation_id, user_id, ParticipantFlag::Blocked).await
    }

    async fn toggle(
        &self,
        conversation_id: &str,
        user_id: i64,
        flag: ParticipantFlag,
    ) -> Result<bool, error::SystemError> {
        let conversation = self.registry.find_for_participant(conversation_id, user_id).await?;
        let slot = conversation
            .slot_of(user_id)
            .ok_or_else(|| error::SystemError::access_denied("Not a participant"))?;

        let updated = self
            .conversation_repo
            .toggle_flag(&conversation.id, flag, slot)
            .await?
            .ok_or_else(|| error::SystemError::not_found("Conversation not found"))?;

        Ok(updated.flag(flag, slot))
    }

    /// Soft delete; the next message reactivates it.
    pub async fn archive(&self, conversation_id: &str, user_id: i64) -> Result<(), error::SystemError> {
        let conversation = self.registry.find_for_participant(conversation_id, user_id).await?;

        if !self.conversation_repo.set_active(&conversation.id, false).await? {
            return Err(error::SystemError::not_found("Conversation not found"));
        }

        tracing::debug!("Conversation {} archived by user {}", conversation.id, user_id);
        Ok(())
    }

    pub async fn list_conversations(
        &self,
        user_id: i64,
    ) -> Result<Vec<ConversationView>, error::SystemError> {
        let conversations = self.conversation_repo.find_active_by_participant(user_id).await?;

        let others: Vec<i64> = conversations
            .iter()
            .filter_map(|c| c.slot_of(user_id).map(|slot| c.participant(slot.other())))
            .collect();
        let presence = self.presence.lookup(&others).await;

        let views = conversations
            .iter()
            .zip(presence)
            .filter_map(|(conversation, info)| {
                let slot = conversation.slot_of(user_id)?;
                Some(ConversationView::project(conversation, slot, info.online, info.last_seen_at))
            })
            .collect();

        Ok(views)
    }

    /// Forwards a typing indicator. Nothing is persisted.
    pub fn typing(
        &self,
        from_user_id: i64,
        to_user_id: i64,
        conversation_id: &str,
        typing: bool,
    ) -> Result<(), error::SystemError> {
        let key = ConversationKey::parse(conversation_id)?;

        if !key.contains(from_user_id) {
            return Err(error::SystemError::access_denied(
                "You are not a participant of this conversation",
            ));
        }
        if key.other(from_user_id) != Some(to_user_id) {
            return Err(error::SystemError::invalid_argument(
                "Typing target is not the other participant",
            ));
        }

        self.publisher.to_user(
            to_user_id,
            ServerEvent::Typing {
                from_user_id,
                to_user_id,
                conversation_id: key.id(),
                typing,
                at: chrono::Utc::now(),
            },
        );

        Ok(())
    }
}

fn recipient_muted(conversation: &ConversationEntity, recipient_id: i64) -> bool {
    conversation.slot_of(recipient_id).is_some_and(|slot| conversation.muted(slot))
}

/// Groups changed messages per (conversation, sender) so each sender gets one
/// status event per conversation.
fn group_by_sender(rows: Vec<StatusRow>) -> BTreeMap<(String, i64), Vec<Uuid>> {
    let mut grouped: BTreeMap<(String, i64), Vec<Uuid>> = BTreeMap::new();
    for row in rows {
        grouped.entry((row.conversation_id, row.sender_id)).or_default().push(row.id);
    }
    grouped
}
