use uuid::Uuid;

use crate::modules::conversation::schema::ParticipantSlot;
use crate::modules::message::model::{InsertMessage, MessageQuery};
use crate::{
    api::error,
    modules::message::schema::{MessageEntity, StatusRow},
};

/// Persistence of messages. Every method is one atomic unit: message flags and
/// the owning conversation's counters/snapshot change together or not at all.
#[async_trait::async_trait]
pub trait MessageRepository {
    async fn find_by_id(&self, id: &Uuid) -> Result<Option<MessageEntity>, error::SystemError>;

    /// Newest first, excluding messages hidden for the viewer.
    async fn find_visible(
        &self,
        query: &MessageQuery,
    ) -> Result<Vec<MessageEntity>, error::SystemError>;

    /// Inserts the message, refreshes the last-message snapshot, bumps the
    /// recipient's unread counter and reactivates an archived conversation.
    /// Fails with `Blocked` when the recipient's block flag is set at commit
    /// time.
    async fn append(&self, message: &InsertMessage) -> Result<MessageEntity, error::SystemError>;

    /// Unread messages addressed to `reader_id`, oldest first.
    async fn find_unread(
        &self,
        conversation_id: &str,
        reader_id: i64,
    ) -> Result<Vec<MessageEntity>, error::SystemError>;

    /// Marks the given messages read (and delivered) and recomputes the
    /// reader's unread counter. Rows already read are skipped, so only the
    /// messages that actually changed come back.
    async fn mark_conversation_read(
        &self,
        conversation_id: &str,
        reader_id: i64,
        reader_slot: ParticipantSlot,
        message_ids: &[Uuid],
        at: chrono::DateTime<chrono::Utc>,
    ) -> Result<Vec<StatusRow>, error::SystemError>;

    /// At most `limit` undelivered messages addressed to `recipient_id`,
    /// oldest first.
    async fn find_undelivered(
        &self,
        recipient_id: i64,
        limit: i64,
    ) -> Result<Vec<MessageEntity>, error::SystemError>;

    /// Rows already delivered are skipped, so two reconnects racing over the
    /// same candidates announce each message once.
    async fn mark_delivered(
        &self,
        message_ids: &[Uuid],
        at: chrono::DateTime<chrono::Utc>,
    ) -> Result<Vec<StatusRow>, error::SystemError>;

    /// Returns `None` when the message is missing or already tombstoned.
    async fn update_body(
        &self,
        id: &Uuid,
        body: &str,
        at: chrono::DateTime<chrono::Utc>,
    ) -> Result<Option<MessageEntity>, error::SystemError>;

    /// Returns `None` when the message is missing or already tombstoned.
    async fn tombstone(
        &self,
        id: &Uuid,
        at: chrono::DateTime<chrono::Utc>,
    ) -> Result<Option<MessageEntity>, error::SystemError>;

    async fn hide_for(
        &self,
        id: &Uuid,
        viewer_id: i64,
    ) -> Result<Option<MessageEntity>, error::SystemError>;
}
