use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;
use validator::Validate;

use crate::api::error;
use crate::modules::conversation::schema::ParticipantSlot;
use crate::modules::message::schema::{Attachment, MessageEntity, MessageKind};

pub const MAX_BODY_LEN: usize = 4000;
pub const TOMBSTONE_PLACEHOLDER: &str = "Message deleted";

#[derive(Debug, Clone)]
pub struct InsertMessage {
    pub id: Uuid,
    pub conversation_id: String,
    pub sender_id: i64,
    pub recipient_id: i64,
    pub recipient_slot: ParticipantSlot,
    pub body: Option<String>,
    pub kind: MessageKind,
    pub attachment: Option<Attachment>,
    /// Text written to the conversation's last-message snapshot.
    pub snapshot: String,
    pub delivered: bool,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone)]
pub struct MessageQuery {
    pub conversation_id: String,
    pub viewer_id: i64,
    pub before: Option<chrono::DateTime<chrono::Utc>>,
    pub limit: i64,
}

/// What a client asks to send. Kind defaults to text.
#[derive(Debug, Clone)]
pub struct OutgoingMessage {
    pub sender_id: i64,
    pub recipient_id: i64,
    pub context_id: Option<i64>,
    pub body: Option<String>,
    pub kind: MessageKind,
    pub attachment: Option<Attachment>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeleteScope {
    Me,
    All,
}

impl FromStr for DeleteScope {
    type Err = error::SystemError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "me" => Ok(DeleteScope::Me),
            "all" => Ok(DeleteScope::All),
            other => Err(error::SystemError::invalid_transition(format!(
                "Unknown delete scope '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageFlags {
    pub sent: bool,
    pub delivered: bool,
    pub read: bool,
    pub edited: bool,
    pub deleted_for_everyone: bool,
}

/// Wire shape of a message for REST responses and `message:new`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageView {
    pub id: Uuid,
    pub conversation_id: String,
    pub sender_id: i64,
    pub recipient_id: i64,
    pub body: Option<String>,
    pub placeholder: Option<&'static str>,
    pub kind: MessageKind,
    pub attachment: Option<Attachment>,
    pub flags: MessageFlags,
    pub edited_at: Option<chrono::DateTime<chrono::Utc>>,
    pub deleted_at: Option<chrono::DateTime<chrono::Utc>>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl From<&MessageEntity> for MessageView {
    fn from(message: &MessageEntity) -> Self {
        Self {
            id: message.id,
            conversation_id: message.conversation_id.clone(),
            sender_id: message.sender_id,
            recipient_id: message.recipient_id,
            body: message.body.clone(),
            placeholder: message.deleted_for_everyone.then_some(TOMBSTONE_PLACEHOLDER),
            kind: message.kind,
            attachment: message.attachment.clone(),
            flags: MessageFlags {
                sent: true,
                delivered: message.delivered,
                read: message.read,
                edited: message.edited,
                deleted_for_everyone: message.deleted_for_everyone,
            },
            edited_at: message.edited_at,
            deleted_at: message.deleted_at,
            created_at: message.created_at,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageBody {
    #[validate(range(min = 1))]
    pub recipient_id: i64,
    #[validate(length(max = 4000))]
    pub body: Option<String>,
    pub kind: Option<MessageKind>,
    pub attachment: Option<Attachment>,
    pub context_id: Option<i64>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct EditMessageBody {
    #[validate(length(min = 1, max = 4000))]
    pub body: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeleteMessageQuery {
    pub scope: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct MessagePageQuery {
    pub before: Option<String>,
    #[validate(range(min = 1, max = 100))]
    pub limit: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePage {
    pub messages: Vec<MessageView>,
    pub cursor: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteMessageResponse {
    pub message_id: Uuid,
    pub scope: DeleteScope,
}
