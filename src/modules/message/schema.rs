use serde::{Deserialize, Serialize};
use sqlx::prelude::{FromRow, Type};
use uuid::Uuid;

use crate::modules::message::state::{DeliveryState, MessageState};

#[derive(Debug, PartialEq, Eq, Clone, Copy, Type, Serialize, Deserialize)]
#[sqlx(type_name = "message_kind", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Text,
    Image,
    File,
    System,
}

/// Opaque metadata of an uploaded file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub url: String,
    pub mime: String,
    pub size: i64,
    pub original_name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MessageEntity {
    pub id: Uuid,
    pub conversation_id: String,
    pub sender_id: i64,
    pub recipient_id: i64,
    pub body: Option<String>,
    pub kind: MessageKind,
    pub attachment: Option<Attachment>,
    pub delivered: bool,
    pub delivered_at: Option<chrono::DateTime<chrono::Utc>>,
    pub read: bool,
    pub read_at: Option<chrono::DateTime<chrono::Utc>>,
    pub edited: bool,
    pub edited_at: Option<chrono::DateTime<chrono::Utc>>,
    pub deleted_for_everyone: bool,
    pub deleted_at: Option<chrono::DateTime<chrono::Utc>>,
    pub hidden_for: Vec<i64>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl MessageEntity {
    pub fn state(&self) -> MessageState {
        let delivery = if self.read {
            DeliveryState::Read
        } else if self.delivered {
            DeliveryState::Delivered
        } else {
            DeliveryState::Sent
        };
        MessageState { delivery, tombstoned: self.deleted_for_everyone }
    }

    pub fn involves(&self, user_id: i64) -> bool {
        self.sender_id == user_id || self.recipient_id == user_id
    }

    pub fn visible_to(&self, viewer: i64) -> bool {
        !self.hidden_for.contains(&viewer)
    }
}

/// Flat row as stored; attachment metadata lives in nullable columns.
#[derive(Debug, Clone, FromRow)]
pub struct MessageRow {
    pub id: Uuid,
    pub conversation_id: String,
    pub sender_id: i64,
    pub recipient_id: i64,
    pub body: Option<String>,
    pub kind: MessageKind,
    pub attachment_url: Option<String>,
    pub attachment_mime: Option<String>,
    pub attachment_size: Option<i64>,
    pub attachment_name: Option<String>,
    pub delivered: bool,
    pub delivered_at: Option<chrono::DateTime<chrono::Utc>>,
    pub read: bool,
    pub read_at: Option<chrono::DateTime<chrono::Utc>>,
    pub edited: bool,
    pub edited_at: Option<chrono::DateTime<chrono::Utc>>,
    pub deleted_for_everyone: bool,
    pub deleted_at: Option<chrono::DateTime<chrono::Utc>>,
    pub hidden_for: Vec<i64>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl From<MessageRow> for MessageEntity {
    fn from(row: MessageRow) -> Self {
        let attachment = match (row.attachment_url, row.attachment_mime) {
            (Some(url), Some(mime)) => Some(Attachment {
                url,
                mime,
                size: row.attachment_size.unwrap_or_default(),
                original_name: row.attachment_name.unwrap_or_default(),
            }),
            _ => None,
        };

        MessageEntity {
            id: row.id,
            conversation_id: row.conversation_id,
            sender_id: row.sender_id,
            recipient_id: row.recipient_id,
            body: row.body,
            kind: row.kind,
            attachment,
            delivered: row.delivered,
            delivered_at: row.delivered_at,
            read: row.read,
            read_at: row.read_at,
            edited: row.edited,
            edited_at: row.edited_at,
            deleted_for_everyone: row.deleted_for_everyone,
            deleted_at: row.deleted_at,
            hidden_for: row.hidden_for,
            created_at: row.created_at,
        }
    }
}

/// A message whose delivery flags changed in a batch.
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct StatusRow {
    pub id: Uuid,
    pub conversation_id: String,
    pub sender_id: i64,
}
