/// WebSocket Message Protocol
///
/// Frames exchanged with clients over `/ws`. Inbound frames are tagged by
/// `type`; outbound events are adjacently tagged as `{"event": ..., "data": ...}`.
use actix::Message;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::error;
use crate::modules::conversation::model::ConversationKey;
use crate::modules::message::model::{DeleteScope, MessageView, MAX_BODY_LEN};
use crate::modules::message::schema::MessageEntity;

/// Frames sent from client to server
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientFrame {
    /// Late authentication for connections that did not present a token at upgrade
    #[serde(rename_all = "camelCase")]
    Auth { token: String },

    #[serde(rename_all = "camelCase")]
    SendMessage { recipient_id: i64, body: String, context_id: Option<i64> },

    /// Ephemeral typing indicator addressed to one user
    #[serde(rename_all = "camelCase")]
    Typing { to_user_id: i64, conversation_id: String, typing: bool },

    #[serde(rename_all = "camelCase")]
    MarkRead { conversation_id: String },

    /// Keep-alive
    Ping,
}

impl ClientFrame {
    /// Decodes and validates a text frame. Anything that fails here is never
    /// dispatched to the session.
    pub fn parse(text: &str) -> Result<Self, error::SystemError> {
        let frame: ClientFrame = serde_json::from_str(text)
            .map_err(|e| error::SystemError::invalid_argument(format!("Malformed frame: {e}")))?;
        frame.validate()?;
        Ok(frame)
    }

    pub fn validate(&self) -> Result<(), error::SystemError> {
        match self {
            ClientFrame::Auth { token } if token.trim().is_empty() => {
                Err(error::SystemError::invalid_argument("Token is required"))
            }
            ClientFrame::SendMessage { recipient_id, body, .. } => {
                if *recipient_id <= 0 {
                    return Err(error::SystemError::invalid_argument("Invalid recipient"));
                }
                let len = body.trim().chars().count();
                if len == 0 || len > MAX_BODY_LEN {
                    return Err(error::SystemError::invalid_argument(format!(
                        "Message body must be 1 to {MAX_BODY_LEN} characters"
                    )));
                }
                Ok(())
            }
            ClientFrame::Typing { to_user_id, conversation_id, .. } => {
                let key = ConversationKey::parse(conversation_id)?;
                if !key.contains(*to_user_id) {
                    return Err(error::SystemError::invalid_argument(
                        "Typing target is not part of the conversation",
                    ));
                }
                Ok(())
            }
            ClientFrame::MarkRead { conversation_id } => {
                ConversationKey::parse(conversation_id).map(|_| ())
            }
            _ => Ok(()),
        }
    }
}

/// Edit/tombstone projection carried by `message:update`
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageUpdateView {
    pub id: Uuid,
    pub body: Option<String>,
    pub edited: bool,
    pub edited_at: Option<chrono::DateTime<chrono::Utc>>,
    pub deleted_for_everyone: bool,
}

impl From<&MessageEntity> for MessageUpdateView {
    fn from(message: &MessageEntity) -> Self {
        Self {
            id: message.id,
            body: message.body.clone(),
            edited: message.edited,
            edited_at: message.edited_at,
            deleted_for_everyone: message.deleted_for_everyone,
        }
    }
}

/// Events sent from server to client
#[derive(Debug, Clone, PartialEq, Serialize, Message)]
#[rtype(result = "()")]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    #[serde(rename = "message:new", rename_all = "camelCase")]
    MessageNew { conversation_id: String, message: MessageView },

    #[serde(rename = "message:update", rename_all = "camelCase")]
    MessageUpdate { conversation_id: String, message: MessageUpdateView },

    #[serde(rename = "message:delete", rename_all = "camelCase")]
    MessageDelete { conversation_id: String, message_id: Uuid, scope: DeleteScope },

    /// One event per batch of messages whose flags changed together
    #[serde(rename = "message:status", rename_all = "camelCase")]
    MessageStatus {
        conversation_id: String,
        message_ids: Vec<Uuid>,
        #[serde(skip_serializing_if = "Option::is_none")]
        delivered: Option<bool>,
        #[serde(skip_serializing_if = "Option::is_none")]
        read: Option<bool>,
        at: chrono::DateTime<chrono::Utc>,
    },

    #[serde(rename = "typing", rename_all = "camelCase")]
    Typing {
        from_user_id: i64,
        to_user_id: i64,
        conversation_id: String,
        typing: bool,
        at: chrono::DateTime<chrono::Utc>,
    },

    #[serde(rename = "presence:update", rename_all = "camelCase")]
    PresenceUpdate {
        user_id: i64,
        online: bool,
        at: chrono::DateTime<chrono::Utc>,
        #[serde(skip_serializing_if = "Option::is_none")]
        last_seen_at: Option<chrono::DateTime<chrono::Utc>>,
    },

    #[serde(rename = "presence:state", rename_all = "camelCase")]
    PresenceState { online_user_ids: Vec<i64> },

    #[serde(rename = "auth:success", rename_all = "camelCase")]
    AuthSuccess { user_id: i64 },

    #[serde(rename = "auth:failed")]
    AuthFailed { reason: String },

    #[serde(rename = "pong")]
    Pong,

    #[serde(rename = "error")]
    Error { kind: &'static str, message: String },
}

impl ServerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::MessageNew { .. } => "message:new",
            ServerEvent::MessageUpdate { .. } => "message:update",
            ServerEvent::MessageDelete { .. } => "message:delete",
            ServerEvent::MessageStatus { .. } => "message:status",
            ServerEvent::Typing { .. } => "typing",
            ServerEvent::PresenceUpdate { .. } => "presence:update",
            ServerEvent::PresenceState { .. } => "presence:state",
            ServerEvent::AuthSuccess { .. } => "auth:success",
            ServerEvent::AuthFailed { .. } => "auth:failed",
            ServerEvent::Pong => "pong",
            ServerEvent::Error { .. } => "error",
        }
    }

    /// Client-facing error frame with the same kind string the REST API uses.
    pub fn from_error(err: error::SystemError) -> Self {
        let err = error::Error::from(err);
        ServerEvent::Error { kind: err.kind(), message: err.message().into_owned() }
    }
}
