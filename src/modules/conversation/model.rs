use serde::{Deserialize, Serialize};
use std::fmt;
use validator::Validate;

use crate::api::error;
use crate::modules::conversation::schema::{ConversationEntity, ParticipantSlot};

/// Canonical identity of a conversation: the sorted participant pair plus an
/// optional context (e.g. a job posting).
///
/// Encoded as `"{low}_{high}"` or `"{low}_{high}_{context}"`. The encoding is
/// also the primary key, so it must never change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConversationKey {
    pub low: i64,
    pub high: i64,
    pub context_id: Option<i64>,
}

impl ConversationKey {
    pub fn between(
        user_a: i64,
        user_b: i64,
        context_id: Option<i64>,
    ) -> Result<Self, error::SystemError> {
        if user_a <= 0 || user_b <= 0 {
            return Err(error::SystemError::invalid_argument("User ids must be positive"));
        }
        if user_a == user_b {
            return Err(error::SystemError::invalid_argument(
                "Cannot start a conversation with yourself",
            ));
        }
        Ok(Self { low: user_a.min(user_b), high: user_a.max(user_b), context_id })
    }

    pub fn parse(id: &str) -> Result<Self, error::SystemError> {
        let invalid = || error::SystemError::invalid_argument("Malformed conversation id");
        let mut parts = id.split('_');

        let low = parts.next().and_then(|p| p.parse::<i64>().ok()).ok_or_else(invalid)?;
        let high = parts.next().and_then(|p| p.parse::<i64>().ok()).ok_or_else(invalid)?;
        let context_id = match parts.next() {
            Some(p) => Some(p.parse::<i64>().map_err(|_| invalid())?),
            None => None,
        };
        if parts.next().is_some() || low >= high {
            return Err(invalid());
        }

        let key = Self::between(low, high, context_id)?;
        Ok(key)
    }

    pub fn id(&self) -> String {
        self.to_string()
    }

    pub fn contains(&self, user_id: i64) -> bool {
        user_id == self.low || user_id == self.high
    }

    pub fn other(&self, user_id: i64) -> Option<i64> {
        match user_id {
            id if id == self.low => Some(self.high),
            id if id == self.high => Some(self.low),
            _ => None,
        }
    }
}

impl fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.context_id {
            Some(ctx) => write!(f, "{}_{}_{}", self.low, self.high, ctx),
            None => write!(f, "{}_{}", self.low, self.high),
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewConversation {
    pub key: ConversationKey,
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct StartConversationBody {
    #[validate(range(min = 1))]
    pub recipient_id: i64,
    pub context_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartConversationResponse {
    pub conversation_id: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MuteResponse {
    pub muted: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockResponse {
    pub blocked: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkReadResponse {
    pub marked: usize,
}

/// A conversation as seen by one of its participants.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationView {
    pub id: String,
    pub context_id: Option<i64>,
    pub other_participant_id: i64,
    pub last_message: Option<String>,
    pub last_message_at: Option<chrono::DateTime<chrono::Utc>>,
    pub unread_count: i32,
    pub muted: bool,
    pub blocked: bool,
    pub online: bool,
    pub last_seen_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl ConversationView {
    pub fn project(
        conversation: &ConversationEntity,
        slot: ParticipantSlot,
        online: bool,
        last_seen_at: Option<chrono::DateTime<chrono::Utc>>,
    ) -> Self {
        Self {
            id: conversation.id.clone(),
            context_id: conversation.context_id,
            other_participant_id: conversation.participant(slot.other()),
            last_message: conversation.last_message_snapshot.clone(),
            last_message_at: conversation.last_message_at,
            unread_count: conversation.unread(slot),
            muted: conversation.muted(slot),
            blocked: conversation.blocked(slot),
            online,
            last_seen_at: if online { None } else { last_seen_at },
        }
    }
}
