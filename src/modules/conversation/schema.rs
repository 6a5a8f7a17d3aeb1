use serde::Serialize;
use sqlx::prelude::FromRow;

/// Which side of the canonical pair a participant sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ParticipantSlot {
    Low,
    High,
}

impl ParticipantSlot {
    pub fn other(self) -> Self {
        match self {
            ParticipantSlot::Low => ParticipantSlot::High,
            ParticipantSlot::High => ParticipantSlot::Low,
        }
    }

    pub fn unread_column(self) -> &'static str {
        match self {
            ParticipantSlot::Low => "unread_low",
            ParticipantSlot::High => "unread_high",
        }
    }
}

/// Per-participant boolean flags stored on the conversation row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParticipantFlag {
    Muted,
    Blocked,
}

impl ParticipantFlag {
    pub fn column(self, slot: ParticipantSlot) -> &'static str {
        match (self, slot) {
            (ParticipantFlag::Muted, ParticipantSlot::Low) => "muted_low",
            (ParticipantFlag::Muted, ParticipantSlot::High) => "muted_high",
            (ParticipantFlag::Blocked, ParticipantSlot::Low) => "blocked_low",
            (ParticipantFlag::Blocked, ParticipantSlot::High) => "blocked_high",
        }
    }
}

#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct ConversationEntity {
    pub id: String,
    pub participant_low: i64,
    pub participant_high: i64,
    pub context_id: Option<i64>,
    pub last_message_snapshot: Option<String>,
    pub last_message_at: Option<chrono::DateTime<chrono::Utc>>,
    pub unread_low: i32,
    pub unread_high: i32,
    pub muted_low: bool,
    pub muted_high: bool,
    pub blocked_low: bool,
    pub blocked_high: bool,
    pub active: bool,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl ConversationEntity {
    /// Ownership is resolved against the canonical pair, never call order.
    pub fn slot_of(&self, user_id: i64) -> Option<ParticipantSlot> {
        if user_id == self.participant_low {
            Some(ParticipantSlot::Low)
        } else if user_id == self.participant_high {
            Some(ParticipantSlot::High)
        } else {
            None
        }
    }

    pub fn participant(&self, slot: ParticipantSlot) -> i64 {
        match slot {
            ParticipantSlot::Low => self.participant_low,
            ParticipantSlot::High => self.participant_high,
        }
    }

    pub fn unread(&self, slot: ParticipantSlot) -> i32 {
        match slot {
            ParticipantSlot::Low => self.unread_low,
            ParticipantSlot::High => self.unread_high,
        }
    }

    pub fn flag(&self, flag: ParticipantFlag, slot: ParticipantSlot) -> bool {
        match (flag, slot) {
            (ParticipantFlag::Muted, ParticipantSlot::Low) => self.muted_low,
            (ParticipantFlag::Muted, ParticipantSlot::High) => self.muted_high,
            (ParticipantFlag::Blocked, ParticipantSlot::Low) => self.blocked_low,
            (ParticipantFlag::Blocked, ParticipantSlot::High) => self.blocked_high,
        }
    }

    pub fn muted(&self, slot: ParticipantSlot) -> bool {
        self.flag(ParticipantFlag::Muted, slot)
    }

    pub fn blocked(&self, slot: ParticipantSlot) -> bool {
        self.flag(ParticipantFlag::Blocked, slot)
    }
}
