//! Message lifecycle.
//!
//! ```text
//! Sent ──deliver──▶ Delivered ──read──▶ Read
//!   └──────────────read──────────────────┘
//! live ──edit──▶ live (edited)
//! live ──delete for everyone──▶ tombstoned
//! any  ──hide for viewer──▶ unchanged
//! ```
//!
//! Delivery flags only move forward; repeating a reached step is a no-op.
//! Content transitions on a tombstoned message are rejected.
use crate::api::error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DeliveryState {
    Sent,
    Delivered,
    Read,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageState {
    pub delivery: DeliveryState,
    pub tombstoned: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Deliver,
    Read,
    Edit,
    DeleteForEveryone,
    HideForViewer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Applied(MessageState),
    Unchanged,
}

impl MessageState {
    pub fn sent() -> Self {
        Self { delivery: DeliveryState::Sent, tombstoned: false }
    }

    pub fn apply(self, transition: Transition) -> Result<Outcome, error::SystemError> {
        use DeliveryState::{Delivered, Read, Sent};

        let outcome = match (self.delivery, self.tombstoned, transition) {
            (Sent, _, Transition::Deliver) => {
                Outcome::Applied(Self { delivery: Delivered, ..self })
            }
            (Delivered | Read, _, Transition::Deliver) => Outcome::Unchanged,

            (Sent | Delivered, _, Transition::Read) => {
                Outcome::Applied(Self { delivery: Read, ..self })
            }
            (Read, _, Transition::Read) => Outcome::Unchanged,

            (_, false, Transition::Edit) => Outcome::Applied(self),
            (_, true, Transition::Edit) => {
                return Err(error::SystemError::invalid_transition(
                    "A deleted message cannot be edited",
                ));
            }

            (_, false, Transition::DeleteForEveryone) => {
                Outcome::Applied(Self { tombstoned: true, ..self })
            }
            (_, true, Transition::DeleteForEveryone) => {
                return Err(error::SystemError::invalid_transition(
                    "Message is already deleted for everyone",
                ));
            }

            (_, _, Transition::HideForViewer) => Outcome::Applied(self),
        };

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(delivery: DeliveryState, tombstoned: bool) -> MessageState {
        MessageState { delivery, tombstoned }
    }

    #[test]
    fn test_delivery_moves_forward_only() {
        let sent = MessageState::sent();
        let delivered = state(DeliveryState::Delivered, false);
        let read = state(DeliveryState::Read, false);

        assert_eq!(sent.apply(Transition::Deliver).unwrap(), Outcome::Applied(delivered));
        assert_eq!(delivered.apply(Transition::Deliver).unwrap(), Outcome::Unchanged);
        assert_eq!(read.apply(Transition::Deliver).unwrap(), Outcome::Unchanged);

        assert_eq!(sent.apply(Transition::Read).unwrap(), Outcome::Applied(read));
        assert_eq!(delivered.apply(Transition::Read).unwrap(), Outcome::Applied(read));
        assert_eq!(read.apply(Transition::Read).unwrap(), Outcome::Unchanged);
    }

    #[test]
    fn test_edit_keeps_delivery_state() {
        for delivery in [DeliveryState::Sent, DeliveryState::Delivered, DeliveryState::Read] {
            let live = state(delivery, false);
            assert_eq!(live.apply(Transition::Edit).unwrap(), Outcome::Applied(live));
        }
    }

    #[test]
    fn test_tombstone_is_terminal_for_content() {
        let live = state(DeliveryState::Delivered, false);
        let Outcome::Applied(tombstoned) = live.apply(Transition::DeleteForEveryone).unwrap()
        else {
            panic!("delete for everyone should apply");
        };
        assert!(tombstoned.tombstoned);
        assert_eq!(tombstoned.delivery, DeliveryState::Delivered);

        assert!(matches!(
            tombstoned.apply(Transition::Edit),
            Err(error::SystemError::InvalidTransition(_))
        ));
        assert!(matches!(
            tombstoned.apply(Transition::DeleteForEveryone),
            Err(error::SystemError::InvalidTransition(_))
        ));
    }

    #[test]
    fn test_status_and_hide_still_apply_to_tombstones() {
        let tombstoned = state(DeliveryState::Sent, true);
        assert_eq!(
            tombstoned.apply(Transition::Read).unwrap(),
            Outcome::Applied(state(DeliveryState::Read, true))
        );
        assert_eq!(
            tombstoned.apply(Transition::HideForViewer).unwrap(),
            Outcome::Applied(tombstoned)
        );
    }
}
