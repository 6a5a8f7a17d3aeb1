use crate::{
    api::error,
    modules::conversation::{
        model::NewConversation,
        schema::{ConversationEntity, ParticipantFlag, ParticipantSlot},
    },
};

#[async_trait::async_trait]
pub trait ConversationRepository {
    async fn find_by_id(&self, id: &str) -> Result<Option<ConversationEntity>, error::SystemError>;

    /// Atomic find-or-insert keyed on the conversation id. A concurrent second
    /// creator observes the winner's row.
    async fn insert_if_absent(
        &self,
        conversation: &NewConversation,
    ) -> Result<ConversationEntity, error::SystemError>;

    /// Active conversations of `user_id`, most recent activity first.
    async fn find_active_by_participant(
        &self,
        user_id: i64,
    ) -> Result<Vec<ConversationEntity>, error::SystemError>;

    /// Flips one participant's flag in place and returns the updated row.
    async fn toggle_flag(
        &self,
        id: &str,
        flag: ParticipantFlag,
        slot: ParticipantSlot,
    ) -> Result<Option<ConversationEntity>, error::SystemError>;

    async fn set_active(&self, id: &str, active: bool) -> Result<bool, error::SystemError>;
}
