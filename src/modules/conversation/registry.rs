use std::sync::Arc;

use crate::api::error;
use crate::modules::conversation::{
    model::{ConversationKey, NewConversation},
    repository::ConversationRepository,
    schema::ConversationEntity,
};

/// Resolves participant pairs to their single conversation row.
pub struct ConversationRegistry<C>
where
    C: ConversationRepository + Send + Sync,
{
    conversation_repo: Arc<C>,
}

impl<C> ConversationRegistry<C>
where
    C: ConversationRepository + Send + Sync,
{
    pub fn new(conversation_repo: Arc<C>) -> Self {
        Self { conversation_repo }
    }

    pub async fn get_or_create(
        &self,
        user_a: i64,
        user_b: i64,
        context_id: Option<i64>,
    ) -> Result<ConversationEntity, error::SystemError> {
        let key = ConversationKey::between(user_a, user_b, context_id)?;

        if let Some(existing) = self.conversation_repo.find_by_id(&key.id()).await? {
            return Ok(existing);
        }

        self.conversation_repo.insert_if_absent(&NewConversation { key }).await
    }

    /// Loads a conversation and resolves `user_id` to a participant slot.
    pub async fn find_for_participant(
        &self,
        conversation_id: &str,
        user_id: i64,
    ) -> Result<ConversationEntity, error::SystemError> {
        let conversation = self
            .conversation_repo
            .find_by_id(conversation_id)
            .await?
            .ok_or_else(|| error::SystemError::not_found("Conversation not found"))?;

        if conversation.slot_of(user_id).is_none() {
            return Err(error::SystemError::access_denied(
                "You are not a participant of this conversation",
            ));
        }

        Ok(conversation)
    }
}
