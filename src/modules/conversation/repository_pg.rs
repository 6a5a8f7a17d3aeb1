use crate::modules::conversation::model::NewConversation;
use crate::modules::conversation::repository::ConversationRepository;
use crate::modules::conversation::schema::{ParticipantFlag, ParticipantSlot};
use crate::{api::error, modules::conversation::schema::ConversationEntity};

#[derive(Clone)]
pub struct ConversationPgRepository {
    pool: sqlx::PgPool,
}

impl ConversationPgRepository {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl ConversationRepository for ConversationPgRepository {
    async fn find_by_id(&self, id: &str) -> Result<Option<ConversationEntity>, error::SystemError> {
        let conversation =
            sqlx::query_as::<_, ConversationEntity>("SELECT * FROM conversations WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(conversation)
    }

    async fn insert_if_absent(
        &self,
        conversation: &NewConversation,
    ) -> Result<ConversationEntity, error::SystemError> {
        let key = &conversation.key;

        // The primary key is the identity tuple; losers of a race hit DO NOTHING
        // and read back the winner's row.
        let inserted = sqlx::query_as::<_, ConversationEntity>(
            r#"
            INSERT INTO conversations (id, participant_low, participant_high, context_id)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (id) DO NOTHING
            RETURNING *
            "#,
        )
        .bind(key.id())
        .bind(key.low)
        .bind(key.high)
        .bind(key.context_id)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(conversation) = inserted {
            tracing::debug!("Created conversation {}", conversation.id);
            return Ok(conversation);
        }

        self.find_by_id(&key.id())
            .await?
            .ok_or_else(|| error::SystemError::not_found("Conversation not found"))
    }

    async fn find_active_by_participant(
        &self,
        user_id: i64,
    ) -> Result<Vec<ConversationEntity>, error::SystemError> {
        let conversations = sqlx::query_as::<_, ConversationEntity>(
            r#"
            SELECT *
            FROM conversations
            WHERE (participant_low = $1 OR participant_high = $1)
            AND active = TRUE
            ORDER BY last_message_at DESC NULLS LAST, created_at DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(conversations)
    }

    async fn toggle_flag(
        &self,
        id: &str,
        flag: ParticipantFlag,
        slot: ParticipantSlot,
    ) -> Result<Option<ConversationEntity>, error::SystemError> {
        let column = flag.column(slot);
        let query = format!(
            "UPDATE conversations SET {column} = NOT {column}, updated_at = NOW() WHERE id = $1 RETURNING *"
        );

        let conversation = sqlx::query_as::<_, ConversationEntity>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(conversation)
    }

    async fn set_active(&self, id: &str, active: bool) -> Result<bool, error::SystemError> {
        let result =
            sqlx::query("UPDATE conversations SET active = $2, updated_at = NOW() WHERE id = $1")
                .bind(id)
                .bind(active)
                .execute(&self.pool)
                .await?;

        Ok(result.rows_affected() > 0)
    }
}
