use uuid::Uuid;

use crate::{
    api::error,
    modules::{
        conversation::schema::{ParticipantFlag, ParticipantSlot},
        message::{
            model::{InsertMessage, MessageQuery},
            repository::MessageRepository,
            schema::{MessageEntity, MessageRow, StatusRow},
        },
    },
};

#[derive(Clone)]
pub struct MessageRepositoryPg {
    pool: sqlx::PgPool,
}

impl MessageRepositoryPg {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl MessageRepository for MessageRepositoryPg {
    async fn find_by_id(&self, id: &Uuid) -> Result<Option<MessageEntity>, error::SystemError> {
        let row = sqlx::query_as::<_, MessageRow>("SELECT * FROM messages WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(MessageEntity::from))
    }

    async fn find_visible(
        &self,
        query: &MessageQuery,
    ) -> Result<Vec<MessageEntity>, error::SystemError> {
        // has index on (conversation_id, created_at DESC)
        let rows = if let Some(before) = query.before {
            sqlx::query_as::<_, MessageRow>(
                r#"
                SELECT * FROM messages
                WHERE conversation_id = $1
                AND NOT ($2 = ANY(hidden_for))
                AND created_at < $3
                ORDER BY created_at DESC
                LIMIT $4
                "#,
            )
            .bind(&query.conversation_id)
            .bind(query.viewer_id)
            .bind(before)
            .bind(query.limit)
            .fetch_all(&self.pool)
            .await?
        } else {
            sqlx::query_as::<_, MessageRow>(
                r#"
                SELECT * FROM messages
                WHERE conversation_id = $1
                AND NOT ($2 = ANY(hidden_for))
                ORDER BY created_at DESC
                LIMIT $3
                "#,
            )
            .bind(&query.conversation_id)
            .bind(query.viewer_id)
            .bind(query.limit)
            .fetch_all(&self.pool)
            .await?
        };

        Ok(rows.into_iter().map(MessageEntity::from).collect())
    }

    async fn append(&self, message: &InsertMessage) -> Result<MessageEntity, error::SystemError> {
        let mut tx = self.pool.begin().await?;

        // Updating the conversation first takes its row lock, which serializes
        // this send against a concurrent mark-read on the same conversation.
        let unread = message.recipient_slot.unread_column();
        let blocked = ParticipantFlag::Blocked.column(message.recipient_slot);
        let update_conversation = format!(
            r#"
            UPDATE conversations
            SET last_message_snapshot = $2,
                last_message_at = $3,
                {unread} = {unread} + 1,
                active = TRUE,
                updated_at = NOW()
            WHERE id = $1 AND {blocked} = FALSE
            "#
        );
        let updated = sqlx::query(&update_conversation)
            .bind(&message.conversation_id)
            .bind(&message.snapshot)
            .bind(message.created_at)
            .execute(tx.as_mut())
            .await?;

        if updated.rows_affected() == 0 {
            let exists = sqlx::query_scalar::<_, bool>(
                "SELECT EXISTS (SELECT 1 FROM conversations WHERE id = $1)",
            )
            .bind(&message.conversation_id)
            .fetch_one(tx.as_mut())
            .await?;

            return Err(if exists {
                error::SystemError::blocked("The recipient has blocked you")
            } else {
                error::SystemError::not_found("Conversation not found")
            });
        }

        let attachment = message.attachment.as_ref();
        let row = sqlx::query_as::<_, MessageRow>(
            r#"
            INSERT INTO messages (
                id, conversation_id, sender_id, recipient_id, body, kind,
                attachment_url, attachment_mime, attachment_size, attachment_name,
                delivered, delivered_at, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            RETURNING *
            "#,
        )
        .bind(message.id)
        .bind(&message.conversation_id)
        .bind(message.sender_id)
        .bind(message.recipient_id)
        .bind(&message.body)
        .bind(message.kind)
        .bind(attachment.map(|a| a.url.as_str()))
        .bind(attachment.map(|a| a.mime.as_str()))
        .bind(attachment.map(|a| a.size))
        .bind(attachment.map(|a| a.original_name.as_str()))
        .bind(message.delivered)
        .bind(message.delivered.then_some(message.created_at))
        .bind(message.created_at)
        .fetch_one(tx.as_mut())
        .await?;

        tx.commit().await?;

        Ok(row.into())
    }

    async fn find_unread(
        &self,
        conversation_id: &str,
        reader_id: i64,
    ) -> Result<Vec<MessageEntity>, error::SystemError> {
        let rows = sqlx::query_as::<_, MessageRow>(
            r#"
            SELECT * FROM messages
            WHERE conversation_id = $1 AND recipient_id = $2 AND read = FALSE
            ORDER BY created_at
            "#,
        )
        .bind(conversation_id)
        .bind(reader_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(MessageEntity::from).collect())
    }

    async fn mark_conversation_read(
        &self,
        conversation_id: &str,
        reader_id: i64,
        reader_slot: ParticipantSlot,
        message_ids: &[Uuid],
        at: chrono::DateTime<chrono::Utc>,
    ) -> Result<Vec<StatusRow>, error::SystemError> {
        let mut tx = self.pool.begin().await?;

        // Same lock order as `append`: conversation row first.
        sqlx::query("SELECT id FROM conversations WHERE id = $1 FOR UPDATE")
            .bind(conversation_id)
            .execute(tx.as_mut())
            .await?;

        // Read implies delivered.
        let changed = sqlx::query_as::<_, StatusRow>(
            r#"
            UPDATE messages
            SET read = TRUE,
                read_at = $3,
                delivered = TRUE,
                delivered_at = COALESCE(delivered_at, $3)
            WHERE id = ANY($1)
            AND recipient_id = $2
            AND read = FALSE
            RETURNING id, conversation_id, sender_id
            "#,
        )
        .bind(message_ids)
        .bind(reader_id)
        .bind(at)
        .fetch_all(tx.as_mut())
        .await?;

        // Messages that arrived after the candidates were read stay counted.
        let unread = reader_slot.unread_column();
        let recount = format!(
            r#"
            UPDATE conversations
            SET {unread} = (
                SELECT COUNT(*)::INT FROM messages
                WHERE conversation_id = $1 AND recipient_id = $2 AND read = FALSE
            ),
            updated_at = NOW()
            WHERE id = $1
            "#
        );
        sqlx::query(&recount).bind(conversation_id).bind(reader_id).execute(tx.as_mut()).await?;

        tx.commit().await?;

        Ok(changed)
    }

    async fn find_undelivered(
        &self,
        recipient_id: i64,
        limit: i64,
    ) -> Result<Vec<MessageEntity>, error::SystemError> {
        // has partial index on (recipient_id, created_at) WHERE delivered = FALSE
        let rows = sqlx::query_as::<_, MessageRow>(
            r#"
            SELECT * FROM messages
            WHERE recipient_id = $1 AND delivered = FALSE
            ORDER BY created_at
            LIMIT $2
            "#,
        )
        .bind(recipient_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(MessageEntity::from).collect())
    }

    async fn mark_delivered(
        &self,
        message_ids: &[Uuid],
        at: chrono::DateTime<chrono::Utc>,
    ) -> Result<Vec<StatusRow>, error::SystemError> {
        let changed = sqlx::query_as::<_, StatusRow>(
            r#"
            UPDATE messages
            SET delivered = TRUE, delivered_at = $2
            WHERE id = ANY($1) AND delivered = FALSE
            RETURNING id, conversation_id, sender_id
            "#,
        )
        .bind(message_ids)
        .bind(at)
        .fetch_all(&self.pool)
        .await?;

        Ok(changed)
    }

    async fn update_body(
        &self,
        id: &Uuid,
        body: &str,
        at: chrono::DateTime<chrono::Utc>,
    ) -> Result<Option<MessageEntity>, error::SystemError> {
        let row = sqlx::query_as::<_, MessageRow>(
            r#"
            UPDATE messages
            SET body = $2, edited = TRUE, edited_at = $3
            WHERE id = $1 AND deleted_for_everyone = FALSE
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(body)
        .bind(at)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(MessageEntity::from))
    }

    async fn tombstone(
        &self,
        id: &Uuid,
        at: chrono::DateTime<chrono::Utc>,
    ) -> Result<Option<MessageEntity>, error::SystemError> {
        let row = sqlx::query_as::<_, MessageRow>(
            r#"
            UPDATE messages
            SET body = NULL,
                kind = 'system',
                attachment_url = NULL,
                attachment_mime = NULL,
                attachment_size = NULL,
                attachment_name = NULL,
                deleted_for_everyone = TRUE,
                deleted_at = $2
            WHERE id = $1 AND deleted_for_everyone = FALSE
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(at)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(MessageEntity::from))
    }

    async fn hide_for(
        &self,
        id: &Uuid,
        viewer_id: i64,
    ) -> Result<Option<MessageEntity>, error::SystemError> {
        let row = sqlx::query_as::<_, MessageRow>(
            r#"
            UPDATE messages
            SET hidden_for = CASE
                WHEN $2 = ANY(hidden_for) THEN hidden_for
                ELSE array_append(hidden_for, $2)
            END
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(viewer_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(MessageEntity::from))
    }
}
