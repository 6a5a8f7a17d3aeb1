//! Best-effort push notifications for recipients with no live connection.
//!
//! Notices are queued on a Redis list; a separate worker owns the actual
//! device delivery. Nothing here feeds back into message state.
use deadpool_redis::redis::AsyncCommands;
use serde::Serialize;
use uuid::Uuid;

use crate::api::error;

pub const PUSH_QUEUE_KEY: &str = "push:queue";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PushPayload {
    pub conversation_id: String,
    pub message_id: Uuid,
    pub sender_id: i64,
    pub preview: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PushNotice {
    pub user_id: i64,
    pub payload: PushPayload,
}

#[async_trait::async_trait]
pub trait PushDelivery: Send + Sync {
    async fn enqueue(&self, notice: &PushNotice) -> Result<(), error::SystemError>;
}

#[derive(Clone)]
pub struct RedisPushQueue {
    pool: deadpool_redis::Pool,
}

impl RedisPushQueue {
    pub fn new(pool: deadpool_redis::Pool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl PushDelivery for RedisPushQueue {
    async fn enqueue(&self, notice: &PushNotice) -> Result<(), error::SystemError> {
        let body = serde_json::to_string(notice)?;
        let mut conn = self.pool.get().await?;
        conn.lpush::<_, _, ()>(PUSH_QUEUE_KEY, body).await?;
        Ok(())
    }
}
