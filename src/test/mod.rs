//! Test doubles for the fan-out, last-seen and push seams.
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Mutex,
};
use uuid::Uuid;

use crate::{
    api::error,
    modules::{
        push::{PushDelivery, PushNotice},
        websocket::{events::EventPublisher, message::ServerEvent, presence::LastSeenStore},
    },
};

mod scenarios;

#[derive(Debug, Clone, PartialEq)]
pub enum Published {
    User(i64, ServerEvent),
    Session(Uuid, ServerEvent),
    Broadcast(ServerEvent),
}

/// Records every publish; `to_users` is expanded to one entry per distinct user.
#[derive(Default)]
pub struct RecordingPublisher {
    published: Mutex<Vec<Published>>,
}

impl RecordingPublisher {
    fn push(&self, entry: Published) {
        if let Ok(mut published) = self.published.lock() {
            published.push(entry);
        }
    }

    fn snapshot(&self) -> Vec<Published> {
        self.published.lock().map(|p| p.clone()).unwrap_or_default()
    }

    pub fn clear(&self) {
        if let Ok(mut published) = self.published.lock() {
            published.clear();
        }
    }

    pub fn user_events(&self, user_id: i64) -> Vec<ServerEvent> {
        self.snapshot()
            .into_iter()
            .filter_map(|p| match p {
                Published::User(id, event) if id == user_id => Some(event),
                _ => None,
            })
            .collect()
    }

    pub fn session_events(&self, session_id: Uuid) -> Vec<ServerEvent> {
        self.snapshot()
            .into_iter()
            .filter_map(|p| match p {
                Published::Session(id, event) if id == session_id => Some(event),
                _ => None,
            })
            .collect()
    }

    pub fn broadcasts(&self) -> Vec<ServerEvent> {
        self.snapshot()
            .into_iter()
            .filter_map(|p| match p {
                Published::Broadcast(event) => Some(event),
                _ => None,
            })
            .collect()
    }
}

impl EventPublisher for RecordingPublisher {
    fn to_user(&self, user_id: i64, event: ServerEvent) {
        self.push(Published::User(user_id, event));
    }

    fn to_users(&self, user_ids: &[i64], event: ServerEvent) {
        let mut seen = Vec::with_capacity(user_ids.len());
        for &user_id in user_ids {
            if !seen.contains(&user_id) {
                seen.push(user_id);
                self.push(Published::User(user_id, event.clone()));
            }
        }
    }

    fn to_session(&self, session_id: Uuid, event: ServerEvent) {
        self.push(Published::Session(session_id, event));
    }

    fn broadcast(&self, event: ServerEvent) {
        self.push(Published::Broadcast(event));
    }
}

#[derive(Default)]
pub struct RecordingLastSeen {
    recorded: Mutex<Vec<(i64, chrono::DateTime<chrono::Utc>)>>,
}

impl RecordingLastSeen {
    pub fn recorded(&self) -> Vec<(i64, chrono::DateTime<chrono::Utc>)> {
        self.recorded.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn seed(&self, user_id: i64, at: chrono::DateTime<chrono::Utc>) {
        if let Ok(mut recorded) = self.recorded.lock() {
            recorded.push((user_id, at));
        }
    }
}

#[async_trait::async_trait]
impl LastSeenStore for RecordingLastSeen {
    async fn record(
        &self,
        user_id: i64,
        at: chrono::DateTime<chrono::Utc>,
    ) -> Result<(), error::SystemError> {
        self.seed(user_id, at);
        Ok(())
    }

    async fn fetch(
        &self,
        user_ids: &[i64],
    ) -> Result<Vec<Option<chrono::DateTime<chrono::Utc>>>, error::SystemError> {
        let recorded = self.recorded();
        Ok(user_ids
            .iter()
            .map(|id| recorded.iter().rev().find(|(user, _)| user == id).map(|(_, at)| *at))
            .collect())
    }
}

#[derive(Default)]
pub struct RecordingPush {
    notices: Mutex<Vec<PushNotice>>,
    failing: AtomicBool,
}

impl RecordingPush {
    pub fn notices(&self) -> Vec<PushNotice> {
        self.notices.lock().map(|n| n.clone()).unwrap_or_default()
    }

    /// Makes every following enqueue fail.
    pub fn fail(&self) {
        self.failing.store(true, Ordering::SeqCst);
    }
}

#[async_trait::async_trait]
impl PushDelivery for RecordingPush {
    async fn enqueue(&self, notice: &PushNotice) -> Result<(), error::SystemError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(error::SystemError::InternalError("push queue unavailable".into()));
        }
        if let Ok(mut notices) = self.notices.lock() {
            notices.push(notice.clone());
        }
        Ok(())
    }
}
