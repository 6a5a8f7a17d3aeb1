/// Presence
///
/// A user is online while at least one of their connections is open. Online
/// state lives only in this process ([`PresenceTracker`]); `last_seen` is
/// additionally written through to Redis so it survives restarts.
///
/// Redis key schema:
/// - `last_seen:{user_id}` → RFC 3339 timestamp of the last disconnect (no TTL)
use dashmap::{mapref::entry::Entry, DashMap};
use deadpool_redis::redis::{self, AsyncCommands};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

use crate::api::error;

use super::events::EventPublisher;
use super::message::ServerEvent;

const LAST_SEEN_PREFIX: &str = "last_seen:";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceChange {
    /// First connection of the user
    CameOnline,
    /// Connection added or removed, other connections remain
    StillOnline,
    /// Last connection closed
    WentOffline { last_seen_at: chrono::DateTime<chrono::Utc> },
    /// Connection id was already registered or already gone
    Unchanged,
}

/// Connection sets per user. Add/remove go through the map's entry API, so a
/// reconnect racing a disconnect for the same user is serialized on that
/// user's shard.
#[derive(Default)]
pub struct PresenceTracker {
    connections: DashMap<i64, HashSet<Uuid>>,
    last_seen: DashMap<i64, chrono::DateTime<chrono::Utc>>,
}

impl PresenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a connection. `announce` runs with the result while the user's
    /// entry is still locked, so announcements for one user come out in the
    /// order the changes were applied. It must not touch the tracker.
    pub fn on_connect<F>(&self, user_id: i64, connection_id: Uuid, announce: F) -> PresenceChange
    where
        F: FnOnce(PresenceChange),
    {
        let mut connections = self.connections.entry(user_id).or_default();
        let first = connections.is_empty();

        let change = if !connections.insert(connection_id) {
            PresenceChange::Unchanged
        } else if first {
            PresenceChange::CameOnline
        } else {
            PresenceChange::StillOnline
        };

        announce(change);
        change
    }

    /// Removes a connection; `announce` runs under the entry lock as in
    /// [`Self::on_connect`].
    pub fn on_disconnect<F>(&self, user_id: i64, connection_id: Uuid, announce: F) -> PresenceChange
    where
        F: FnOnce(PresenceChange),
    {
        let Entry::Occupied(mut entry) = self.connections.entry(user_id) else {
            announce(PresenceChange::Unchanged);
            return PresenceChange::Unchanged;
        };

        let change = if !entry.get_mut().remove(&connection_id) {
            PresenceChange::Unchanged
        } else if !entry.get().is_empty() {
            PresenceChange::StillOnline
        } else {
            let last_seen_at = chrono::Utc::now();
            self.last_seen.insert(user_id, last_seen_at);
            PresenceChange::WentOffline { last_seen_at }
        };

        announce(change);
        if matches!(change, PresenceChange::WentOffline { .. }) {
            entry.remove();
        }
        change
    }

    pub fn is_online(&self, user_id: i64) -> bool {
        self.connections.get(&user_id).is_some_and(|c| !c.is_empty())
    }

    pub fn connection_count(&self, user_id: i64) -> usize {
        self.connections.get(&user_id).map_or(0, |c| c.len())
    }

    /// Sorted snapshot of online user ids
    pub fn online_users(&self) -> Vec<i64> {
        let mut users: Vec<i64> = self
            .connections
            .iter()
            .filter(|entry| !entry.value().is_empty())
            .map(|entry| *entry.key())
            .collect();
        users.sort_unstable();
        users
    }

    pub fn last_seen(&self, user_id: i64) -> Option<chrono::DateTime<chrono::Utc>> {
        self.last_seen.get(&user_id).map(|at| *at)
    }
}

/// Durable last-seen timestamps.
#[async_trait::async_trait]
pub trait LastSeenStore: Send + Sync {
    async fn record(
        &self,
        user_id: i64,
        at: chrono::DateTime<chrono::Utc>,
    ) -> Result<(), error::SystemError>;

    /// One entry per requested id, in order.
    async fn fetch(
        &self,
        user_ids: &[i64],
    ) -> Result<Vec<Option<chrono::DateTime<chrono::Utc>>>, error::SystemError>;
}

#[derive(Clone)]
pub struct RedisLastSeenStore {
    pool: deadpool_redis::Pool,
}

impl RedisLastSeenStore {
    pub fn new(pool: deadpool_redis::Pool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl LastSeenStore for RedisLastSeenStore {
    async fn record(
        &self,
        user_id: i64,
        at: chrono::DateTime<chrono::Utc>,
    ) -> Result<(), error::SystemError> {
        let mut conn = self.pool.get().await?;
        let key = format!("{LAST_SEEN_PREFIX}{user_id}");
        conn.set::<_, _, ()>(&key, at.to_rfc3339()).await?;
        Ok(())
    }

    async fn fetch(
        &self,
        user_ids: &[i64],
    ) -> Result<Vec<Option<chrono::DateTime<chrono::Utc>>>, error::SystemError> {
        if user_ids.is_empty() {
            return Ok(vec![]);
        }

        let mut conn = self.pool.get().await?;

        // One round-trip for the whole batch
        let mut pipe = redis::pipe();
        for user_id in user_ids {
            pipe.get(format!("{LAST_SEEN_PREFIX}{user_id}"));
        }
        let raw: Vec<Option<String>> = pipe.query_async(&mut *conn).await?;

        Ok(raw
            .into_iter()
            .map(|value| {
                value
                    .and_then(|v| chrono::DateTime::parse_from_rfc3339(&v).ok())
                    .map(|at| at.with_timezone(&chrono::Utc))
            })
            .collect())
    }
}

/// Presence of one user as answered by lookups
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceInfo {
    pub user_id: i64,
    pub online: bool,
    pub last_seen_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// Ties the tracker to fan-out and durable last-seen.
pub struct PresenceService {
    tracker: Arc<PresenceTracker>,
    last_seen_store: Arc<dyn LastSeenStore>,
    publisher: Arc<dyn EventPublisher>,
}

impl PresenceService {
    pub fn new(
        tracker: Arc<PresenceTracker>,
        last_seen_store: Arc<dyn LastSeenStore>,
        publisher: Arc<dyn EventPublisher>,
    ) -> Self {
        Self { tracker, last_seen_store, publisher }
    }

    pub fn is_online(&self, user_id: i64) -> bool {
        self.tracker.is_online(user_id)
    }

    /// Registers an authenticated connection. The first connection of a user
    /// is announced to everyone; the new connection always gets a snapshot.
    pub fn connect(&self, user_id: i64, session_id: Uuid) -> PresenceChange {
        let change = self.tracker.on_connect(user_id, session_id, |change| {
            if change == PresenceChange::CameOnline {
                self.publisher.broadcast(ServerEvent::PresenceUpdate {
                    user_id,
                    online: true,
                    at: chrono::Utc::now(),
                    last_seen_at: None,
                });
            }
        });

        if change == PresenceChange::CameOnline {
            tracing::info!("User {} is online", user_id);
        }

        self.publisher.to_session(
            session_id,
            ServerEvent::PresenceState { online_user_ids: self.tracker.online_users() },
        );

        change
    }

    /// Deregisters a connection and announces the user offline when it was
    /// their last one.
    pub async fn disconnect(&self, user_id: i64, session_id: Uuid) -> PresenceChange {
        let change = self.tracker.on_disconnect(user_id, session_id, |change| {
            if let PresenceChange::WentOffline { last_seen_at } = change {
                self.publisher.broadcast(ServerEvent::PresenceUpdate {
                    user_id,
                    online: false,
                    at: last_seen_at,
                    last_seen_at: Some(last_seen_at),
                });
            }
        });

        if let PresenceChange::WentOffline { last_seen_at } = change {
            tracing::info!("User {} is offline", user_id);
            if let Err(e) = self.last_seen_store.record(user_id, last_seen_at).await {
                tracing::warn!("Failed to persist last seen for user {}: {}", user_id, e);
            }
        }

        change
    }

    /// Tracker first; offline users without an in-process timestamp fall back
    /// to the durable store.
    pub async fn lookup(&self, user_ids: &[i64]) -> Vec<PresenceInfo> {
        let mut infos: Vec<PresenceInfo> = user_ids
            .iter()
            .map(|&user_id| {
                let online = self.tracker.is_online(user_id);
                PresenceInfo {
                    user_id,
                    online,
                    last_seen_at: if online { None } else { self.tracker.last_seen(user_id) },
                }
            })
            .collect();

        let missing: Vec<usize> = infos
            .iter()
            .enumerate()
            .filter(|(_, info)| !info.online && info.last_seen_at.is_none())
            .map(|(i, _)| i)
            .collect();
        if missing.is_empty() {
            return infos;
        }

        let ids: Vec<i64> = missing.iter().map(|&i| infos[i].user_id).collect();
        match self.last_seen_store.fetch(&ids).await {
            Ok(stored) => {
                for (idx, at) in missing.into_iter().zip(stored) {
                    infos[idx].last_seen_at = at;
                }
            }
            Err(e) => tracing::warn!("Failed to load last seen for {:?}: {}", ids, e),
        }

        infos
    }
}
