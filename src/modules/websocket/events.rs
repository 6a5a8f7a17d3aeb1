/// WebSocket Actor Events
///
/// Messages exchanged between session actors and the [`DeliveryRouter`], plus
/// the [`EventPublisher`] seam the domain services fan out through.
use actix::prelude::*;
use uuid::Uuid;

use super::message::ServerEvent;
use super::server::DeliveryRouter;

/// A new connection registered with the router (still anonymous)
#[derive(Message)]
#[rtype(result = "()")]
pub struct Connect {
    pub id: Uuid,
    pub addr: Recipient<ServerEvent>,
}

/// Connection closed; unbinds it from its user channel
#[derive(Message)]
#[rtype(result = "()")]
pub struct Disconnect {
    pub id: Uuid,
}

/// Joins an authenticated connection to the `user:<id>` channel
#[derive(Message)]
#[rtype(result = "()")]
pub struct Bind {
    pub session_id: Uuid,
    pub user_id: i64,
}

#[derive(Message)]
#[rtype(result = "()")]
pub struct SendToUser {
    pub user_id: i64,
    pub event: ServerEvent,
}

#[derive(Message)]
#[rtype(result = "()")]
pub struct SendToUsers {
    pub user_ids: Vec<i64>,
    pub event: ServerEvent,
}

#[derive(Message)]
#[rtype(result = "()")]
pub struct SendToSession {
    pub session_id: Uuid,
    pub event: ServerEvent,
}

/// Every registered connection, bound or not
#[derive(Message, Clone)]
#[rtype(result = "()")]
pub struct BroadcastToAll {
    pub event: ServerEvent,
}

/// Number of connections bound to a user's channel
#[derive(Message)]
#[rtype(result = "usize")]
pub struct ChannelSize {
    pub user_id: i64,
}

/// Fire-and-forget fan-out. Implementations log delivery failures and never
/// report them to the caller.
pub trait EventPublisher: Send + Sync {
    fn to_user(&self, user_id: i64, event: ServerEvent);

    /// Same event to several users; duplicates are delivered once.
    fn to_users(&self, user_ids: &[i64], event: ServerEvent);

    fn to_session(&self, session_id: Uuid, event: ServerEvent);

    fn broadcast(&self, event: ServerEvent);
}

/// `do_send` queues past the mailbox capacity, so a burst is never dropped.
/// Only a stopped router loses events.
impl EventPublisher for Addr<DeliveryRouter> {
    fn to_user(&self, user_id: i64, event: ServerEvent) {
        if !self.connected() {
            tracing::warn!("Router stopped, dropped {} for user {}", event.name(), user_id);
            return;
        }
        self.do_send(SendToUser { user_id, event });
    }

    fn to_users(&self, user_ids: &[i64], event: ServerEvent) {
        if !self.connected() {
            tracing::warn!("Router stopped, dropped {} for users {:?}", event.name(), user_ids);
            return;
        }
        self.do_send(SendToUsers { user_ids: user_ids.to_vec(), event });
    }

    fn to_session(&self, session_id: Uuid, event: ServerEvent) {
        if !self.connected() {
            tracing::warn!("Router stopped, dropped {} for session {}", event.name(), session_id);
            return;
        }
        self.do_send(SendToSession { session_id, event });
    }

    fn broadcast(&self, event: ServerEvent) {
        if !self.connected() {
            tracing::warn!("Router stopped, dropped broadcast {}", event.name());
            return;
        }
        self.do_send(BroadcastToAll { event });
    }
}
