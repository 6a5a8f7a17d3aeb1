/// Delivery Router Actor
///
/// Owns every live connection and the per-user channels (`user:<id>`) they are
/// bound to after authentication. Anonymous connections are registered but
/// never bound, so they only ever receive broadcasts and frames addressed to
/// their own session.
///
/// Channel membership is process-local; a multi-instance deployment needs a
/// shared pub/sub layer in front of this actor.
use actix::prelude::*;
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

use super::events::*;
use super::message::ServerEvent;

pub fn channel_name(user_id: i64) -> String {
    format!("user:{user_id}")
}

#[derive(Default)]
pub struct DeliveryRouter {
    /// session_id -> connection
    sessions: HashMap<Uuid, Recipient<ServerEvent>>,

    /// user_id -> bound session ids (one per device)
    channels: HashMap<i64, HashSet<Uuid>>,

    /// session_id -> user_id, for O(1) unbind
    bound: HashMap<Uuid, i64>,
}

impl DeliveryRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Session actors only forward into an unbounded channel, so delivery
    /// uses `do_send` and ignores the mailbox capacity. A closed session
    /// drops the event; the persisted state it describes is unaffected.
    fn send_to_session(&self, session_id: &Uuid, event: ServerEvent) -> bool {
        let Some(recipient) = self.sessions.get(session_id) else {
            return false;
        };

        if !recipient.connected() {
            tracing::warn!("Session {} is gone, dropped {}", session_id, event.name());
            return false;
        }

        recipient.do_send(event);
        true
    }

    fn send_to_user(&self, user_id: i64, event: &ServerEvent) -> usize {
        let Some(session_ids) = self.channels.get(&user_id) else {
            return 0;
        };

        session_ids
            .iter()
            .filter(|session_id| self.send_to_session(session_id, event.clone()))
            .count()
    }

    fn unbind(&mut self, session_id: &Uuid) {
        let Some(user_id) = self.bound.remove(session_id) else {
            return;
        };

        if let Some(sessions) = self.channels.get_mut(&user_id) {
            sessions.remove(session_id);
            if sessions.is_empty() {
                self.channels.remove(&user_id);
                tracing::debug!("Channel {} closed", channel_name(user_id));
            }
        }
    }
}

impl Actor for DeliveryRouter {
    type Context = Context<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        ctx.set_mailbox_capacity(4096);
        tracing::info!("Delivery router started");
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        tracing::info!("Delivery router stopped");
    }
}

impl Handler<Connect> for DeliveryRouter {
    type Result = ();

    fn handle(&mut self, msg: Connect, _: &mut Context<Self>) {
        tracing::debug!("Session {} registered", msg.id);
        self.sessions.insert(msg.id, msg.addr);
    }
}

impl Handler<Disconnect> for DeliveryRouter {
    type Result = ();

    fn handle(&mut self, msg: Disconnect, _: &mut Context<Self>) {
        // Repeated disconnects of the same id are no-ops.
        self.sessions.remove(&msg.id);
        self.unbind(&msg.id);
        tracing::debug!("Session {} removed", msg.id);
    }
}

impl Handler<Bind> for DeliveryRouter {
    type Result = ();

    fn handle(&mut self, msg: Bind, _: &mut Context<Self>) {
        if !self.sessions.contains_key(&msg.session_id) {
            tracing::warn!("Bind for unknown session {}", msg.session_id);
            return;
        }

        self.unbind(&msg.session_id);
        self.bound.insert(msg.session_id, msg.user_id);
        let sessions = self.channels.entry(msg.user_id).or_default();
        sessions.insert(msg.session_id);

        tracing::info!(
            "Session {} joined {} ({} device(s))",
            msg.session_id,
            channel_name(msg.user_id),
            sessions.len()
        );
    }
}

impl Handler<SendToUser> for DeliveryRouter {
    type Result = ();

    fn handle(&mut self, msg: SendToUser, _: &mut Context<Self>) {
        let sent = self.send_to_user(msg.user_id, &msg.event);
        tracing::debug!("{} -> {} ({} sessions)", msg.event.name(), channel_name(msg.user_id), sent);
    }
}

impl Handler<SendToUsers> for DeliveryRouter {
    type Result = ();

    fn handle(&mut self, msg: SendToUsers, _: &mut Context<Self>) {
        let targets: HashSet<i64> = msg.user_ids.iter().copied().collect();
        let sent: usize = targets.iter().map(|user_id| self.send_to_user(*user_id, &msg.event)).sum();

        tracing::debug!("{} -> {} users ({} sessions)", msg.event.name(), targets.len(), sent);
    }
}

impl Handler<SendToSession> for DeliveryRouter {
    type Result = ();

    fn handle(&mut self, msg: SendToSession, _: &mut Context<Self>) {
        self.send_to_session(&msg.session_id, msg.event);
    }
}

impl Handler<BroadcastToAll> for DeliveryRouter {
    type Result = ();

    fn handle(&mut self, msg: BroadcastToAll, _: &mut Context<Self>) {
        let sent = self
            .sessions
            .keys()
            .filter(|session_id| self.send_to_session(session_id, msg.event.clone()))
            .count();

        tracing::debug!("Broadcast {}: {} sessions", msg.event.name(), sent);
    }
}

impl Handler<ChannelSize> for DeliveryRouter {
    type Result = usize;

    fn handle(&mut self, msg: ChannelSize, _: &mut Context<Self>) -> Self::Result {
        self.channels.get(&msg.user_id).map_or(0, HashSet::len)
    }
}
