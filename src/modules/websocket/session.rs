/// WebSocket Session Actor
///
/// One actor per connection. It owns the optional identity, forwards events
/// from the router to the client through the mpsc bridge in `handler.rs`, and
/// dispatches validated client frames to the conversation service.
///
/// Async operations (DB calls) use `ctx.spawn()` + `into_actor()`.
use actix::prelude::*;
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::api::error;
use crate::modules::conversation::repository::ConversationRepository;
use crate::modules::conversation::repository_pg::ConversationPgRepository;
use crate::modules::conversation::service::ConversationService;
use crate::modules::message::model::OutgoingMessage;
use crate::modules::message::repository::MessageRepository;
use crate::modules::message::repository_pg::MessageRepositoryPg;
use crate::modules::message::schema::MessageKind;
use crate::utils::Authenticator;

use super::events::*;
use super::message::{ClientFrame, ServerEvent};
use super::presence::PresenceService;
use super::server::DeliveryRouter;

/// ConversationService with the production repositories
pub type ConversationSvc = ConversationService<ConversationPgRepository, MessageRepositoryPg>;

pub struct WebSocketSession<C, M>
where
    C: ConversationRepository + Send + Sync + 'static,
    M: MessageRepository + Send + Sync + 'static,
{
    pub id: Uuid,

    /// Set once, either from the upgrade request or an `auth` frame
    pub user_id: Option<i64>,

    router: Addr<DeliveryRouter>,

    /// JSON frames to the client (bridge → handler.rs → WebSocket)
    tx: mpsc::UnboundedSender<String>,

    service: actix_web::web::Data<ConversationService<C, M>>,
    presence: actix_web::web::Data<PresenceService>,
    authenticator: Arc<dyn Authenticator>,
}

impl<C, M> WebSocketSession<C, M>
where
    C: ConversationRepository + Send + Sync + 'static,
    M: MessageRepository + Send + Sync + 'static,
{
    pub fn new(
        handshake_user: Option<i64>,
        router: Addr<DeliveryRouter>,
        tx: mpsc::UnboundedSender<String>,
        service: actix_web::web::Data<ConversationService<C, M>>,
        presence: actix_web::web::Data<PresenceService>,
        authenticator: Arc<dyn Authenticator>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            user_id: handshake_user,
            router,
            tx,
            service,
            presence,
            authenticator,
        }
    }

    fn send_to_client(&self, event: &ServerEvent) {
        match serde_json::to_string(event) {
            Ok(json) => {
                if let Err(e) = self.tx.send(json) {
                    tracing::warn!("Client channel closed (session {}): {}", self.id, e);
                }
            }
            Err(e) => {
                tracing::error!("Failed to serialize {} (session {}): {}", event.name(), self.id, e);
            }
        }
    }

    fn send_error(&self, err: error::SystemError) {
        self.send_to_client(&ServerEvent::from_error(err));
    }

    fn require_auth(&self) -> Option<i64> {
        if self.user_id.is_none() {
            self.send_error(error::SystemError::unauthorized("Authenticate before sending frames"));
            tracing::debug!("Session {} is anonymous, frame rejected", self.id);
        }
        self.user_id
    }

    /// Binds to the user channel, announces presence, then flushes messages
    /// that arrived while the user was offline.
    fn on_authenticated(&mut self, user_id: i64, ctx: &mut Context<Self>) {
        self.user_id = Some(user_id);

        self.router.do_send(Bind { session_id: self.id, user_id });
        self.send_to_client(&ServerEvent::AuthSuccess { user_id });
        self.presence.connect(user_id, self.id);

        let service = self.service.clone();
        ctx.spawn(
            async move {
                if let Err(e) = service.deliver_pending(user_id).await {
                    tracing::error!("Pending delivery failed for user {}: {}", user_id, e);
                }
            }
            .into_actor(self),
        );

        tracing::info!("User {} authenticated on session {}", user_id, self.id);
    }

    fn handle_frame(&mut self, frame: ClientFrame, ctx: &mut Context<Self>) {
        match frame {
            ClientFrame::Auth { token } => self.handle_auth(&token, ctx),

            ClientFrame::SendMessage { recipient_id, body, context_id } => {
                let Some(user_id) = self.require_auth() else {
                    return;
                };
                let outgoing = OutgoingMessage {
                    sender_id: user_id,
                    recipient_id,
                    context_id,
                    body: Some(body),
                    kind: MessageKind::Text,
                    attachment: None,
                };

                let service = self.service.clone();
                ctx.spawn(
                    async move { service.send(outgoing).await.map(|_| ()) }
                        .into_actor(self)
                        .map(|result, act, _| {
                            if let Err(e) = result {
                                tracing::debug!("Send rejected on session {}: {}", act.id, e);
                                act.send_error(e);
                            }
                        }),
                );
            }

            ClientFrame::Typing { to_user_id, conversation_id, typing } => {
                let Some(user_id) = self.require_auth() else {
                    return;
                };
                if let Err(e) = self.service.typing(user_id, to_user_id, &conversation_id, typing) {
                    self.send_error(e);
                }
            }

            ClientFrame::MarkRead { conversation_id } => {
                let Some(user_id) = self.require_auth() else {
                    return;
                };

                let service = self.service.clone();
                ctx.spawn(
                    async move { service.mark_read(&conversation_id, user_id).await }
                        .into_actor(self)
                        .map(|result, act, _| {
                            if let Err(e) = result {
                                act.send_error(e);
                            }
                        }),
                );
            }

            ClientFrame::Ping => self.send_to_client(&ServerEvent::Pong),
        }
    }

    /// Invalid tokens leave the session anonymous; it is never closed for it.
    fn handle_auth(&mut self, token: &str, ctx: &mut Context<Self>) {
        if self.user_id.is_some() {
            self.send_error(error::SystemError::invalid_argument("Session is already authenticated"));
            return;
        }

        match self.authenticator.verify(token) {
            Ok(user_id) => self.on_authenticated(user_id, ctx),
            Err(e) => {
                tracing::debug!("Token rejected on session {}: {}", self.id, e);
                self.send_to_client(&ServerEvent::AuthFailed {
                    reason: "Token invalid or expired".to_string(),
                });
            }
        }
    }
}

impl<C, M> Actor for WebSocketSession<C, M>
where
    C: ConversationRepository + Send + Sync + 'static,
    M: MessageRepository + Send + Sync + 'static,
{
    type Context = Context<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        tracing::debug!("WebSocket session started: {}", self.id);

        self.router.do_send(Connect { id: self.id, addr: ctx.address().recipient() });

        if let Some(user_id) = self.user_id {
            self.on_authenticated(user_id, ctx);
        }
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        tracing::debug!("WebSocket session stopped: {}", self.id);

        self.router.do_send(Disconnect { id: self.id });

        if let Some(user_id) = self.user_id {
            let presence = self.presence.clone();
            let session_id = self.id;
            actix_web::rt::spawn(async move {
                presence.disconnect(user_id, session_id).await;
            });
        }
    }
}

/// Inbound frame, already decoded and validated by the handler
#[derive(Message)]
#[rtype(result = "()")]
pub struct Inbound(pub ClientFrame);

impl<C, M> Handler<Inbound> for WebSocketSession<C, M>
where
    C: ConversationRepository + Send + Sync + 'static,
    M: MessageRepository + Send + Sync + 'static,
{
    type Result = ();

    fn handle(&mut self, msg: Inbound, ctx: &mut Context<Self>) {
        self.handle_frame(msg.0, ctx);
    }
}

/// Frames the handler rejected before dispatch
#[derive(Message)]
#[rtype(result = "()")]
pub struct Rejected(pub error::SystemError);

impl<C, M> Handler<Rejected> for WebSocketSession<C, M>
where
    C: ConversationRepository + Send + Sync + 'static,
    M: MessageRepository + Send + Sync + 'static,
{
    type Result = ();

    fn handle(&mut self, msg: Rejected, _ctx: &mut Context<Self>) {
        self.send_error(msg.0);
    }
}

/// Sent by the handler when the socket closes. The router keeps a recipient
/// for every session, so the actor must be stopped explicitly.
#[derive(Message)]
#[rtype(result = "()")]
pub struct Shutdown;

impl<C, M> Handler<Shutdown> for WebSocketSession<C, M>
where
    C: ConversationRepository + Send + Sync + 'static,
    M: MessageRepository + Send + Sync + 'static,
{
    type Result = ();

    fn handle(&mut self, _: Shutdown, ctx: &mut Context<Self>) {
        ctx.stop();
    }
}

/// Events routed by the DeliveryRouter
impl<C, M> Handler<ServerEvent> for WebSocketSession<C, M>
where
    C: ConversationRepository + Send + Sync + 'static,
    M: MessageRepository + Send + Sync + 'static,
{
    type Result = ();

    fn handle(&mut self, msg: ServerEvent, _ctx: &mut Context<Self>) {
        self.send_to_client(&msg);
    }
}
