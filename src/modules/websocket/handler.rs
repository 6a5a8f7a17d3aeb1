/// WebSocket HTTP Handler
///
/// Upgrades the request and pumps frames in both directions:
/// - Inbound:  Client → WebSocket → `ClientFrame::parse` → Session Actor
/// - Outbound: Router → Session Actor → mpsc channel → WebSocket → Client
use actix::{Actor, Addr};
use actix_web::{web, Error, HttpRequest, HttpResponse};
use actix_ws::Message;
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use validator::Validate;

use super::message::ClientFrame;
use super::presence::{PresenceInfo, PresenceService};
use super::server::DeliveryRouter;
use super::session::{ConversationSvc, Inbound, Rejected, Shutdown, WebSocketSession};
use crate::api::{error, success};
use crate::middlewares::bearer_token;
use crate::utils::{first_valid_identity, Authenticator, ValidatedQuery};

#[derive(Debug, Default, Deserialize)]
pub struct WsQuery {
    pub token: Option<String>,
}

/// Endpoint: GET /ws
///
/// A missing or invalid token never rejects the upgrade; the connection
/// proceeds anonymously and may still send an `auth` frame.
pub async fn websocket_handler(
    req: HttpRequest,
    stream: web::Payload,
    router: web::Data<Addr<DeliveryRouter>>,
    service: web::Data<ConversationSvc>,
    presence: web::Data<PresenceService>,
    authenticator: web::Data<Arc<dyn Authenticator>>,
) -> Result<HttpResponse, Error> {
    tracing::debug!("WebSocket upgrade request from {:?}", req.peer_addr());

    let query = web::Query::<WsQuery>::from_query(req.query_string())
        .map(web::Query::into_inner)
        .unwrap_or_default();
    let handshake_user = first_valid_identity(
        authenticator.get_ref().as_ref(),
        [query.token.as_deref(), bearer_token(&req)],
    );

    let (response, mut ws_session, mut msg_stream) = actix_ws::handle(&req, stream)?;

    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    let addr = WebSocketSession::new(
        handshake_user,
        router.get_ref().clone(),
        tx,
        service,
        presence,
        authenticator.get_ref().clone(),
    )
    .start();

    actix_web::rt::spawn(async move {
        loop {
            tokio::select! {
                // === INBOUND: Client → Server ===
                msg = msg_stream.recv() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            match ClientFrame::parse(&text) {
                                Ok(frame) => addr.do_send(Inbound(frame)),
                                Err(e) => {
                                    tracing::warn!(
                                        "Rejected client frame: {} - raw: {}",
                                        e,
                                        text.chars().take(100).collect::<String>()
                                    );
                                    addr.do_send(Rejected(e));
                                }
                            }
                        }

                        Some(Ok(Message::Ping(data))) => {
                            if let Err(e) = ws_session.pong(&data).await {
                                tracing::error!("Failed to send pong: {}", e);
                                break;
                            }
                        }

                        Some(Ok(Message::Pong(_))) => {}

                        Some(Ok(Message::Close(reason))) => {
                            tracing::info!("WebSocket close frame: {:?}", reason);
                            break;
                        }

                        Some(Ok(Message::Binary(_))) => {
                            tracing::warn!("Binary frames are not supported");
                        }

                        Some(Ok(Message::Continuation(_) | Message::Nop)) => {}

                        Some(Err(e)) => {
                            tracing::error!("WebSocket protocol error: {}", e);
                            break;
                        }

                        // client went away
                        None => break,
                    }
                }

                // === OUTBOUND: Server → Client ===
                Some(json) = rx.recv() => {
                    if ws_session.text(json).await.is_err() {
                        tracing::warn!("Failed to write to WebSocket client");
                        break;
                    }
                }
            }
        }

        // Stopping the actor runs its cleanup (unbind, presence disconnect).
        addr.do_send(Shutdown);
        let _ = ws_session.close(None).await;
        tracing::debug!("WebSocket message loop finished");
    });

    Ok(response)
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct PresenceQuery {
    /// Comma separated user ids
    #[validate(length(min = 1, max = 1000))]
    pub user_ids: String,
}

/// Endpoint: GET /api/presence?userIds=1,2,3
pub async fn presence_handler(
    ValidatedQuery(query): ValidatedQuery<PresenceQuery>,
    presence: web::Data<PresenceService>,
) -> Result<success::Success<Vec<PresenceInfo>>, error::Error> {
    let user_ids = query
        .user_ids
        .split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(|id| id.parse::<i64>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| error::Error::invalid_argument("userIds must be numeric"))?;

    if user_ids.len() > 100 {
        return Err(error::Error::invalid_argument("At most 100 user ids per lookup"));
    }

    let infos = presence.lookup(&user_ids).await;
    Ok(success::Success::ok(infos))
}
