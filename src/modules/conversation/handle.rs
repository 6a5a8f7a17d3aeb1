use actix_web::{delete, get, post, web, HttpRequest};

use crate::{
    api::{error, success},
    middlewares::get_identity,
    modules::{
        conversation::model::{
            BlockResponse, ConversationView, MarkReadResponse, MuteResponse,
            StartConversationBody, StartConversationResponse,
        },
        message::model::{MessagePage, MessagePageQuery},
        websocket::session::ConversationSvc,
    },
    utils::{ValidatedJson, ValidatedQuery},
};

#[get("")]
pub async fn get_conversations(
    conversation_svc: web::Data<ConversationSvc>,
    req: HttpRequest,
) -> Result<success::Success<Vec<ConversationView>>, error::Error> {
    let user_id = get_identity(&req)?.user_id;

    let conversations = conversation_svc.list_conversations(user_id).await?;

    Ok(success::Success::ok(conversations).message("Successfully retrieved conversations"))
}

#[post("")]
pub async fn start_conversation(
    conversation_svc: web::Data<ConversationSvc>,
    ValidatedJson(body): ValidatedJson<StartConversationBody>,
    req: HttpRequest,
) -> Result<success::Success<StartConversationResponse>, error::Error> {
    let user_id = get_identity(&req)?.user_id;

    let conversation =
        conversation_svc.start_conversation(user_id, body.recipient_id, body.context_id).await?;

    Ok(success::Success::created(StartConversationResponse {
        conversation_id: conversation.id,
    }))
}

#[get("/{conversation_id}/messages")]
pub async fn get_messages(
    conversation_svc: web::Data<ConversationSvc>,
    conversation_id: web::Path<String>,
    ValidatedQuery(query): ValidatedQuery<MessagePageQuery>,
    req: HttpRequest,
) -> Result<success::Success<MessagePage>, error::Error> {
    let user_id = get_identity(&req)?.user_id;

    let page = conversation_svc.open_conversation(&conversation_id, user_id, query).await?;

    Ok(success::Success::ok(page).message("Successfully retrieved messages"))
}

#[post("/{conversation_id}/read")]
pub async fn mark_read(
    conversation_svc: web::Data<ConversationSvc>,
    conversation_id: web::Path<String>,
    req: HttpRequest,
) -> Result<success::Success<MarkReadResponse>, error::Error> {
    let user_id = get_identity(&req)?.user_id;

    let marked = conversation_svc.mark_read(&conversation_id, user_id).await?;

    Ok(success::Success::ok(MarkReadResponse { marked }))
}

#[post("/{conversation_id}/mute")]
pub async fn toggle_mute(
    conversation_svc: web::Data<ConversationSvc>,
    conversation_id: web::Path<String>,
    req: HttpRequest,
) -> Result<success::Success<MuteResponse>, error::Error> {
    let user_id = get_identity(&req)?.user_id;

    let muted = conversation_svc.toggle_mute(&conversation_id, user_id).await?;

    Ok(success::Success::ok(MuteResponse { muted }))
}

#[post("/{conversation_id}/block")]
pub async fn toggle_block(
    conversation_svc: web::Data<ConversationSvc>,
    conversation_id: web::Path<String>,
    req: HttpRequest,
) -> Result<success::Success<BlockResponse>, error::Error> {
    let user_id = get_identity(&req)?.user_id;

    let blocked = conversation_svc.toggle_block(&conversation_id, user_id).await?;

    Ok(success::Success::ok(BlockResponse { blocked }))
}

#[delete("/{conversation_id}")]
pub async fn archive_conversation(
    conversation_svc: web::Data<ConversationSvc>,
    conversation_id: web::Path<String>,
    req: HttpRequest,
) -> Result<success::Success<()>, error::Error> {
    let user_id = get_identity(&req)?.user_id;

    conversation_svc.archive(&conversation_id, user_id).await?;

    Ok(success::Success::no_content())
}
