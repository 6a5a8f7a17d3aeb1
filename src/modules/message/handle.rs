use actix_multipart::Multipart;
use actix_web::{delete, patch, post, web, HttpRequest};
use futures_util::TryStreamExt;
use std::sync::Arc;
use uuid::Uuid;

use crate::{
    api::{error, success},
    middlewares::get_identity,
    modules::{
        attachment::{AttachmentStorage, UploadedFile},
        message::{
            model::{
                DeleteMessageQuery, DeleteMessageResponse, DeleteScope, EditMessageBody,
                MessageView, OutgoingMessage, SendMessageBody,
            },
            schema::MessageKind,
        },
        websocket::session::ConversationSvc,
    },
    utils::ValidatedJson,
};

#[post("")]
pub async fn send_message(
    conversation_svc: web::Data<ConversationSvc>,
    ValidatedJson(body): ValidatedJson<SendMessageBody>,
    req: HttpRequest,
) -> Result<success::Success<MessageView>, error::Error> {
    let user_id = get_identity(&req)?.user_id;

    let message = conversation_svc
        .send(OutgoingMessage {
            sender_id: user_id,
            recipient_id: body.recipient_id,
            context_id: body.context_id,
            body: body.body,
            kind: body.kind.unwrap_or(MessageKind::Text),
            attachment: body.attachment,
        })
        .await?;

    Ok(success::Success::created(MessageView::from(&message)))
}

/// Multipart form: `recipientId`, optional `contextId`, optional `caption`, and `file`.
#[post("/attachments")]
pub async fn send_attachment(
    conversation_svc: web::Data<ConversationSvc>,
    storage: web::Data<Arc<dyn AttachmentStorage>>,
    mut payload: Multipart,
    req: HttpRequest,
) -> Result<success::Success<MessageView>, error::Error> {
    let user_id = get_identity(&req)?.user_id;
    let max_size = storage.max_file_size();

    let mut recipient_id: Option<i64> = None;
    let mut context_id: Option<i64> = None;
    let mut caption: Option<String> = None;
    let mut file: Option<UploadedFile> = None;

    while let Some(mut field) = payload
        .try_next()
        .await
        .map_err(|e| error::Error::invalid_argument(format!("Malformed multipart body: {e}")))?
    {
        let name = field.name().unwrap_or_default().to_string();

        let mut bytes = Vec::new();
        while let Some(chunk) = field
            .try_next()
            .await
            .map_err(|e| error::Error::invalid_argument(format!("Malformed multipart body: {e}")))?
        {
            if bytes.len() + chunk.len() > max_size {
                return Err(error::Error::invalid_argument(format!(
                    "File size exceeds maximum allowed size of {max_size} bytes"
                )));
            }
            bytes.extend_from_slice(&chunk);
        }

        match name.as_str() {
            "recipientId" => recipient_id = Some(parse_id_field(&bytes, "recipientId")?),
            "contextId" => context_id = Some(parse_id_field(&bytes, "contextId")?),
            "caption" => caption = Some(String::from_utf8_lossy(&bytes).into_owned()),
            "file" => {
                let filename = field
                    .content_disposition()
                    .and_then(|cd| cd.get_filename())
                    .ok_or_else(|| error::Error::invalid_argument("Missing filename"))?
                    .to_string();
                let declared_mime = field.content_type().map(|m| m.to_string());
                file = Some(UploadedFile { original_name: filename, declared_mime, bytes });
            }
            other => tracing::debug!("Ignoring multipart field '{}'", other),
        }
    }

    let recipient_id =
        recipient_id.ok_or_else(|| error::Error::invalid_argument("recipientId is required"))?;
    let file = file.ok_or_else(|| error::Error::invalid_argument("No file found in request"))?;

    let message = conversation_svc
        .send_upload(
            storage.get_ref().as_ref(),
            OutgoingMessage {
                sender_id: user_id,
                recipient_id,
                context_id,
                body: caption.filter(|c| !c.trim().is_empty()),
                kind: MessageKind::File,
                attachment: None,
            },
            file,
        )
        .await?;

    Ok(success::Success::created(MessageView::from(&message)))
}

fn parse_id_field(bytes: &[u8], field: &'static str) -> Result<i64, error::Error> {
    std::str::from_utf8(bytes)
        .ok()
        .and_then(|raw| raw.trim().parse::<i64>().ok())
        .filter(|id| *id > 0)
        .ok_or_else(|| error::Error::invalid_argument(format!("{field} must be a positive integer")))
}

#[patch("/{message_id}")]
pub async fn edit_message(
    conversation_svc: web::Data<ConversationSvc>,
    message_id: web::Path<Uuid>,
    ValidatedJson(body): ValidatedJson<EditMessageBody>,
    req: HttpRequest,
) -> Result<success::Success<MessageView>, error::Error> {
    let user_id = get_identity(&req)?.user_id;

    let message = conversation_svc.edit(&message_id, user_id, &body.body).await?;

    Ok(success::Success::ok(MessageView::from(&message)).message("Message updated"))
}

/// `?scope=me` (default) hides the message for the caller only; `?scope=all`
/// replaces it with a tombstone for both participants.
#[delete("/{message_id}")]
pub async fn delete_message(
    conversation_svc: web::Data<ConversationSvc>,
    message_id: web::Path<Uuid>,
    query: web::Query<DeleteMessageQuery>,
    req: HttpRequest,
) -> Result<success::Success<DeleteMessageResponse>, error::Error> {
    let user_id = get_identity(&req)?.user_id;
    let scope = query.scope.as_deref().unwrap_or_default().parse::<DeleteScope>()?;

    let deleted = conversation_svc.delete(&message_id, user_id, scope).await?;

    Ok(success::Success::ok(deleted))
}
