use actix_web::{
    body::MessageBody,
    dev::{ServiceRequest, ServiceResponse},
    middleware::Next,
    web, Error, HttpMessage, HttpRequest,
};
use std::sync::Arc;

use crate::{api::error, utils::Authenticator};

/// Authenticated caller, inserted into request extensions by [`authentication`].
#[derive(Debug, Clone, Copy)]
pub struct Identity {
    pub user_id: i64,
}

pub fn bearer_token(req: &HttpRequest) -> Option<&str> {
    req.headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
}

pub async fn authentication<B>(
    req: ServiceRequest,
    next: Next<B>,
) -> Result<ServiceResponse<B>, Error>
where
    B: MessageBody + 'static,
{
    let token = match bearer_token(req.request()) {
        Some(t) => t.to_string(),
        None => {
            return Err(error::Error::unauthorized("Token Invalid or Expired").into());
        }
    };

    let authenticator = req
        .app_data::<web::Data<Arc<dyn Authenticator>>>()
        .ok_or(error::Error::InternalServer)?
        .clone();

    let user_id = authenticator
        .verify(&token)
        .map_err(|_| error::Error::access_denied("Token Invalid or Expired"))?;

    req.extensions_mut().insert(Identity { user_id });

    next.call(req).await
}

pub fn get_identity(req: &HttpRequest) -> Result<Identity, error::Error> {
    req.extensions()
        .get::<Identity>()
        .copied()
        .ok_or_else(|| error::Error::unauthorized("Unauthorized"))
}
