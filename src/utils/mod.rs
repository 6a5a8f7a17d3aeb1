use actix_web::{web, FromRequest};
use futures_util::future::LocalBoxFuture;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::api::error;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum TypeClaims {
    RefreshToken,
    AccessToken,
}

/// Token claims issued by the authentication service. `sub` is the numeric user id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: i64,
    pub iat: u64,
    pub exp: u64,
    pub _type: Option<TypeClaims>,
}

impl Claims {
    #[allow(dead_code)]
    pub fn new(sub: i64, exp: u64) -> Self {
        let now = chrono::Utc::now().timestamp() as u64;
        Claims { sub, iat: now, exp: now + exp, _type: Some(TypeClaims::AccessToken) }
    }

    #[allow(dead_code)]
    pub fn with_type(mut self, _type: TypeClaims) -> Self {
        self._type = Some(_type);
        self
    }

    #[allow(dead_code)]
    pub fn encode(&self, secret: &[u8]) -> Result<String, error::SystemError> {
        let header = Header::new(Algorithm::HS256);
        let token = encode(&header, self, &EncodingKey::from_secret(secret))?;
        Ok(token)
    }

    pub fn decode(token: &str, secret: &[u8]) -> Result<Self, error::SystemError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.validate_nbf = false;
        let token_data = decode::<Self>(token, &DecodingKey::from_secret(secret), &validation)?;
        Ok(token_data.claims)
    }
}

/// Resolves a bearer/opaque token to a verified user id.
pub trait Authenticator: Send + Sync {
    fn verify(&self, token: &str) -> Result<i64, error::SystemError>;
}

#[derive(Clone)]
pub struct JwtAuthenticator {
    secret: Vec<u8>,
}

impl JwtAuthenticator {
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self { secret: secret.into() }
    }
}

impl Authenticator for JwtAuthenticator {
    fn verify(&self, token: &str) -> Result<i64, error::SystemError> {
        let claims = Claims::decode(token, &self.secret)?;
        if claims._type == Some(TypeClaims::RefreshToken) {
            return Err(error::SystemError::unauthorized("Refresh tokens are not accepted"));
        }
        Ok(claims.sub)
    }
}

/// Returns the first candidate token that verifies, in order.
pub fn first_valid_identity<'a, I>(authenticator: &dyn Authenticator, candidates: I) -> Option<i64>
where
    I: IntoIterator<Item = Option<&'a str>>,
{
    candidates
        .into_iter()
        .flatten()
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .find_map(|token| authenticator.verify(token).ok())
}

pub struct ValidatedJson<T>(pub T);

impl<T> FromRequest for ValidatedJson<T>
where
    T: Validate + serde::de::DeserializeOwned + 'static,
{
    type Error = error::Error;
    type Future = LocalBoxFuture<'static, Result<Self, Self::Error>>;

    fn from_request(
        req: &actix_web::HttpRequest,
        payload: &mut actix_web::dev::Payload,
    ) -> Self::Future {
        let fut = web::Json::<T>::from_request(req, payload);

        Box::pin(async move {
            let json =
                fut.await.map_err(|e| error::Error::InvalidArgument(e.to_string().into()))?;
            let model = json.into_inner();
            model.validate().map_err(|e| error::Error::InvalidArgument(e.to_string().into()))?;
            Ok(ValidatedJson(model))
        })
    }
}

pub struct ValidatedQuery<T>(pub T);

impl<T> FromRequest for ValidatedQuery<T>
where
    T: Validate + serde::de::DeserializeOwned + 'static,
{
    type Error = error::Error;
    type Future = LocalBoxFuture<'static, Result<Self, Self::Error>>;

    fn from_request(
        req: &actix_web::HttpRequest,
        payload: &mut actix_web::dev::Payload,
    ) -> Self::Future {
        let fut = web::Query::<T>::from_request(req, payload);

        Box::pin(async move {
            let query =
                fut.await.map_err(|e| error::Error::InvalidArgument(e.to_string().into()))?;
            query.validate().map_err(|e| error::Error::InvalidArgument(e.to_string().into()))?;
            Ok(ValidatedQuery(query.into_inner()))
        })
    }
}
