use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use deadpool_redis::{redis::RedisError, CreatePoolError, PoolError};
use std::borrow::Cow;

/// Client-visible failure. Every variant carries a stable `kind` string in the
/// response body so clients can branch without parsing messages.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Invalid Argument: {0}")]
    InvalidArgument(Cow<'static, str>),
    #[error("Unauthorized: {0}")]
    Unauthorized(Cow<'static, str>),
    #[error("Access Denied: {0}")]
    AccessDenied(Cow<'static, str>),
    #[error("Blocked: {0}")]
    Blocked(Cow<'static, str>),
    #[error("Not Found: {0}")]
    NotFound(Cow<'static, str>),
    #[error("Invalid Transition: {0}")]
    InvalidTransition(Cow<'static, str>),
    #[error("Conflict: {0}")]
    Conflict(Cow<'static, str>),
    #[error("Internal Server Error")]
    InternalServer,
}

#[derive(serde::Serialize)]
pub struct ErrorBody {
    pub kind: &'static str,
    pub message: Cow<'static, str>,
}

impl Error {
    pub fn invalid_argument(msg: impl Into<Cow<'static, str>>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    pub fn unauthorized(msg: impl Into<Cow<'static, str>>) -> Self {
        Self::Unauthorized(msg.into())
    }

    pub fn access_denied(msg: impl Into<Cow<'static, str>>) -> Self {
        Self::AccessDenied(msg.into())
    }

    pub fn not_found(msg: impl Into<Cow<'static, str>>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Error::InvalidArgument(_) => "invalid_argument",
            Error::Unauthorized(_) => "unauthorized",
            Error::AccessDenied(_) => "access_denied",
            Error::Blocked(_) => "blocked",
            Error::NotFound(_) => "not_found",
            Error::InvalidTransition(_) => "invalid_transition",
            Error::Conflict(_) => "conflict",
            Error::InternalServer => "internal",
        }
    }

    pub fn message(&self) -> Cow<'static, str> {
        match self {
            Error::InvalidArgument(msg)
            | Error::Unauthorized(msg)
            | Error::AccessDenied(msg)
            | Error::Blocked(msg)
            | Error::NotFound(msg)
            | Error::InvalidTransition(msg)
            | Error::Conflict(msg) => msg.clone(),
            Error::InternalServer => "Internal Server Error".into(),
        }
    }
}

impl ResponseError for Error {
    fn status_code(&self) -> StatusCode {
        match *self {
            Error::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            Error::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Error::AccessDenied(_) | Error::Blocked(_) => StatusCode::FORBIDDEN,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::InvalidTransition(_) | Error::Conflict(_) => StatusCode::CONFLICT,
            Error::InternalServer => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code())
            .json(ErrorBody { kind: self.kind(), message: self.message() })
    }
}

#[derive(thiserror::Error, Debug)]
pub enum SystemError {
    // jwt errors
    #[error("JWT Error")]
    JwtError(#[from] jsonwebtoken::errors::Error),
    // sqlx errors
    #[error("Database Error : {0}")]
    DatabaseError(Cow<'static, str>),
    #[error(transparent)]
    MigrateError(#[from] sqlx::migrate::MigrateError),
    // serde errors
    #[error("JSON Serialization/Deserialization Error")]
    JsonError(#[from] serde_json::Error),
    // redis errors
    #[error(transparent)]
    PoolInit(#[from] CreatePoolError),
    #[error("Redis pool error: {0}")]
    PoolGet(#[from] PoolError),
    #[error("Redis error")]
    RedisError(#[from] RedisError),
    // attachment storage
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    // Domain errors
    #[error("Invalid Argument: {0}")]
    InvalidArgument(Cow<'static, str>),
    #[error("Unauthorized: {0}")]
    Unauthorized(Cow<'static, str>),
    #[error("Access Denied: {0}")]
    AccessDenied(Cow<'static, str>),
    #[error("Blocked: {0}")]
    Blocked(Cow<'static, str>),
    #[error("Not Found: {0}")]
    NotFound(Cow<'static, str>),
    #[error("Invalid Transition: {0}")]
    InvalidTransition(Cow<'static, str>),
    #[error("Database Conflict: {0:?}")]
    Conflict(Option<DbErrorMeta>),
    #[error("Internal System Error: {0}")]
    InternalError(Box<dyn std::error::Error + Send + Sync>),
}

fn conflict_message(meta: &Option<DbErrorMeta>) -> Cow<'static, str> {
    let Some(m) = meta else {
        return "Duplicate value".into();
    };

    let Some(constraint) = &m.constraint else {
        return "Duplicate value".into();
    };

    let field = constraint.split('_').next_back().unwrap_or("value");

    let mut chars = field.chars();
    let field = match chars.next() {
        Some(c) => c.to_uppercase().collect::<String>() + chars.as_str(),
        None => "Value".to_string(),
    };

    format!("{field} already exists").into()
}

#[derive(Debug)]
pub struct DbErrorMeta {
    pub code: Option<String>,
    pub constraint: Option<String>,
    pub message: String,
}

impl From<SystemError> for Error {
    fn from(value: SystemError) -> Self {
        match value {
            SystemError::InvalidArgument(msg) => Error::InvalidArgument(msg),
            SystemError::Unauthorized(msg) => Error::Unauthorized(msg),
            SystemError::AccessDenied(msg) => Error::AccessDenied(msg),
            SystemError::Blocked(msg) => Error::Blocked(msg),
            SystemError::NotFound(msg) => Error::NotFound(msg),
            SystemError::InvalidTransition(msg) => Error::InvalidTransition(msg),
            SystemError::Conflict(meta) => Error::Conflict(conflict_message(&meta)),
            _ => {
                log::error!("Internal Server Error: {:?}", value);
                Error::InternalServer
            }
        }
    }
}

impl From<sqlx::Error> for SystemError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            return match db_err.code().as_deref() {
                Some("23505") => SystemError::Conflict(Some(DbErrorMeta {
                    code: db_err.code().map(|s| s.to_string()),
                    constraint: db_err.constraint().map(|s| s.to_string()),
                    message: db_err.message().to_string(),
                })),
                Some("23503") => SystemError::NotFound("Referenced resource not found".into()),
                _ => {
                    log::error!("Unhandled DB error: {:?}", db_err);
                    SystemError::DatabaseError(db_err.message().to_string().into())
                }
            };
        }
        log::error!("{:?}", err);
        SystemError::InternalError(Box::new(err))
    }
}

impl SystemError {
    pub fn invalid_argument(msg: impl Into<Cow<'static, str>>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    pub fn not_found(msg: impl Into<Cow<'static, str>>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn unauthorized(msg: impl Into<Cow<'static, str>>) -> Self {
        Self::Unauthorized(msg.into())
    }

    pub fn access_denied(msg: impl Into<Cow<'static, str>>) -> Self {
        Self::AccessDenied(msg.into())
    }

    pub fn blocked(msg: impl Into<Cow<'static, str>>) -> Self {
        Self::Blocked(msg.into())
    }

    pub fn invalid_transition(msg: impl Into<Cow<'static, str>>) -> Self {
        Self::InvalidTransition(msg.into())
    }
}
