use actix_web::{http::StatusCode, HttpResponse};
use std::borrow::Cow;

/// Body of every successful JSON response: `{"data": ..., "message": ...}`.
#[derive(Debug, serde::Serialize)]
struct Envelope<T> {
    data: T,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<Cow<'static, str>>,
}

/// A successful reply. `no_content` replies carry no body at all.
pub struct Success<T: serde::Serialize> {
    status: StatusCode,
    data: Option<T>,
    message: Option<Cow<'static, str>>,
}

impl<T: serde::Serialize> Success<T> {
    fn with_status(status: StatusCode, data: T) -> Self {
        Self { status, data: Some(data), message: None }
    }

    pub fn ok(data: T) -> Self {
        Self::with_status(StatusCode::OK, data)
    }

    pub fn created(data: T) -> Self {
        Self::with_status(StatusCode::CREATED, data)
    }

    pub fn message<M>(mut self, msg: M) -> Self
    where
        M: Into<Cow<'static, str>>,
    {
        self.message = Some(msg.into());
        self
    }
}

impl Success<()> {
    pub fn no_content() -> Self {
        Self { status: StatusCode::NO_CONTENT, data: None, message: None }
    }
}

impl<T: serde::Serialize> actix_web::Responder for Success<T> {
    type Body = actix_web::body::BoxBody;

    fn respond_to(self, _req: &actix_web::HttpRequest) -> HttpResponse<Self::Body> {
        let mut response = HttpResponse::build(self.status);

        match self.data {
            Some(data) => response.json(Envelope { data, message: self.message }),
            None => response.finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{body::to_bytes, test::TestRequest, Responder};

    async fn render<T: serde::Serialize>(success: Success<T>) -> (StatusCode, Vec<u8>) {
        let req = TestRequest::default().to_http_request();
        let response = success.respond_to(&req);
        let status = response.status();
        let bytes = to_bytes(response.into_body()).await.unwrap_or_default();
        (status, bytes.to_vec())
    }

    #[actix_web::test]
    async fn test_envelope_shape_per_constructor() {
        let (status, body) = render(Success::ok(vec![1, 2])).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, br#"{"data":[1,2]}"#);

        let (status, body) = render(Success::created("1_2").message("Conversation started")).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body, br#"{"data":"1_2","message":"Conversation started"}"#);

        let (status, body) = render(Success::no_content()).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert!(body.is_empty());
    }
}
