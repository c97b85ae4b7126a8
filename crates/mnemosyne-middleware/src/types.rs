//! Request, response and body types used throughout the pipeline.

use bytes::Bytes;
use http::header::{HeaderValue, CONTENT_TYPE};
use http::StatusCode;
use http_body_util::{BodyExt, Empty, Full};
use mnemosyne_core::IdempotencyError;

/// Error type carried by pipeline bodies.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// The body type flowing through the pipeline.
///
/// Boxed so that buffered request bodies, replayed records and streaming
/// upstream responses share one type. Not `Sync`, which lets body decorators
/// hold in-flight store futures.
pub type Body = http_body_util::combinators::UnsyncBoxBody<Bytes, BoxError>;

/// The HTTP request type used in the middleware pipeline.
pub type Request = http::Request<Body>;

/// The HTTP response type used in the middleware pipeline.
pub type Response = http::Response<Body>;

/// Creates a body holding `bytes` in one frame.
pub fn full(bytes: impl Into<Bytes>) -> Body {
    Full::new(bytes.into())
        .map_err(|never| match never {})
        .boxed_unsync()
}

/// Creates an empty body.
pub fn empty() -> Body {
    Empty::<Bytes>::new()
        .map_err(|never| match never {})
        .boxed_unsync()
}

/// Extension trait for building error responses.
pub trait ResponseExt {
    /// Creates a JSON error response with body `{"error":{"code","message"}}`.
    fn json_error(status: StatusCode, code: &str, message: &str) -> Response;

    /// Creates the JSON error response for a gate rejection.
    fn from_idempotency_error(error: &IdempotencyError) -> Response;
}

impl ResponseExt for Response {
    fn json_error(status: StatusCode, code: &str, message: &str) -> Response {
        let body = serde_json::json!({
            "error": {
                "code": code,
                "message": message
            }
        });

        let mut response = http::Response::new(full(body.to_string()));
        *response.status_mut() = status;
        response
            .headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        response
    }

    fn from_idempotency_error(error: &IdempotencyError) -> Response {
        let envelope = error.to_envelope();
        let mut response = Self::json_error(
            error.status_code(),
            &envelope.error.code,
            &envelope.error.message,
        );
        if let IdempotencyError::MethodNotAllowed { .. } = error {
            response
                .headers_mut()
                .insert(http::header::ALLOW, HeaderValue::from_static("POST"));
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mnemosyne_core::Mismatch;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_json_error_response() {
        let response = Response::json_error(
            StatusCode::CONFLICT,
            "IDEMPOTENCY_KEY_IN_PROGRESS",
            "still running",
        );
        assert_eq!(response.status(), StatusCode::CONFLICT);
        assert_eq!(
            response.headers().get(CONTENT_TYPE).unwrap(),
            "application/json"
        );

        let json = body_json(response).await;
        assert_eq!(json["error"]["code"], "IDEMPOTENCY_KEY_IN_PROGRESS");
        assert_eq!(json["error"]["message"], "still running");
    }

    #[tokio::test]
    async fn test_from_idempotency_error() {
        let error = IdempotencyError::key_reused("k1", Mismatch::Fingerprint);
        let response = Response::from_idempotency_error(&error);
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert!(response.headers().get(http::header::ALLOW).is_none());

        let json = body_json(response).await;
        assert_eq!(json["error"]["code"], "IDEMPOTENCY_KEY_REUSED");
    }

    #[test]
    fn test_method_not_allowed_sets_allow() {
        let error = IdempotencyError::method_not_allowed("GET");
        let response = Response::from_idempotency_error(&error);
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(response.headers().get(http::header::ALLOW).unwrap(), "POST");
    }

    #[tokio::test]
    async fn test_full_and_empty_bodies() {
        let bytes = full("abc").collect().await.unwrap().to_bytes();
        assert_eq!(&bytes[..], b"abc");

        let bytes = empty().collect().await.unwrap().to_bytes();
        assert!(bytes.is_empty());
    }
}
