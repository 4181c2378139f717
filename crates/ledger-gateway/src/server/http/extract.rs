//! Extractors whose rejections use the gateway's error envelope.
//!
//! `axum::Json` and `axum::extract::Query` reject with plain-text bodies;
//! these wrappers turn every rejection into a `400` [`Error::Validation`].

use axum::extract::{FromRequest, FromRequestParts};
use ledger_gateway_core::Error;

#[derive(FromRequest, Debug)]
#[from_request(via(axum::Json), rejection(Error))]
pub struct ApiJson<T>(pub T);

#[derive(FromRequestParts, Debug)]
#[from_request(via(axum::extract::Query), rejection(Error))]
pub struct ApiQuery<T>(pub T);

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        Router,
        body::{Body, to_bytes},
        http::{Request, StatusCode, header},
        routing::{get, post},
    };
    use ledger_gateway_core::ErrorBody;
    use serde::Deserialize;
    use tower::ServiceExt;

    #[derive(Deserialize)]
    struct Payload {
        #[allow(dead_code)]
        value: u32,
    }

    fn app() -> Router {
        Router::new()
            .route("/json", post(|ApiJson(_): ApiJson<Payload>| async { "ok" }))
            .route("/query", get(|ApiQuery(_): ApiQuery<Payload>| async { "ok" }))
    }

    async fn envelope(request: Request<Body>) -> (StatusCode, ErrorBody) {
        let response = app().oneshot(request).await.unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn malformed_json_is_a_validation_envelope() {
        let request = Request::post("/json")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let (status, body) = envelope(request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body.error);
    }

    #[tokio::test]
    async fn missing_content_type_is_a_validation_envelope() {
        let request = Request::post("/json")
            .body(Body::from(r#"{"value":1}"#))
            .unwrap();
        let (status, body) = envelope(request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body.message.contains("Content-Type"));
    }

    #[tokio::test]
    async fn bad_query_is_a_validation_envelope() {
        let request = Request::get("/query?value=many").body(Body::empty()).unwrap();
        let (status, body) = envelope(request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body.error);
    }
}
