//! Request admission gate.
//!
//! [`admission`] is an axum middleware run in front of every ledger route.
//! It rejects new requests with `503 Service Unavailable` and
//! `Connection: close` once the server is draining. Admitted requests are
//! registered with the [`InFlightTracker`](super::InFlightTracker) and the
//! registration travels with the response body, so it is released when the
//! body has been fully written, or dropped on client disconnect.

use super::{InFlightGuard, Lifecycle};
use crate::server::telemetry::{increment_requests_admitted, increment_requests_rejected};
use axum::{
    body::Body,
    extract::{Request, State},
    http::{HeaderValue, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use core::{
    pin::Pin,
    task::{Context, Poll},
};
use http_body::{Body as HttpBody, Frame, SizeHint};
use ledger_gateway_core::Error;
use pin_project_lite::pin_project;
use std::sync::Arc;

pub async fn admission(
    State(lifecycle): State<Arc<Lifecycle>>,
    request: Request,
    next: Next,
) -> Response {
    let Some(guard) = lifecycle.try_admit() else {
        increment_requests_rejected();
        tracing::debug!(
            method = %request.method(),
            path = %request.uri().path(),
            "Rejecting request while draining"
        );
        return Error::ServiceShutdown.into_response();
    };
    increment_requests_admitted();

    let mut response = next.run(request).await;
    if !lifecycle.admit() {
        // Let keep-alive clients reconnect elsewhere while we drain.
        response
            .headers_mut()
            .insert(header::CONNECTION, HeaderValue::from_static("close"));
    }
    response.map(|body| Body::new(TrackedBody::new(body, guard)))
}

pin_project! {
    /// Response body that holds an in-flight registration until the last
    /// frame has been polled or the body is dropped.
    pub struct TrackedBody {
        #[pin]
        inner: Body,
        guard: Option<InFlightGuard>,
    }
}

impl TrackedBody {
    pub fn new(inner: Body, guard: InFlightGuard) -> Self {
        Self {
            inner,
            guard: Some(guard),
        }
    }
}

impl HttpBody for TrackedBody {
    type Data = Bytes;
    type Error = axum::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.project();
        let polled = this.inner.poll_frame(cx);
        if matches!(polled, Poll::Ready(None | Some(Err(_)))) {
            this.guard.take();
        }
        polled
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Router, body::to_bytes, http::StatusCode, middleware, routing::get};
    use tower::ServiceExt;

    fn app(lifecycle: Arc<Lifecycle>) -> Router {
        Router::new()
            .route("/work", get(|| async { "done" }))
            .layer(middleware::from_fn_with_state(lifecycle, admission))
    }

    fn get_work() -> Request {
        Request::builder().uri("/work").body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn admitted_request_is_released_after_body_is_read() {
        let lifecycle = Arc::new(Lifecycle::new());
        let response = app(Arc::clone(&lifecycle))
            .oneshot(get_work())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(lifecycle.tracker().len(), 1, "body not yet written");

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"done");
        assert!(lifecycle.tracker().is_empty());
    }

    #[tokio::test]
    async fn dropped_response_releases_registration() {
        let lifecycle = Arc::new(Lifecycle::new());
        let response = app(Arc::clone(&lifecycle))
            .oneshot(get_work())
            .await
            .unwrap();
        drop(response);
        assert!(lifecycle.tracker().is_empty());
    }

    #[tokio::test]
    async fn draining_rejects_without_registering() {
        let lifecycle = Arc::new(Lifecycle::new());
        assert!(lifecycle.begin_draining());

        let response = app(Arc::clone(&lifecycle))
            .oneshot(get_work())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            response.headers().get(header::CONNECTION),
            Some(&HeaderValue::from_static("close"))
        );
        assert!(lifecycle.tracker().is_empty());
    }
}
