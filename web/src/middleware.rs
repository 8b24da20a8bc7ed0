//! Axum middleware for request tracking.
//!
//! The correlation-id layer:
//!
//! 1. **Extracts** the id from `X-Correlation-ID` (or generates a UUID v4)
//! 2. **Stores** it in request extensions for the `CorrelationId` extractor
//! 3. **Runs** the request inside a `payment_http` span carrying the id
//! 4. **Echoes** the id in the response `X-Correlation-ID` header and counts
//!    the response by status class
//!
//! # Example
//!
//! ```ignore
//! use axum::Router;
//! use payment_saga_web::middleware::correlation_id_layer;
//!
//! let app = Router::new()
//!     .route("/payments/webhook", post(webhook))
//!     .layer(correlation_id_layer());
//! ```

use axum::{extract::Request, http::HeaderValue, response::Response};
use std::task::{Context, Poll};
use tower::{Layer, Service};
use tracing::Instrument;
use uuid::Uuid;

/// Header name for correlation ID.
pub const CORRELATION_ID_HEADER: &str = "X-Correlation-ID";

/// Create a layer that adds correlation ID tracking to all requests.
#[must_use]
pub const fn correlation_id_layer() -> CorrelationIdLayer {
    CorrelationIdLayer
}

/// Layer for correlation ID tracking.
#[derive(Clone, Copy, Debug)]
pub struct CorrelationIdLayer;

impl<S> Layer<S> for CorrelationIdLayer {
    type Service = CorrelationIdMiddleware<S>;

    fn layer(&self, inner: S) -> Self::Service {
        CorrelationIdMiddleware { inner }
    }
}

/// Middleware service for correlation ID tracking.
#[derive(Clone, Debug)]
pub struct CorrelationIdMiddleware<S> {
    inner: S,
}

impl<S> Service<Request> for CorrelationIdMiddleware<S>
where
    S: Service<Request, Response = Response> + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request) -> Self::Future {
        let correlation_id = req
            .headers()
            .get(CORRELATION_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| Uuid::parse_str(s).ok())
            .unwrap_or_else(Uuid::new_v4);

        req.extensions_mut().insert(correlation_id);

        let span = tracing::info_span!(
            "payment_http",
            correlation_id = %correlation_id,
            method = %req.method(),
            path = %req.uri().path(),
        );

        let fut = self.inner.call(req);

        Box::pin(async move {
            let mut response = fut.instrument(span).await?;

            metrics::counter!(
                "payment_saga.http.responses",
                "class" => status_class(response.status().as_u16())
            )
            .increment(1);

            if let Ok(header_value) = HeaderValue::from_str(&correlation_id.to_string()) {
                response
                    .headers_mut()
                    .insert(CORRELATION_ID_HEADER, header_value);
            }

            Ok(response)
        })
    }
}

const fn status_class(status: u16) -> &'static str {
    match status {
        200..=299 => "2xx",
        300..=399 => "3xx",
        400..=499 => "4xx",
        _ => "5xx",
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::extractors::CorrelationId;
    use axum::{Router, body::Body, http::Request, routing::post};
    use tower::ServiceExt;

    async fn echo(correlation_id: CorrelationId) -> String {
        correlation_id.0.to_string()
    }

    fn app() -> Router {
        Router::new()
            .route("/payments/webhook", post(echo))
            .layer(correlation_id_layer())
    }

    async fn send(header: Option<&str>) -> (Option<String>, String) {
        let mut builder = Request::builder().method("POST").uri("/payments/webhook");
        if let Some(value) = header {
            builder = builder.header(CORRELATION_ID_HEADER, value);
        }
        let response = app().oneshot(builder.body(Body::empty()).unwrap()).await.unwrap();

        let echoed = response
            .headers()
            .get(CORRELATION_ID_HEADER)
            .map(|v| v.to_str().unwrap().to_string());
        let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        (echoed, String::from_utf8(body.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_fresh_id_when_header_absent() {
        let (echoed, seen_by_handler) = send(None).await;

        let echoed = echoed.unwrap();
        assert!(Uuid::parse_str(&echoed).is_ok());
        assert_eq!(echoed, seen_by_handler);
    }

    #[tokio::test]
    async fn test_caller_id_is_kept() {
        let id = Uuid::new_v4().to_string();
        let (echoed, seen_by_handler) = send(Some(&id)).await;

        assert_eq!(echoed.as_deref(), Some(id.as_str()));
        assert_eq!(seen_by_handler, id);
    }

    #[tokio::test]
    async fn test_malformed_id_is_replaced() {
        let (echoed, seen_by_handler) = send(Some("evt_not_a_uuid")).await;

        let echoed = echoed.unwrap();
        assert_ne!(echoed, "evt_not_a_uuid");
        assert_eq!(echoed, seen_by_handler);
    }

    #[test]
    fn test_status_class() {
        assert_eq!(status_class(200), "2xx");
        assert_eq!(status_class(409), "4xx");
        assert_eq!(status_class(502), "5xx");
    }
}
