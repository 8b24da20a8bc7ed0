//! Payment HTTP router.
//!
//! Composes the payment and health handlers into a single Axum router.

use crate::handlers::{health, payments};
use crate::middleware::correlation_id_layer;
use crate::state::AppState;
use axum::{
    Router,
    http::{
        HeaderName, Method,
        header::{AUTHORIZATION, CONTENT_TYPE},
    },
    routing::{get, post},
};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

/// Create the payment router with all endpoints.
///
/// # Routes
///
/// - `POST /payments/checkout-sessions` - Start a hosted checkout
/// - `GET /payments/checkout-sessions/:id/status` - Gateway session status
/// - `POST /payments/:id/refund` - Refund a payment
/// - `POST /payments/webhook` - Gateway webhook (raw body)
/// - `GET /health` - Liveness
/// - `GET /health/ready` - Readiness (store reachable)
///
/// Browser requests are only allowed from [`AppState::allowed_origins`].
///
/// # Example
///
/// ```rust,ignore
/// let app = payment_router(state);
/// axum::serve(listener, app).await?;
/// ```
pub fn payment_router(state: AppState) -> Router {
    let cors = cors_layer(state.allowed_origins.clone());
    Router::new()
        .route(
            "/payments/checkout-sessions",
            post(payments::create_checkout_session),
        )
        .route(
            "/payments/checkout-sessions/:id/status",
            get(payments::checkout_session_status),
        )
        .route("/payments/webhook", post(payments::stripe_webhook))
        .route("/payments/:id/refund", post(payments::refund_payment))
        .route("/health", get(health::health_check))
        .route("/health/ready", get(health::readiness_check))
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(correlation_id_layer())
}

fn cors_layer(origins: Vec<axum::http::HeaderValue>) -> CorsLayer {
    let correlation = HeaderName::from_static("x-correlation-id");
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE, correlation.clone()])
        .expose_headers([correlation])
}
