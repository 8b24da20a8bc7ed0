//! Axum HTTP surface for the order–payment saga.
//!
//! # Request Flow
//!
//! 1. **HTTP Request** arrives at an Axum handler
//! 2. **Extract** auth, correlation id, and body (JSON, or raw bytes for webhooks)
//! 3. **Call** the saga component (`CheckoutInitiator`, `WebhookReconciler`, `RefundCoordinator`)
//! 4. **Map** the result or [`SagaError`](payment_saga_core::SagaError) to an HTTP response
//!
//! # Example
//!
//! ```ignore
//! use payment_saga_web::{AppState, payment_router};
//!
//! let state = AppState::new(env, worker, checkout_config, reconciler_config)
//!     .with_api_token(token);
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await?;
//! axum::serve(listener, payment_router(state)).await?;
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod extractors;
pub mod handlers;
pub mod middleware;
pub mod router;
pub mod state;

// Re-export key types for convenience
pub use error::AppError;
pub use extractors::{ApiAuth, CorrelationId, STRIPE_SIGNATURE_HEADER, StripeSignature};
pub use middleware::{CORRELATION_ID_HEADER, correlation_id_layer};
pub use router::payment_router;
pub use state::AppState;

/// Result type alias for web handlers.
pub type WebResult<T> = Result<T, AppError>;
