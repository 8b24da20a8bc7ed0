//! Custom Axum extractors.
//!
//! - `CorrelationId`: the request's correlation id
//! - `ApiAuth`: bearer-token check for client and operator routes
//! - `StripeSignature`: the raw `Stripe-Signature` header, if any
//!
//! # Examples
//!
//! ```ignore
//! async fn handler(
//!     State(state): State<AppState>,
//!     _auth: ApiAuth,
//!     correlation_id: CorrelationId,
//! ) -> Result<Json<Response>, AppError> {
//!     tracing::info!(correlation_id = %correlation_id.0, "Processing request");
//!     Ok(Json(response))
//! }
//! ```

use crate::error::AppError;
use crate::middleware::CORRELATION_ID_HEADER;
use crate::state::AppState;
use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};
use constant_time_eq::constant_time_eq;
use uuid::Uuid;

/// Header carrying the gateway's webhook signature.
pub const STRIPE_SIGNATURE_HEADER: &str = "Stripe-Signature";

/// Correlation ID for request tracing.
///
/// Uses the id stored by the correlation-id middleware, falling back to the
/// `X-Correlation-ID` header, or a new UUID v4.
#[derive(Debug, Clone, Copy)]
pub struct CorrelationId(pub Uuid);

#[async_trait]
impl<S> FromRequestParts<S> for CorrelationId
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        if let Some(id) = parts.extensions.get::<Uuid>() {
            return Ok(Self(*id));
        }

        let correlation_id = parts
            .headers
            .get(CORRELATION_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| Uuid::parse_str(s).ok())
            .unwrap_or_else(Uuid::new_v4);

        Ok(Self(correlation_id))
    }
}

/// Proof that the request carried the configured bearer token.
///
/// Rejects with 401 when a token is configured and the request's
/// `Authorization: Bearer` value does not match it.
#[derive(Debug, Clone, Copy)]
pub struct ApiAuth;

#[async_trait]
impl FromRequestParts<AppState> for ApiAuth {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let Some(expected) = state.api_token.as_deref() else {
            return Ok(Self);
        };

        let presented = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim)
            .ok_or_else(|| AppError::unauthorized("Missing bearer token"))?;

        if constant_time_eq(presented.as_bytes(), expected.as_bytes()) {
            Ok(Self)
        } else {
            Err(AppError::unauthorized("Invalid bearer token"))
        }
    }
}

/// The `Stripe-Signature` header value, if present and valid UTF-8.
#[derive(Debug, Clone, Default)]
pub struct StripeSignature(pub Option<String>);

#[async_trait]
impl<S> FromRequestParts<S> for StripeSignature
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self(
            parts
                .headers
                .get(STRIPE_SIGNATURE_HEADER)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string),
        ))
    }
}
