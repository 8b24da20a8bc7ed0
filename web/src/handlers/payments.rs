//! Payment endpoints.
//!
//! | Method | Path | Auth |
//! |---|---|---|
//! | `POST` | `/payments/checkout-sessions` | bearer |
//! | `GET` | `/payments/checkout-sessions/:id/status` | bearer |
//! | `POST` | `/payments/:id/refund` | bearer |
//! | `POST` | `/payments/webhook` | gateway signature |

use crate::error::AppError;
use crate::extractors::{ApiAuth, CorrelationId, StripeSignature};
use crate::state::AppState;
use axum::{
    Json,
    body::Bytes,
    extract::{Path, State, rejection::JsonRejection},
};
use payment_saga_core::order::CheckoutRequest;
use payment_saga_core::payment::{PaymentId, PaymentRef, SessionRef};
use payment_saga_runtime::{RefundOutcome, WebhookOutcome};
use serde::Serialize;

/// Body of a successful checkout.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutResponse {
    /// Always `true`
    pub success: bool,
    /// Gateway session reference
    pub session_id: SessionRef,
    /// Pending payment record
    pub payment_id: PaymentId,
    /// Hosted checkout page
    pub url: String,
}

/// Body of a session status lookup.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatusResponse {
    /// Always `true`
    pub success: bool,
    /// Gateway payment status (`paid`, `unpaid`, ...)
    pub status: Option<String>,
    /// Gateway session status (`open`, `complete`, `expired`)
    pub session_status: Option<String>,
    /// Charge reference once settled
    pub payment_ref: Option<PaymentRef>,
}

/// Body of a successful refund.
#[derive(Debug, Serialize)]
pub struct RefundResponse {
    /// Always `true`
    pub success: bool,
    /// Updated payment and gateway refund
    pub data: RefundOutcome,
}

/// Webhook acknowledgement.
#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct WebhookAck {
    /// Always `true`
    pub received: bool,
}

/// Start a hosted checkout for an order.
///
/// # Endpoint
///
/// ```text
/// POST /payments/checkout-sessions
/// ```
///
/// # Errors
///
/// 400 on a malformed or invalid body, 502 when the gateway refuses the
/// session, 500 when the payment record cannot be written.
pub async fn create_checkout_session(
    State(state): State<AppState>,
    _auth: ApiAuth,
    correlation_id: CorrelationId,
    body: Result<Json<CheckoutRequest>, JsonRejection>,
) -> Result<Json<CheckoutResponse>, AppError> {
    let Json(request) = body.map_err(|e| AppError::bad_request(e.body_text()))?;

    tracing::info!(
        correlation_id = %correlation_id.0,
        order_id = %request.order_id,
        "Checkout requested"
    );

    let outcome = state.checkout.start(&request).await?;

    Ok(Json(CheckoutResponse {
        success: true,
        session_id: outcome.session_ref,
        payment_id: outcome.payment_id,
        url: outcome.url,
    }))
}

/// Gateway-side status of a checkout session.
///
/// # Endpoint
///
/// ```text
/// GET /payments/checkout-sessions/:id/status
/// ```
///
/// # Errors
///
/// 404 for an unknown session, 502 when the gateway lookup fails.
pub async fn checkout_session_status(
    State(state): State<AppState>,
    _auth: ApiAuth,
    Path(session_id): Path<String>,
) -> Result<Json<SessionStatusResponse>, AppError> {
    let detail = state
        .checkout
        .session_status(&SessionRef::from(session_id))
        .await?;

    Ok(Json(SessionStatusResponse {
        success: true,
        status: detail.payment_status,
        session_status: detail.status,
        payment_ref: detail.payment_ref,
    }))
}

/// Refund a settled payment in full.
///
/// # Endpoint
///
/// ```text
/// POST /payments/:id/refund
/// ```
///
/// # Errors
///
/// 404 for an unknown payment, 409 when it is not Succeeded, 422 when its
/// gateway reference cannot be recovered, 502 when the gateway refuses.
pub async fn refund_payment(
    State(state): State<AppState>,
    _auth: ApiAuth,
    correlation_id: CorrelationId,
    Path(payment_id): Path<String>,
) -> Result<Json<RefundResponse>, AppError> {
    let payment_id = PaymentId::from(payment_id);
    tracing::info!(
        correlation_id = %correlation_id.0,
        payment_id = %payment_id,
        "Refund requested"
    );

    let outcome = state.refunds.refund(&payment_id).await?;

    Ok(Json(RefundResponse {
        success: true,
        data: outcome,
    }))
}

/// Receive a gateway webhook.
///
/// The body is taken as raw bytes: the signature covers the exact bytes
/// sent, so it must not be decoded before verification.
///
/// # Endpoint
///
/// ```text
/// POST /payments/webhook
/// ```
///
/// # Errors
///
/// 400 on a missing or invalid signature or an undecodable event, 500 when
/// the store fails before the transition (the gateway redelivers).
pub async fn stripe_webhook(
    State(state): State<AppState>,
    correlation_id: CorrelationId,
    StripeSignature(signature): StripeSignature,
    body: Bytes,
) -> Result<Json<WebhookAck>, AppError> {
    let outcome = state
        .webhooks
        .handle(&body, signature.as_deref())
        .await
        .map_err(AppError::from_webhook)?;

    match &outcome {
        WebhookOutcome::Reconciled {
            payment_id,
            confirmation,
        } => tracing::info!(
            correlation_id = %correlation_id.0,
            payment_id = %payment_id,
            confirmation = ?confirmation,
            "Webhook reconciled payment"
        ),
        other => tracing::debug!(
            correlation_id = %correlation_id.0,
            outcome = ?other,
            "Webhook acknowledged"
        ),
    }

    Ok(Json(WebhookAck { received: true }))
}
