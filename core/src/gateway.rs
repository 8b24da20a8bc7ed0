//! Payment gateway boundary.
//!
//! The gateway adapter is the only component that talks to the external card
//! payment provider. It holds no business state; everything it returns is a
//! plain value the saga components interpret.

use crate::payment::{CustomerId, OrderId, PaymentRef, RestaurantId, SessionRef};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors returned by a gateway adapter.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// Transport-level failure (connection refused, timeout, TLS).
    #[error("Request failed: {0}")]
    RequestFailed(String),

    /// The provider answered with an error status.
    #[error("API error (status {status}): {message}")]
    ApiError {
        /// HTTP status code
        status: u16,
        /// Error message from the provider
        message: String,
    },

    /// The provider's response could not be decoded.
    #[error("Response parsing failed: {0}")]
    ResponseParseFailed(String),

    /// The referenced object does not exist at the provider.
    #[error("Not found: {0}")]
    NotFound(String),

    /// A webhook payload could not be decoded.
    #[error("Invalid event payload: {0}")]
    InvalidEvent(String),
}

/// One line shown on the hosted checkout page.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayLineItem {
    /// Display name
    pub name: String,
    /// Unit amount in minor units
    pub unit_amount_cents: i64,
    /// Quantity
    pub quantity: i64,
}

/// Correlation metadata attached to a session so the webhook can route back.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionMetadata {
    /// Order id
    pub order_id: OrderId,
    /// Customer id
    pub customer_id: CustomerId,
    /// Restaurant id
    pub restaurant_id: RestaurantId,
}

/// Input to [`PaymentGateway::create_session`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CreateSessionRequest {
    /// Correlation metadata
    pub metadata: SessionMetadata,
    /// Lines including the delivery fee
    pub line_items: Vec<GatewayLineItem>,
    /// Lowercase ISO currency code
    pub currency: String,
    /// Where the provider redirects after payment
    pub success_url: String,
    /// Where the provider redirects on cancel
    pub cancel_url: String,
}

/// A newly created checkout session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CheckoutSession {
    /// Session reference
    pub session_ref: SessionRef,
    /// Hosted checkout page
    pub url: String,
}

/// Gateway-side view of a checkout session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDetail {
    /// Session reference
    pub session_ref: SessionRef,
    /// Session status (`open`, `complete`, `expired`)
    pub status: Option<String>,
    /// Payment status (`paid`, `unpaid`, `no_payment_required`)
    pub payment_status: Option<String>,
    /// Charge reference once settled
    pub payment_ref: Option<PaymentRef>,
}

/// Result of a refund request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefundResult {
    /// Provider refund id
    pub refund_id: String,
    /// Refunded amount in minor units
    pub amount_cents: i64,
    /// Provider refund status
    pub status: String,
}

/// A verified webhook event, reduced to what the saga acts on.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GatewayEvent {
    /// Checkout finished. `paid` is false for delayed payment methods.
    CheckoutCompleted {
        /// Provider event id
        event_id: String,
        /// Session reference
        session_ref: SessionRef,
        /// Charge reference, if the event carries one
        payment_ref: Option<PaymentRef>,
        /// Whether funds were captured
        paid: bool,
    },
    /// A delayed payment method settled.
    AsyncPaymentSucceeded {
        /// Provider event id
        event_id: String,
        /// Session reference
        session_ref: SessionRef,
        /// Charge reference, if the event carries one
        payment_ref: Option<PaymentRef>,
    },
    /// A delayed payment method failed.
    AsyncPaymentFailed {
        /// Provider event id
        event_id: String,
        /// Session reference
        session_ref: SessionRef,
    },
    /// The session expired without payment.
    SessionExpired {
        /// Provider event id
        event_id: String,
        /// Session reference
        session_ref: SessionRef,
    },
    /// Any other event type. Acknowledged and ignored.
    Other {
        /// Provider event id
        event_id: String,
        /// Provider event type
        event_type: String,
    },
}

impl GatewayEvent {
    /// Provider event id.
    #[must_use]
    pub fn event_id(&self) -> &str {
        match self {
            Self::CheckoutCompleted { event_id, .. }
            | Self::AsyncPaymentSucceeded { event_id, .. }
            | Self::AsyncPaymentFailed { event_id, .. }
            | Self::SessionExpired { event_id, .. }
            | Self::Other { event_id, .. } => event_id,
        }
    }

    /// Short label used in logs and metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::CheckoutCompleted { .. } => "checkout_completed",
            Self::AsyncPaymentSucceeded { .. } => "async_payment_succeeded",
            Self::AsyncPaymentFailed { .. } => "async_payment_failed",
            Self::SessionExpired { .. } => "session_expired",
            Self::Other { .. } => "other",
        }
    }
}

/// Payment gateway adapter.
///
/// # Dyn Compatibility
///
/// Methods return `Pin<Box<dyn Future>>` so the adapter can be injected as
/// `Arc<dyn PaymentGateway>` and replaced by a fake in tests.
pub trait PaymentGateway: Send + Sync {
    /// Create a hosted checkout session.
    ///
    /// # Errors
    ///
    /// Returns a [`GatewayError`] if the provider call fails.
    fn create_session(
        &self,
        request: CreateSessionRequest,
    ) -> Pin<Box<dyn Future<Output = Result<CheckoutSession, GatewayError>> + Send + '_>>;

    /// Retrieve a checkout session.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::NotFound`] for an unknown session, or another
    /// [`GatewayError`] if the provider call fails.
    fn get_session(
        &self,
        session_ref: &SessionRef,
    ) -> Pin<Box<dyn Future<Output = Result<SessionDetail, GatewayError>> + Send + '_>>;

    /// Refund a settled charge in full.
    ///
    /// # Errors
    ///
    /// Returns a [`GatewayError`] if the provider rejects the refund.
    fn create_refund(
        &self,
        payment_ref: &PaymentRef,
    ) -> Pin<Box<dyn Future<Output = Result<RefundResult, GatewayError>> + Send + '_>>;

    /// Verify a webhook signature over the exact raw body.
    fn verify_signature(&self, payload: &[u8], signature: &str, secret: &str) -> bool;

    /// Decode a verified webhook body.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::InvalidEvent`] if the body is not a valid event.
    fn parse_event(&self, payload: &[u8]) -> Result<GatewayEvent, GatewayError>;
}
