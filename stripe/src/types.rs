//! Wire types for the parts of the Stripe API the adapter uses.

use serde::Deserialize;
use serde_json::Value;

/// Checkout Session object (subset).
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct StripeSession {
    /// `cs_...`
    pub id: String,
    /// Hosted page; only present while the session is open
    #[serde(default)]
    pub url: Option<String>,
    /// `open`, `complete` or `expired`
    #[serde(default)]
    pub status: Option<String>,
    /// `paid`, `unpaid` or `no_payment_required`
    #[serde(default)]
    pub payment_status: Option<String>,
    /// `pi_...` id, or the expanded object
    #[serde(default)]
    pub payment_intent: Option<Value>,
}

impl StripeSession {
    /// PaymentIntent id, expanded or not.
    #[must_use]
    pub fn payment_intent_id(&self) -> Option<String> {
        match self.payment_intent.as_ref()? {
            Value::String(id) => Some(id.clone()),
            Value::Object(object) => object.get("id")?.as_str().map(str::to_string),
            _ => None,
        }
    }

    /// Whether funds are captured.
    #[must_use]
    pub fn is_paid(&self) -> bool {
        matches!(
            self.payment_status.as_deref(),
            Some("paid" | "no_payment_required")
        )
    }
}

/// Refund object (subset).
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct StripeRefund {
    /// `re_...`
    pub id: String,
    /// Refunded amount in minor units
    pub amount: i64,
    /// `pending`, `succeeded`, `failed`, ...
    #[serde(default)]
    pub status: Option<String>,
}

/// Webhook event envelope.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct StripeEvent {
    /// `evt_...`
    pub id: String,
    /// Event type, e.g. `checkout.session.completed`
    #[serde(rename = "type")]
    pub event_type: String,
    /// Event payload
    pub data: StripeEventData,
}

/// `data` member of an event.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct StripeEventData {
    /// The object the event is about
    pub object: Value,
}

/// Error body returned by the API.
#[derive(Clone, Debug, Deserialize)]
pub struct StripeErrorBody {
    /// Error details
    pub error: StripeErrorDetail,
}

/// Error details.
#[derive(Clone, Debug, Deserialize)]
pub struct StripeErrorDetail {
    /// Human-readable message
    #[serde(default)]
    pub message: Option<String>,
    /// Machine-readable code
    #[serde(default)]
    pub code: Option<String>,
}
