//! Payment Record model and its status state machine.
//!
//! ```text
//! Pending ──► Succeeded ──► Refunded
//!    │
//!    └──────► Failed
//! ```
//!
//! Every status change is expressed as a [`Transition`] and applied through
//! [`PaymentRecord::apply`], which enforces the state machine and the record
//! invariants. Stores use the same function so that in-memory and database
//! implementations agree on what is legal.

use crate::error::SagaError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wrap a raw identifier.
            #[must_use]
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// Borrow the raw identifier.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

string_id!(
    /// Payment Record identifier.
    PaymentId
);
string_id!(
    /// Order identifier (owned by the Order Service).
    OrderId
);
string_id!(
    /// Customer identifier.
    CustomerId
);
string_id!(
    /// Restaurant identifier.
    RestaurantId
);
string_id!(
    /// Locally generated transaction id, the dedupe key of a payment attempt.
    TransactionId
);
string_id!(
    /// Gateway checkout session reference.
    SessionRef
);
string_id!(
    /// Gateway reference for a settled charge.
    PaymentRef
);

/// Payment status.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    /// Checkout session created, awaiting the gateway
    Pending,
    /// Gateway confirmed the charge
    Succeeded,
    /// Gateway reported failure or the session expired
    Failed,
    /// Charge refunded (terminal)
    Refunded,
}

impl PaymentStatus {
    /// Storage representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Refunded => "refunded",
        }
    }

    /// Parse the storage representation.
    ///
    /// # Errors
    ///
    /// Returns [`SagaError::Storage`] for an unknown value.
    pub fn parse(s: &str) -> Result<Self, SagaError> {
        match s {
            "pending" => Ok(Self::Pending),
            "succeeded" => Ok(Self::Succeeded),
            "failed" => Ok(Self::Failed),
            "refunded" => Ok(Self::Refunded),
            _ => Err(SagaError::Storage(format!("Invalid payment status: {s}"))),
        }
    }

    /// Whether the state machine allows moving from `self` to `next`.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Succeeded | Self::Failed) | (Self::Succeeded, Self::Refunded)
        )
    }

    /// Whether no further transition is possible.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Failed | Self::Refunded)
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the customer pays.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentMethod {
    /// Card payment through the gateway
    Card,
    /// Cash on delivery
    Cash,
}

impl PaymentMethod {
    /// Storage representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Card => "card",
            Self::Cash => "cash",
        }
    }

    /// Parse the storage representation.
    ///
    /// # Errors
    ///
    /// Returns [`SagaError::Storage`] for an unknown value.
    pub fn parse(s: &str) -> Result<Self, SagaError> {
        match s {
            "card" => Ok(Self::Card),
            "cash" => Ok(Self::Cash),
            _ => Err(SagaError::Storage(format!("Invalid payment method: {s}"))),
        }
    }
}

/// Refund details recorded with the Refunded transition.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefundMetadata {
    /// Gateway refund id
    pub refund_id: String,
    /// Refunded amount in minor units
    pub amount_cents: i64,
    /// Gateway refund status (e.g. `succeeded`, `pending`)
    pub status: String,
    /// When the refund was recorded
    pub refunded_at: DateTime<Utc>,
}

/// One payment attempt for an order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRecord {
    /// Record id
    pub id: PaymentId,
    /// Order this attempt pays for
    pub order_id: OrderId,
    /// Paying customer
    pub customer_id: CustomerId,
    /// Restaurant fulfilling the order
    pub restaurant_id: RestaurantId,
    /// Charged amount in minor units
    pub amount_cents: i64,
    /// Lowercase ISO currency code
    pub currency: String,
    /// Payment method
    pub payment_method: PaymentMethod,
    /// Current status
    pub status: PaymentStatus,
    /// Local dedupe key, assigned at creation
    pub transaction_id: TransactionId,
    /// Gateway checkout session, once one exists
    pub gateway_session_ref: Option<SessionRef>,
    /// Gateway charge reference, once the gateway confirms a charge
    pub gateway_payment_ref: Option<PaymentRef>,
    /// Set on the Refunded transition
    pub refund: Option<RefundMetadata>,
    /// Set on the Failed transition
    pub failure_reason: Option<String>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last modification time
    pub updated_at: DateTime<Utc>,
}

/// Fields for a new Pending record.
#[derive(Clone, Debug)]
pub struct NewPayment {
    /// Record id
    pub id: PaymentId,
    /// Order id
    pub order_id: OrderId,
    /// Customer id
    pub customer_id: CustomerId,
    /// Restaurant id
    pub restaurant_id: RestaurantId,
    /// Charged amount in minor units
    pub amount_cents: i64,
    /// Currency code
    pub currency: String,
    /// Payment method
    pub payment_method: PaymentMethod,
    /// Transaction id
    pub transaction_id: TransactionId,
    /// Checkout session reference
    pub gateway_session_ref: Option<SessionRef>,
}

impl PaymentRecord {
    /// Build a Pending record.
    #[must_use]
    pub fn pending(new: NewPayment, now: DateTime<Utc>) -> Self {
        Self {
            id: new.id,
            order_id: new.order_id,
            customer_id: new.customer_id,
            restaurant_id: new.restaurant_id,
            amount_cents: new.amount_cents,
            currency: new.currency,
            payment_method: new.payment_method,
            status: PaymentStatus::Pending,
            transaction_id: new.transaction_id,
            gateway_session_ref: new.gateway_session_ref,
            gateway_payment_ref: None,
            refund: None,
            failure_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Apply a transition in place.
    ///
    /// # Errors
    ///
    /// - [`SagaError::InvalidState`] if the state machine forbids the move,
    ///   if a Succeeded transition lacks a session reference, or if a payment
    ///   reference would be overwritten.
    pub fn apply(&mut self, transition: &Transition, now: DateTime<Utc>) -> Result<(), SagaError> {
        let target = transition.target_status();
        match transition {
            Transition::FillPaymentRef { payment_ref } => {
                if self.status != PaymentStatus::Succeeded {
                    return Err(SagaError::invalid_state(&self.id, self.status, "fill payment reference"));
                }
                if self.gateway_payment_ref.is_some() {
                    return Err(SagaError::InvalidState(format!(
                        "payment {} already has a gateway payment reference",
                        self.id
                    )));
                }
                self.gateway_payment_ref = Some(payment_ref.clone());
            },
            _ if !self.status.can_transition_to(target) => {
                return Err(SagaError::invalid_state(&self.id, self.status, target.as_str()));
            },
            Transition::Succeed { payment_ref } => {
                if self.gateway_session_ref.is_none() {
                    return Err(SagaError::InvalidState(format!(
                        "payment {} has no checkout session to reconcile against",
                        self.id
                    )));
                }
                if self.gateway_payment_ref.is_none() {
                    self.gateway_payment_ref.clone_from(payment_ref);
                }
            },
            Transition::Fail { reason } => self.failure_reason = Some(reason.clone()),
            Transition::Refund { refund } => self.refund = Some(refund.clone()),
        }
        self.status = target;
        self.updated_at = now;
        Ok(())
    }
}

/// A conditional change to a Payment Record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Transition {
    /// Pending → Succeeded, storing the gateway payment reference if known
    Succeed {
        /// Charge reference carried by the webhook event
        payment_ref: Option<PaymentRef>,
    },
    /// Pending → Failed
    Fail {
        /// Why the attempt failed
        reason: String,
    },
    /// Succeeded → Refunded
    Refund {
        /// Refund details
        refund: RefundMetadata,
    },
    /// Late fill of a missing payment reference on a Succeeded record
    FillPaymentRef {
        /// Recovered charge reference
        payment_ref: PaymentRef,
    },
}

impl Transition {
    /// Status the record holds after the transition.
    #[must_use]
    pub const fn target_status(&self) -> PaymentStatus {
        match self {
            Self::Succeed { .. } | Self::FillPaymentRef { .. } => PaymentStatus::Succeeded,
            Self::Fail { .. } => PaymentStatus::Failed,
            Self::Refund { .. } => PaymentStatus::Refunded,
        }
    }

    /// Status the record must hold for the transition to apply.
    #[must_use]
    pub const fn expected_status(&self) -> PaymentStatus {
        match self {
            Self::Succeed { .. } | Self::Fail { .. } => PaymentStatus::Pending,
            Self::Refund { .. } | Self::FillPaymentRef { .. } => PaymentStatus::Succeeded,
        }
    }
}

/// Convert a decimal major-unit amount to minor units, rounding to the nearest cent.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn to_cents(amount: f64) -> i64 {
    (amount * 100.0).round() as i64
}
