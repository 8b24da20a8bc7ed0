//! # Payment Saga Core
//!
//! Domain model and boundary traits for the order–payment reconciliation saga.
//!
//! The saga coordinates three parties that share no transaction boundary:
//!
//! ```text
//! ┌──────────────┐   create session   ┌──────────────┐
//! │   Checkout   │───────────────────►│   Payment    │
//! │  Initiator   │                    │   Gateway    │
//! └──────┬───────┘                    └──────┬───────┘
//!        │ Pending record                    │ webhook (at-least-once)
//!        ▼                                   ▼
//! ┌──────────────┐   CAS transition   ┌──────────────┐
//! │ PaymentStore │◄───────────────────│   Webhook    │
//! │ (truth)      │                    │  Reconciler  │
//! └──────────────┘                    └──────┬───────┘
//!                                            │ confirmation job
//!                                            ▼
//!                                     ┌──────────────┐
//!                                     │ Order Service│ (projection, retried)
//!                                     └──────────────┘
//! ```
//!
//! ## Core Concepts
//!
//! - **Payment Record**: one per payment attempt, source of truth for payment state
//! - **Transition**: a conditional (compare-and-swap) status change
//! - **Confirmation Job**: durable phase-2 work that projects payment success onto the order
//! - **Environment**: injected dependencies (`Clock`, `IdGenerator`) for deterministic tests
//!
//! All outbound boundaries (`PaymentStore`, `PaymentGateway`, `OrderService`,
//! `ConfirmationQueue`) are dyn-compatible traits so they can be shared as
//! `Arc<dyn Trait>` and swapped for in-memory fakes.

// Re-export commonly used types
pub use chrono::{DateTime, Utc};

pub mod confirmation;
pub mod error;
pub mod gateway;
pub mod order;
pub mod payment;
pub mod store;

pub use confirmation::{ConfirmationJob, ConfirmationQueue, ConfirmationStatus, Enqueued, JobId};
pub use error::SagaError;
pub use gateway::{GatewayError, GatewayEvent, PaymentGateway};
pub use order::{CheckoutRequest, LineItem, OrderService, OrderStatus};
pub use payment::{PaymentId, PaymentRecord, PaymentStatus, Transition};
pub use store::{CasOutcome, PaymentStore, StoreError};

/// Environment module - Dependency injection traits
///
/// Time and identifier generation are abstracted so the saga can be driven
/// deterministically from tests.
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// # Examples
    ///
    /// ```
    /// use payment_saga_core::environment::{Clock, SystemClock};
    ///
    /// let clock = SystemClock;
    /// let _now = clock.now();
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Wall-clock time.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }

    /// Identifier generation for payment records and transaction ids.
    pub trait IdGenerator: Send + Sync {
        /// A new payment record id.
        fn payment_id(&self) -> String;

        /// A new, globally unique transaction id (the local dedupe key).
        fn transaction_id(&self) -> String;
    }

    /// Random UUID v4 identifiers.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct UuidIdGenerator;

    impl IdGenerator for UuidIdGenerator {
        fn payment_id(&self) -> String {
            uuid::Uuid::new_v4().to_string()
        }

        fn transaction_id(&self) -> String {
            format!("txn_{}", uuid::Uuid::new_v4().simple())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::environment::{IdGenerator, UuidIdGenerator};

    #[test]
    fn transaction_ids_are_unique_and_prefixed() {
        let ids = UuidIdGenerator;
        let a = ids.transaction_id();
        let b = ids.transaction_id();
        assert_ne!(a, b);
        assert!(a.starts_with("txn_"));
    }
}
