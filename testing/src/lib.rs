//! # Payment Saga Testing
//!
//! Testing utilities and helpers for the order–payment saga.
//!
//! This crate provides:
//! - Deterministic clocks and id generators
//! - In-memory `PaymentStore` and `ConfirmationQueue`
//! - A scriptable `PaymentGateway` and `OrderService`
//! - Request fixtures
//!
//! ## Example
//!
//! ```ignore
//! use payment_saga_testing::{InMemoryPaymentStore, MockGateway, test_clock};
//!
//! #[tokio::test]
//! async fn test_checkout() {
//!     let gateway = MockGateway::new();
//!     let store = InMemoryPaymentStore::new();
//!     // build a CheckoutInitiator from these and assert on store.len()
//! }
//! ```

use chrono::{DateTime, Utc};
use payment_saga_core::environment::{Clock, IdGenerator};

pub mod fixtures;
pub mod gateway_mocks;
pub mod store_mocks;

/// Mock implementations of Environment traits
pub mod mocks {
    use super::{Clock, DateTime, IdGenerator, Utc};
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::{Arc, Mutex};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use payment_saga_testing::mocks::FixedClock;
    /// use payment_saga_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// let time1 = clock.now();
    /// let time2 = clock.now();
    /// assert_eq!(time1, time2); // Always the same!
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Clock that only moves when told to.
    ///
    /// Used to step through backoff schedules.
    #[derive(Debug, Clone)]
    pub struct ManualClock {
        time: Arc<Mutex<DateTime<Utc>>>,
    }

    impl ManualClock {
        /// Start at `time`.
        #[must_use]
        pub fn new(time: DateTime<Utc>) -> Self {
            Self {
                time: Arc::new(Mutex::new(time)),
            }
        }

        /// Move the clock forward.
        #[allow(clippy::unwrap_used)]
        pub fn advance(&self, by: chrono::Duration) {
            let mut time = self.time.lock().unwrap();
            *time += by;
        }
    }

    impl Clock for ManualClock {
        #[allow(clippy::unwrap_used)]
        fn now(&self) -> DateTime<Utc> {
            *self.time.lock().unwrap()
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    ///
    /// # Panics
    ///
    /// This function will panic if the hardcoded timestamp fails to parse,
    /// which should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(test_epoch())
    }

    /// 2025-01-01 00:00:00 UTC.
    ///
    /// # Panics
    ///
    /// Never in practice; the timestamp is hardcoded.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_epoch() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
            .expect("hardcoded timestamp should always parse")
            .with_timezone(&Utc)
    }

    /// Predictable ids: `P1`, `P2`, ... and `T1`, `T2`, ...
    #[derive(Debug, Default)]
    pub struct SequentialIdGenerator {
        payments: AtomicU64,
        transactions: AtomicU64,
    }

    impl SequentialIdGenerator {
        /// Start both sequences at 1.
        #[must_use]
        pub const fn new() -> Self {
            Self {
                payments: AtomicU64::new(0),
                transactions: AtomicU64::new(0),
            }
        }
    }

    impl IdGenerator for SequentialIdGenerator {
        fn payment_id(&self) -> String {
            format!("P{}", self.payments.fetch_add(1, Ordering::SeqCst) + 1)
        }

        fn transaction_id(&self) -> String {
            format!("T{}", self.transactions.fetch_add(1, Ordering::SeqCst) + 1)
        }
    }
}

/// Install a test tracing subscriber once per process.
///
/// Honors `RUST_LOG`; safe to call from every test.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// Re-export commonly used items
pub use gateway_mocks::{MockGateway, MockOrderService};
pub use mocks::{FixedClock, ManualClock, SequentialIdGenerator, test_clock, test_epoch};
pub use store_mocks::{InMemoryConfirmationQueue, InMemoryPaymentStore};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_clock() {
        let clock = test_clock();
        let time1 = clock.now();
        let time2 = clock.now();
        assert_eq!(time1, time2);
    }

    #[test]
    fn test_manual_clock_advances() {
        let clock = ManualClock::new(test_epoch());
        clock.advance(chrono::Duration::seconds(30));
        assert_eq!(clock.now(), test_epoch() + chrono::Duration::seconds(30));
    }

    #[test]
    fn test_sequential_ids() {
        let ids = SequentialIdGenerator::new();
        assert_eq!(ids.payment_id(), "P1");
        assert_eq!(ids.payment_id(), "P2");
        assert_eq!(ids.transaction_id(), "T1");
    }
}
