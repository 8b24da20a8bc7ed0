//! Injected dependencies shared by the saga components.

use payment_saga_core::confirmation::ConfirmationQueue;
use payment_saga_core::environment::{Clock, IdGenerator, SystemClock, UuidIdGenerator};
use payment_saga_core::gateway::PaymentGateway;
use payment_saga_core::order::OrderService;
use payment_saga_core::store::PaymentStore;
use std::sync::Arc;

/// Everything a saga component talks to.
///
/// Cloning is cheap; every field is an `Arc`.
#[derive(Clone)]
pub struct SagaEnvironment {
    /// Payment Record Store
    pub store: Arc<dyn PaymentStore>,
    /// Durable confirmation jobs
    pub confirmations: Arc<dyn ConfirmationQueue>,
    /// Payment gateway adapter
    pub gateway: Arc<dyn PaymentGateway>,
    /// External Order Service
    pub orders: Arc<dyn OrderService>,
    /// Time source
    pub clock: Arc<dyn Clock>,
    /// Identifier source
    pub ids: Arc<dyn IdGenerator>,
}

impl SagaEnvironment {
    /// Environment with the system clock and UUID identifiers.
    #[must_use]
    pub fn new(
        store: Arc<dyn PaymentStore>,
        confirmations: Arc<dyn ConfirmationQueue>,
        gateway: Arc<dyn PaymentGateway>,
        orders: Arc<dyn OrderService>,
    ) -> Self {
        Self {
            store,
            confirmations,
            gateway,
            orders,
            clock: Arc::new(SystemClock),
            ids: Arc::new(UuidIdGenerator),
        }
    }

    /// Replace the clock.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Replace the identifier source.
    #[must_use]
    pub fn with_ids(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = ids;
        self
    }
}

impl std::fmt::Debug for SagaEnvironment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SagaEnvironment").finish_non_exhaustive()
    }
}
