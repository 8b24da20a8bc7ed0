//! # Payment Saga Runtime
//!
//! The components that drive the order–payment saga.
//!
//! ## Core Components
//!
//! - **Checkout Initiator**: validates an order, opens a gateway checkout
//!   session and persists a Pending payment
//! - **Webhook Reconciler**: verifies gateway events and applies them to
//!   payments with conditional writes
//! - **Confirmation Worker**: projects payment success onto the order, with
//!   durable retries, escalation and a reconciliation sweep
//! - **Refund Coordinator**: recovers missing gateway references and refunds
//!
//! All of them share one [`SagaEnvironment`] of injected boundaries.
//!
//! ## Example
//!
//! ```ignore
//! use payment_saga_runtime::{
//!     CheckoutConfig, CheckoutInitiator, ConfirmationConfig, ConfirmationWorker,
//!     ReconcilerConfig, SagaEnvironment, WebhookReconciler,
//! };
//!
//! let env = SagaEnvironment::new(store, queue, gateway, orders);
//! let checkout = CheckoutInitiator::new(env.clone(), CheckoutConfig::default());
//! let worker = ConfirmationWorker::new(env.clone(), ConfirmationConfig::default());
//! let webhooks = WebhookReconciler::new(env, worker, ReconcilerConfig::new(secret));
//!
//! let session = checkout.start(&request).await?;
//! // ... customer pays, gateway calls back ...
//! let outcome = webhooks.handle(&body, Some(signature)).await?;
//! ```

/// Checkout Initiator
pub mod checkout;

/// Confirmation Worker
pub mod confirmation;

/// Injected dependencies
pub mod environment;

/// Prometheus metrics for observability
pub mod metrics;

/// Order Status Notifier
pub mod notifier;

/// Refund Coordinator
pub mod refund;

/// Exponential backoff policy
pub mod retry;

/// Webhook Reconciler
pub mod webhook;

pub use checkout::{CheckoutConfig, CheckoutInitiator, CheckoutOutcome};
pub use confirmation::{ConfirmationAttempt, ConfirmationConfig, ConfirmationWorker};
pub use environment::SagaEnvironment;
pub use notifier::OrderStatusNotifier;
pub use refund::{RefundCoordinator, RefundOutcome};
pub use retry::RetryPolicy;
pub use webhook::{ReconcilerConfig, WebhookOutcome, WebhookReconciler};
