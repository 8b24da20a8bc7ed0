//! # Stripe Gateway Adapter
//!
//! [`PaymentGateway`](payment_saga_core::PaymentGateway) implementation for
//! Stripe Checkout: hosted sessions, session lookup, refunds, and webhook
//! signature verification.
//!
//! ## Example
//!
//! ```no_run
//! use payment_saga_stripe::{StripeConfig, StripeGateway};
//! use std::sync::Arc;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let gateway = StripeGateway::new(StripeConfig::new("sk_test_..."))?;
//! let gateway: Arc<dyn payment_saga_core::PaymentGateway> = Arc::new(gateway);
//! # Ok(())
//! # }
//! ```
//!
//! Requests are form-encoded with bearer authentication. Amounts are in
//! minor units throughout; the adapter never converts currency.

pub mod client;
pub mod events;
pub mod signature;
pub mod types;

// Re-export main types for convenience
pub use client::{StripeConfig, StripeGateway};
pub use signature::{SignatureError, signature_header};
