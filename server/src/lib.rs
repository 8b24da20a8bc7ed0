//! # Payment Saga Server
//!
//! Process wiring for the order-payment saga: environment configuration and
//! the HTTP Order Service client. The binary in `main.rs` assembles these with
//! the Postgres store, the Stripe gateway and the web router.

pub mod config;
pub mod order_client;

pub use config::{Config, ConfigError};
pub use order_client::HttpOrderService;
