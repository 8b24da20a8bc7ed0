//! HTTP request handlers.

pub mod health;
pub mod payments;

pub use health::{health_check, readiness_check};
