//! Exponential backoff for order-confirmation retries.
//!
//! The confirmation queue persists the attempt count; this module only turns
//! that count into the next delay and decides when to give up.
//!
//! # Example
//!
//! ```rust
//! use payment_saga_runtime::retry::RetryPolicy;
//! use std::time::Duration;
//!
//! let policy = RetryPolicy::builder()
//!     .max_attempts(5)
//!     .initial_delay(Duration::from_millis(100))
//!     .max_delay(Duration::from_secs(10))
//!     .multiplier(2.0)
//!     .build();
//!
//! assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(100));
//! assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(200));
//! assert!(policy.is_exhausted(5));
//! ```

use std::time::Duration;

/// Retry policy configuration for exponential backoff.
///
/// # Default Values
///
/// - `max_attempts`: 8
/// - `initial_delay`: 1 second
/// - `max_delay`: 5 minutes
/// - `multiplier`: 2.0 (delay doubles each retry)
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total delivery attempts before a job is escalated
    pub max_attempts: u32,
    /// Delay after the first failed attempt
    pub initial_delay: Duration,
    /// Maximum delay between attempts (cap for exponential backoff)
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl RetryPolicy {
    /// Create a new policy builder.
    #[must_use]
    pub const fn builder() -> RetryPolicyBuilder {
        RetryPolicyBuilder {
            max_attempts: None,
            initial_delay: None,
            max_delay: None,
            multiplier: None,
        }
    }

    /// Delay to wait after `failed_attempts` failures.
    ///
    /// `initial_delay * multiplier ^ (failed_attempts - 1)`, capped at `max_delay`.
    #[must_use]
    pub fn delay_for_attempt(&self, failed_attempts: u32) -> Duration {
        let exponent = i32::try_from(failed_attempts.saturating_sub(1)).unwrap_or(i32::MAX);
        let secs = self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent);

        match Duration::try_from_secs_f64(secs) {
            Ok(delay) if delay <= self.max_delay => delay,
            _ => self.max_delay,
        }
    }

    /// Whether no attempts remain after `attempts` deliveries.
    #[must_use]
    pub const fn is_exhausted(&self, attempts: u32) -> bool {
        attempts >= self.max_attempts
    }
}

/// Builder for [`RetryPolicy`].
#[derive(Debug, Clone)]
pub struct RetryPolicyBuilder {
    max_attempts: Option<u32>,
    initial_delay: Option<Duration>,
    max_delay: Option<Duration>,
    multiplier: Option<f64>,
}

impl RetryPolicyBuilder {
    /// Set the attempt budget.
    #[must_use]
    pub const fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    /// Set the delay after the first failure.
    #[must_use]
    pub const fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = Some(delay);
        self
    }

    /// Set maximum delay (cap for exponential backoff).
    #[must_use]
    pub const fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = Some(delay);
        self
    }

    /// Set multiplier for exponential backoff.
    #[must_use]
    pub const fn multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = Some(multiplier);
        self
    }

    /// Build the [`RetryPolicy`].
    #[must_use]
    pub fn build(self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.unwrap_or(8).max(1),
            initial_delay: self.initial_delay.unwrap_or(Duration::from_secs(1)),
            max_delay: self.max_delay.unwrap_or(Duration::from_secs(300)),
            multiplier: self.multiplier.unwrap_or(2.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_default_schedule() {
        let policy = RetryPolicy::default();

        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_secs(4));
        assert_eq!(policy.delay_for_attempt(9), Duration::from_secs(256));
        assert_eq!(policy.delay_for_attempt(10), Duration::from_secs(300));
    }

    #[test]
    fn test_retry_policy_max_delay_cap() {
        let policy = RetryPolicy::builder()
            .initial_delay(Duration::from_millis(1000))
            .multiplier(10.0)
            .max_delay(Duration::from_secs(2))
            .build();

        // 1000ms * 10^5 = 100,000,000ms, but capped at 2000ms
        assert_eq!(policy.delay_for_attempt(6), Duration::from_secs(2));
    }

    #[test]
    fn test_exhaustion() {
        let policy = RetryPolicy::builder().max_attempts(3).build();
        assert!(!policy.is_exhausted(2));
        assert!(policy.is_exhausted(3));
    }

    proptest! {
        #[test]
        fn delays_are_monotonic_and_capped(attempt in 1u32..10_000) {
            let policy = RetryPolicy::default();
            let delay = policy.delay_for_attempt(attempt);
            prop_assert!(delay <= policy.max_delay);
            prop_assert!(delay <= policy.delay_for_attempt(attempt + 1));
        }
    }
}
