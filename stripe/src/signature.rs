//! `Stripe-Signature` header verification.
//!
//! The header looks like `t=1700000000,v1=5257a8...,v1=...`. Each `v1` is a
//! hex HMAC-SHA256 of `"{t}.{raw body}"` keyed with the endpoint's webhook
//! secret. Several `v1` entries appear while a secret is being rolled.

use constant_time_eq::constant_time_eq;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Why a signature header was rejected.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SignatureError {
    /// No `t=` entry, or it is not a Unix timestamp
    #[error("signature header has no valid timestamp")]
    MissingTimestamp,

    /// No `v1=` entry
    #[error("signature header has no v1 signature")]
    MissingSignature,

    /// The timestamp is outside the tolerance window
    #[error("signature timestamp outside tolerance ({age}s old)")]
    Expired {
        /// Seconds between the timestamp and now (negative if in the future)
        age: i64,
    },

    /// No `v1` signature matches the payload
    #[error("no signature matches the payload")]
    Mismatch,

    /// The secret cannot key an HMAC
    #[error("invalid webhook secret")]
    InvalidSecret,
}

/// Compute the hex `v1` signature of `payload` at `timestamp`.
///
/// # Errors
///
/// Returns [`SignatureError::InvalidSecret`] if `secret` cannot key an HMAC.
pub fn compute_signature(
    payload: &[u8],
    secret: &str,
    timestamp: i64,
) -> Result<String, SignatureError> {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| SignatureError::InvalidSecret)?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Build a complete header value, as Stripe would send it.
///
/// # Errors
///
/// Returns [`SignatureError::InvalidSecret`] if `secret` cannot key an HMAC.
pub fn signature_header(
    payload: &[u8],
    secret: &str,
    timestamp: i64,
) -> Result<String, SignatureError> {
    Ok(format!("t={timestamp},v1={}", compute_signature(payload, secret, timestamp)?))
}

/// Verify `header` against `payload` at time `now` (Unix seconds).
///
/// # Errors
///
/// Returns a [`SignatureError`] describing the first check that failed.
pub fn verify(
    payload: &[u8],
    header: &str,
    secret: &str,
    now: i64,
    tolerance_secs: i64,
) -> Result<(), SignatureError> {
    if secret.is_empty() {
        return Err(SignatureError::InvalidSecret);
    }

    let mut timestamp = None;
    let mut candidates = Vec::new();
    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => timestamp = value.parse::<i64>().ok(),
            Some(("v1", value)) => candidates.push(value),
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or(SignatureError::MissingTimestamp)?;
    if candidates.is_empty() {
        return Err(SignatureError::MissingSignature);
    }

    let age = now.saturating_sub(timestamp);
    if age.abs() > tolerance_secs {
        return Err(SignatureError::Expired { age });
    }

    let expected = compute_signature(payload, secret, timestamp)?;
    if candidates
        .iter()
        .any(|candidate| constant_time_eq(candidate.as_bytes(), expected.as_bytes()))
    {
        Ok(())
    } else {
        Err(SignatureError::Mismatch)
    }
}
