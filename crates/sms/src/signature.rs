//! Webhook request authentication.
//!
//! The platform signs `"{timestamp}.{raw body}"` with HMAC-SHA256 using the
//! shared webhook secret and sends the lowercase hex digest alongside the
//! unix timestamp.

use {
    hmac::{Hmac, Mac},
    sha2::Sha256,
};

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "x-webhook-signature";
pub const TIMESTAMP_HEADER: &str = "x-webhook-timestamp";

/// Maximum distance between the signed timestamp and the local clock.
pub const MAX_TIMESTAMP_SKEW_SECS: u64 = 300;

/// Why a webhook request was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFailure {
    MissingHeaders,
    StaleTimestamp,
    BadSignature,
}

impl std::fmt::Display for AuthFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::MissingHeaders => "missing signature headers",
            Self::StaleTimestamp => "timestamp outside allowed window",
            Self::BadSignature => "signature mismatch",
        })
    }
}

/// Hex HMAC-SHA256 over `"{timestamp}.{payload}"`.
pub fn compute_signature(secret: &str, payload: &[u8], timestamp: &str) -> String {
    match mac_for(secret, payload, timestamp) {
        Some(mac) => hex::encode(mac.finalize().into_bytes()),
        None => String::new(),
    }
}

fn mac_for(secret: &str, payload: &[u8], timestamp: &str) -> Option<HmacSha256> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(payload);
    Some(mac)
}

/// Constant-time check of a hex signature. Malformed hex is a mismatch.
pub fn verify_signature(secret: &str, payload: &[u8], timestamp: &str, signature: &str) -> bool {
    let Ok(expected) = hex::decode(signature.trim()) else {
        return false;
    };
    let Some(mac) = mac_for(secret, payload, timestamp) else {
        return false;
    };
    mac.verify_slice(&expected).is_ok()
}

/// Whether `timestamp` (unix seconds) is within [`MAX_TIMESTAMP_SKEW_SECS`]
/// of `now`, in either direction.
pub fn is_timestamp_fresh(timestamp: &str, now: i64) -> bool {
    timestamp
        .trim()
        .parse::<i64>()
        .is_ok_and(|ts| ts.abs_diff(now) <= MAX_TIMESTAMP_SKEW_SECS)
}

/// Full request check: both headers present, fresh timestamp, valid
/// signature.
pub fn authenticate(
    secret: &str,
    timestamp: Option<&str>,
    signature: Option<&str>,
    payload: &[u8],
    now: i64,
) -> Result<(), AuthFailure> {
    let (Some(timestamp), Some(signature)) = (timestamp, signature) else {
        return Err(AuthFailure::MissingHeaders);
    };
    if !is_timestamp_fresh(timestamp, now) {
        return Err(AuthFailure::StaleTimestamp);
    }
    if !verify_signature(secret, payload, timestamp, signature) {
        return Err(AuthFailure::BadSignature);
    }
    Ok(())
}
