//! HMAC request signing shared by the gateway and its storefront caller.
//!
//! A signature is the hex-encoded HMAC-SHA256 of `timestamp + "." + body`,
//! computed over the exact raw body bytes as sent on the wire. Timestamps are
//! ISO-8601 and must fall within the tolerance window around the verifier's
//! clock.

use chrono::{DateTime, NaiveDateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the ISO-8601 signing timestamp.
pub const TIMESTAMP_HEADER: &str = "x-gateway-timestamp";
/// Header carrying the hex HMAC-SHA256 signature.
pub const SIGNATURE_HEADER: &str = "x-gateway-signature";

/// Default freshness window (5 minutes).
pub const DEFAULT_TOLERANCE_SECS: i64 = 300;

/// Reasons a signed request is rejected, in the order they are checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SignatureError {
    #[error("missing signature headers")]
    MissingHeaders,
    #[error("invalid timestamp")]
    InvalidTimestamp,
    #[error("timestamp outside allowed window")]
    OutsideWindow,
    #[error("signature mismatch")]
    Mismatch,
}

/// Outcome of a verification, mirroring the `{ok, reason}` contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verification {
    pub ok: bool,
    pub reason: Option<SignatureError>,
}

impl Verification {
    fn accepted() -> Self {
        Self {
            ok: true,
            reason: None,
        }
    }

    fn rejected(reason: SignatureError) -> Self {
        Self {
            ok: false,
            reason: Some(reason),
        }
    }

    pub fn into_result(self) -> Result<(), SignatureError> {
        match self.reason {
            Some(reason) => Err(reason),
            None => Ok(()),
        }
    }
}

/// Headers a caller attaches to a signed request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedHeaders {
    pub timestamp: String,
    pub signature: String,
}

pub fn sign(secret: &str, timestamp: &str, body: &[u8]) -> String {
    // HMAC accepts keys of any length, so new_from_slice cannot fail here
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return String::new(),
    };
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

/// Signs `body` with the current time, for callers of the gateway.
pub fn sign_request(secret: &str, body: &[u8]) -> SignedHeaders {
    let timestamp = Utc::now().to_rfc3339();
    let signature = sign(secret, &timestamp, body);
    SignedHeaders {
        timestamp,
        signature,
    }
}

pub fn verify(
    secret: Option<&str>,
    timestamp: Option<&str>,
    signature: Option<&str>,
    body: &[u8],
) -> Verification {
    verify_at(
        secret,
        timestamp,
        signature,
        body,
        Utc::now(),
        DEFAULT_TOLERANCE_SECS,
    )
}

/// Verification against an explicit clock and window.
pub fn verify_at(
    secret: Option<&str>,
    timestamp: Option<&str>,
    signature: Option<&str>,
    body: &[u8],
    now: DateTime<Utc>,
    tolerance_secs: i64,
) -> Verification {
    let (secret, timestamp, signature) = match (
        non_empty(secret),
        non_empty(timestamp),
        non_empty(signature),
    ) {
        (Some(secret), Some(timestamp), Some(signature)) => (secret, timestamp, signature),
        _ => return Verification::rejected(SignatureError::MissingHeaders),
    };

    let issued_at = match parse_timestamp(timestamp) {
        Some(at) => at,
        None => return Verification::rejected(SignatureError::InvalidTimestamp),
    };

    let skew = (now - issued_at).num_milliseconds().abs();
    if skew > tolerance_secs.saturating_mul(1000) {
        return Verification::rejected(SignatureError::OutsideWindow);
    }

    let expected = sign(secret, timestamp, body);
    let provided = signature.trim().to_ascii_lowercase();
    if !constant_time_eq(expected.as_bytes(), provided.as_bytes()) {
        return Verification::rejected(SignatureError::Mismatch);
    }

    Verification::accepted()
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

/// Accepts RFC 3339 and offset-less ISO-8601 (read as UTC).
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Some(parsed.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
        .map(|naive| naive.and_utc())
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}
