//! HMAC-signed request verification.
//!
//! Gateways sign every request over the canonical string
//! `METHOD\nPATH?QUERY\nTIMESTAMP\nBODY` with HMAC-SHA256 under a shared
//! secret, and carry the signature and unix-seconds timestamp in headers.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::Error;

type HmacSha256 = Hmac<Sha256>;

/// Maximum tolerated clock skew between gateway and coordinator, in seconds.
pub const MAX_SKEW_SECONDS: i64 = 300;

pub const SIGNATURE_HEADER: &str = "x-gateway-signature";
pub const TIMESTAMP_HEADER: &str = "x-gateway-timestamp";

/// Compute the lowercase hex HMAC-SHA256 signature for a request.
///
/// Shared with gateway client code and tests so both sides agree on the
/// canonical string.
pub fn sign(secret: &str, method: &str, path_and_query: &str, timestamp: i64, body: &str) -> String {
    let canonical = format!(
        "{}\n{}\n{}\n{}",
        method.to_uppercase(),
        path_and_query,
        timestamp,
        body
    );
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts keys of any length");
    mac.update(canonical.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Verify a gateway-signed request before any further processing.
///
/// Fails `ServiceUnavailable` when no shared secret is configured, and
/// `Unauthenticated` for missing headers, a malformed signature or
/// timestamp, a timestamp outside the replay window, or a signature
/// mismatch.
pub fn verify_signed_request(
    secret: Option<&str>,
    method: &str,
    path_and_query: &str,
    signature: Option<&str>,
    timestamp: Option<&str>,
    body: &str,
    now_seconds: i64,
) -> Result<(), Error> {
    let secret = secret.ok_or_else(|| {
        Error::ServiceUnavailable("gateway auth secret not configured".to_string())
    })?;

    let signature = signature
        .map(|s| s.trim().to_ascii_lowercase())
        .filter(|s| !s.is_empty());
    let timestamp = timestamp.map(str::trim).filter(|s| !s.is_empty());
    let (Some(signature), Some(timestamp)) = (signature, timestamp) else {
        return Err(Error::Unauthenticated(
            "missing gateway auth headers".to_string(),
        ));
    };

    if !is_hex_signature(&signature) {
        return Err(Error::Unauthenticated(
            "invalid gateway signature format".to_string(),
        ));
    }

    let timestamp: i64 = timestamp
        .parse()
        .map_err(|_| Error::Unauthenticated("invalid gateway timestamp".to_string()))?;
    if (now_seconds - timestamp).abs() > MAX_SKEW_SECONDS {
        return Err(Error::Unauthenticated(
            "gateway timestamp outside allowed window".to_string(),
        ));
    }

    let expected = sign(secret, method, path_and_query, timestamp, body);
    if !constant_time_eq(signature.as_bytes(), expected.as_bytes()) {
        return Err(Error::Unauthenticated(
            "invalid gateway signature".to_string(),
        ));
    }

    Ok(())
}

fn is_hex_signature(s: &str) -> bool {
    s.len() == 64 && s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

/// Equal-length byte comparison that never short-circuits.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut mismatch = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        mismatch |= x ^ y;
    }
    mismatch == 0
}
