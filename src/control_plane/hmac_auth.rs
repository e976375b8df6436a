//! Request signing/verification for the control plane (spec §4.9, §6):
//! `Authorization: hmac <ts>.<nonce>.<sig>`, where
//! `sig = HMAC_SHA256(secret, ts|method|path|sha256(body))`.
//!
//! Structurally the same `Hmac<Sha256>` + `hex::encode` shape as
//! `provider::twilio`'s webhook validator, generalized with a timestamp
//! and nonce so a captured request can't be replayed outside the skew
//! window.

use std::time::{SystemTime, UNIX_EPOCH};

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

use crate::error::{OrchestratorError, Result};

type HmacSha256 = Hmac<Sha256>;

/// Compute the signature for one request. Exposed so callers (and tests)
/// can construct a valid `Authorization` header.
pub fn sign(secret: &str, ts: &str, method: &str, path: &str, body: &[u8]) -> String {
    let body_hash = hex::encode(Sha256::digest(body));
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("hmac accepts any key length");
    mac.update(format!("{ts}|{method}|{path}|{body_hash}").as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Parse an `Authorization: hmac <ts>.<nonce>.<sig>` header value.
pub struct ParsedAuth<'a> {
    pub ts: &'a str,
    pub nonce: &'a str,
    pub sig: &'a str,
}

pub fn parse_header(header: &str) -> Option<ParsedAuth<'_>> {
    let rest = header.strip_prefix("hmac ")?;
    let mut parts = rest.splitn(3, '.');
    let ts = parts.next()?;
    let nonce = parts.next()?;
    let sig = parts.next()?;
    if ts.is_empty() || nonce.is_empty() || sig.is_empty() {
        return None;
    }
    Some(ParsedAuth { ts, nonce, sig })
}

/// Verify a request's `Authorization` header against `secret`, rejecting
/// signatures outside `max_skew` of the current time.
pub fn verify(secret: &str, header: &str, method: &str, path: &str, body: &[u8], max_skew: std::time::Duration) -> Result<()> {
    let parsed = parse_header(header).ok_or_else(|| OrchestratorError::auth("malformed Authorization header"))?;

    let ts: i64 = parsed.ts.parse().map_err(|_| OrchestratorError::auth("malformed timestamp"))?;
    let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs() as i64;
    if (now - ts).unsigned_abs() > max_skew.as_secs() {
        return Err(OrchestratorError::auth("request timestamp outside allowed skew"));
    }

    let expected = sign(secret, parsed.ts, method, path, body);
    if !constant_time_eq(expected.as_bytes(), parsed.sig.as_bytes()) {
        return Err(OrchestratorError::auth("signature mismatch"));
    }
    Ok(())
}

/// Compares two byte strings without leaking which byte differs via
/// early-return timing.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_valid_signature() {
        let secret = "s3cret";
        let body = br#"{"phone_number":"+15551234567"}"#;
        let ts = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs().to_string();
        let sig = sign(secret, &ts, "POST", "/calls", body);
        let header = format!("hmac {ts}.abc123.{sig}");
        assert!(verify(secret, &header, "POST", "/calls", body, std::time::Duration::from_secs(300)).is_ok());
    }

    #[test]
    fn rejects_wrong_secret() {
        let body = b"{}";
        let ts = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs().to_string();
        let sig = sign("right", &ts, "POST", "/calls", body);
        let header = format!("hmac {ts}.n.{sig}");
        assert!(verify("wrong", &header, "POST", "/calls", body, std::time::Duration::from_secs(300)).is_err());
    }

    #[test]
    fn rejects_stale_timestamp() {
        let secret = "s3cret";
        let body = b"{}";
        let ts = "1000000000";
        let sig = sign(secret, ts, "POST", "/calls", body);
        let header = format!("hmac {ts}.n.{sig}");
        assert!(verify(secret, &header, "POST", "/calls", body, std::time::Duration::from_secs(300)).is_err());
    }

    #[test]
    fn rejects_tampered_path() {
        let secret = "s3cret";
        let body = b"{}";
        let ts = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs().to_string();
        let sig = sign(secret, &ts, "POST", "/calls", body);
        let header = format!("hmac {ts}.n.{sig}");
        assert!(verify(secret, &header, "POST", "/other", body, std::time::Duration::from_secs(300)).is_err());
    }
}
