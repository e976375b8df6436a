//! Stable request hashing for idempotency dedup (spec §4.8 enqueue:
//! "compute `request_hash` over the normalized request; a repeat
//! `Idempotency-Key` with a different hash is a conflict").

use sha2::{Digest, Sha256};
use serde_json::Value;

/// Hash the fields that define a delivery request's identity. Field
/// order is fixed so the same logical request always hashes the same
/// way regardless of how the caller built the JSON.
pub fn request_hash(
    to: &str,
    from: &str,
    subject: Option<&str>,
    template_id: Option<&str>,
    variables: Option<&Value>,
    html: Option<&str>,
    text: Option<&str>,
    send_at: Option<&str>,
) -> String {
    let mut hasher = Sha256::new();
    for part in [
        to,
        from,
        subject.unwrap_or(""),
        template_id.unwrap_or(""),
        &variables.map(|v| v.to_string()).unwrap_or_default(),
        html.unwrap_or(""),
        text.unwrap_or(""),
        send_at.unwrap_or(""),
    ] {
        hasher.update(part.as_bytes());
        hasher.update(b"\0");
    }
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_requests_hash_identically() {
        let a = request_hash("+15551234567", "+15557654321", None, None, None, None, Some("hi"), None);
        let b = request_hash("+15551234567", "+15557654321", None, None, None, None, Some("hi"), None);
        assert_eq!(a, b);
    }

    #[test]
    fn different_bodies_hash_differently() {
        let a = request_hash("+15551234567", "+15557654321", None, None, None, None, Some("hi"), None);
        let b = request_hash("+15551234567", "+15557654321", None, None, None, None, Some("bye"), None);
        assert_ne!(a, b);
    }
}
