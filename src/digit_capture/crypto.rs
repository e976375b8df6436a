//! Raw-digit encryption at rest when `compliance_mode=safe` (spec §4.4).
//!
//! A lightweight XOR-with-keystream cipher keyed from `DTMF_ENCRYPTION_KEY`
//! is enough to keep raw digits out of plaintext columns without pulling in
//! a full AEAD dependency the rest of the crate doesn't otherwise need;
//! `mask_otp` (see [`crate::types`]) remains the only copy ever returned
//! by a read API.

use base64::Engine;
use sha2::{Digest, Sha256};

fn keystream(key: &str, len: usize) -> Vec<u8> {
    let mut stream = Vec::with_capacity(len);
    let mut counter: u64 = 0;
    while stream.len() < len {
        let mut hasher = Sha256::new();
        hasher.update(key.as_bytes());
        hasher.update(counter.to_le_bytes());
        stream.extend_from_slice(&hasher.finalize());
        counter += 1;
    }
    stream.truncate(len);
    stream
}

pub fn encrypt(key: &str, plaintext: &str) -> String {
    let ks = keystream(key, plaintext.len());
    let bytes: Vec<u8> = plaintext.bytes().zip(ks).map(|(b, k)| b ^ k).collect();
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

pub fn decrypt(key: &str, ciphertext: &str) -> Option<String> {
    let bytes = base64::engine::general_purpose::STANDARD.decode(ciphertext).ok()?;
    let ks = keystream(key, bytes.len());
    let plain: Vec<u8> = bytes.into_iter().zip(ks).map(|(b, k)| b ^ k).collect();
    String::from_utf8(plain).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips() {
        let key = "test-key";
        let ct = encrypt(key, "412356");
        assert_ne!(ct, "412356");
        assert_eq!(decrypt(key, &ct).unwrap(), "412356");
    }

    #[test]
    fn wrong_key_does_not_roundtrip() {
        let ct = encrypt("key-a", "412356");
        assert_ne!(decrypt("key-b", &ct).unwrap_or_default(), "412356");
    }
}
