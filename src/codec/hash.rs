use sha2::{Digest, Sha256};

use crate::error::{MetricsError, Result};

/// Header carrying the keyed body digest
pub const HASH_HEADER: &str = "HashSHA256";

/// Hex-encoded SHA-256 of `body ‖ key`
pub fn sign(body: &[u8], key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(body);
    hasher.update(key.as_bytes());
    hex::encode(hasher.finalize())
}

/// Check a received digest against the body
pub fn verify(body: &[u8], key: &str, received: &str) -> Result<()> {
    let expected = sign(body, key);
    if expected.eq_ignore_ascii_case(received.trim()) {
        Ok(())
    } else {
        Err(MetricsError::Integrity("The data is corrupted".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_is_keyed() {
        let body = b"testBody";
        assert_eq!(sign(body, "testKey"), sign(body, "testKey"));
        assert_ne!(sign(body, "testKey"), sign(body, "otherKey"));
        assert_eq!(sign(body, "testKey").len(), 64);
    }

    #[test]
    fn test_verify_detects_flipped_byte() {
        let mut body = b"[{\"id\":\"Alloc\"}]".to_vec();
        let digest = sign(&body, "secret");
        assert!(verify(&body, "secret", &digest).is_ok());

        body[3] ^= 0x01;
        assert!(matches!(
            verify(&body, "secret", &digest),
            Err(MetricsError::Integrity(_))
        ));
    }
}
