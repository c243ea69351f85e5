//! Challenge/response authentication.
//!
//! The device opens every session by sending a one-time nonce. The client
//! proves knowledge of the shared secret by replying with
//! `hex(SHA-256(secret + nonce))` as the payload of a `challenge` operation;
//! the secret itself never goes over the wire.
//!
//! The client does not validate nonce freshness or device identity. For a
//! closed, single-device pairing this trusts the transport's integrity,
//! which is an accepted limitation rather than a defect.

// ============================================================================
// Imports
// ============================================================================

use sha2::{Digest, Sha256};

// ============================================================================
// Digest
// ============================================================================

/// Computes the lowercase hex digest sent in reply to a challenge.
#[must_use]
pub fn challenge_digest(secret: &str, nonce: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    hasher.update(nonce.as_bytes());
    hex::encode(hasher.finalize())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_digest() {
        // SHA-256("pwabc123")
        assert_eq!(
            challenge_digest("pw", "abc123"),
            "158aeffbd2d075b5ff08b5dabfa156c23e1279825d5fafefb463135d7fb8721e"
        );
    }

    #[test]
    fn test_secret_and_nonce_are_concatenated() {
        // SHA-256("secretnonce")
        assert_eq!(
            challenge_digest("secret", "nonce"),
            "070506da080440f9c3df82e071fb04bc1a16136c5a9237975796101c287d9f17"
        );
    }

    #[test]
    fn test_empty_nonce_hashes_secret_alone() {
        // SHA-256("pw")
        assert_eq!(
            challenge_digest("pw", ""),
            "30c952fab122c3f9759f02a6d95c3758b246b4fee239957b2d4fee46e26170c4"
        );
    }

    #[test]
    fn test_digest_is_lowercase_hex() {
        let digest = challenge_digest("a", "b");
        assert_eq!(digest.len(), 64);
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }
}
