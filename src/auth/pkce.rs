//! PKCE (RFC 7636) and anti-forgery state generation.

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use sha2::{Digest, Sha256};

/// Length of the opaque `state` value, in characters.
pub const STATE_LEN: usize = 32;

/// Length of the PKCE code verifier, in characters (RFC 7636 allows 43..=128).
pub const VERIFIER_LEN: usize = 64;

/// Generate a URL-safe random string of exactly `len` characters.
///
/// Draws `len` random bytes and truncates their base64url encoding, so the
/// result always carries more entropy than its length in characters.
#[must_use]
pub fn random_token(len: usize) -> String {
    let bytes: Vec<u8> = (0..len).map(|_| rand::random::<u8>()).collect();
    let mut encoded = URL_SAFE_NO_PAD.encode(bytes);
    encoded.truncate(len);
    encoded
}

/// Generate a fresh anti-forgery `state` value.
#[must_use]
pub fn generate_state() -> String {
    random_token(STATE_LEN)
}

/// Generate a fresh PKCE code verifier.
#[must_use]
pub fn generate_verifier() -> String {
    random_token(VERIFIER_LEN)
}

/// Compute the S256 code challenge: `BASE64URL(SHA256(verifier))`, no padding.
#[must_use]
pub fn code_challenge(verifier: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verifier_is_base64url_safe_and_sized() {
        for _ in 0..10 {
            let verifier = generate_verifier();
            assert_eq!(verifier.len(), VERIFIER_LEN);
            assert!(!verifier.contains('+'));
            assert!(!verifier.contains('/'));
            assert!(!verifier.contains('='));
        }
    }

    #[test]
    fn state_has_expected_length_and_is_unique() {
        let s1 = generate_state();
        let s2 = generate_state();
        assert_eq!(s1.len(), STATE_LEN);
        assert_ne!(s1, s2);
    }

    #[test]
    fn challenge_matches_rfc7636_appendix_b() {
        // RFC 7636 Appendix B test vector
        let verifier = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
        assert_eq!(
            code_challenge(verifier),
            "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM"
        );
    }

    #[test]
    fn challenge_has_no_padding() {
        let challenge = code_challenge(&generate_verifier());
        // SHA-256 = 32 bytes -> 43 base64url chars without padding
        assert_eq!(challenge.len(), 43);
        assert!(!challenge.contains('='));
    }
}
