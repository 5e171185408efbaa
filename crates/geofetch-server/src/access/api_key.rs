//! API-key check.
//!
//! Keys are compared as SHA-256 digests with a constant-time fold, so the
//! comparison cost depends on neither the key length nor the position of
//! the first differing byte.

use sha2::{Digest, Sha256};

/// Exact-match API key verification. Disabled when no key is configured.
#[derive(Clone)]
pub struct ApiKeyCheck {
    expected: Option<[u8; 32]>,
}

impl ApiKeyCheck {
    /// `None` (or an empty key) disables the check.
    pub fn new(key: Option<&str>) -> Self {
        Self {
            expected: key.filter(|k| !k.is_empty()).map(digest),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.expected.is_some()
    }

    /// Whether the presented key passes. Always `true` when disabled.
    pub fn verify(&self, presented: Option<&str>) -> bool {
        let Some(expected) = &self.expected else {
            return true;
        };
        let Some(presented) = presented else {
            return false;
        };
        let actual = digest(presented);
        expected
            .iter()
            .zip(actual.iter())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
    }
}

impl std::fmt::Debug for ApiKeyCheck {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiKeyCheck")
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

fn digest(key: &str) -> [u8; 32] {
    Sha256::digest(key.as_bytes()).into()
}

/// Short, non-reversible identifier for a key, used as the rate-limit
/// identity and in logs.
pub fn key_fingerprint(key: &str) -> String {
    hex::encode(&digest(key)[..8])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_check_accepts_anything() {
        let check = ApiKeyCheck::new(None);
        assert!(!check.is_enabled());
        assert!(check.verify(None));
        assert!(check.verify(Some("whatever")));

        let check = ApiKeyCheck::new(Some(""));
        assert!(!check.is_enabled());
        assert!(check.verify(None));
    }

    #[test]
    fn enabled_check_requires_exact_key() {
        let check = ApiKeyCheck::new(Some("s3cret"));
        assert!(check.verify(Some("s3cret")));
        assert!(!check.verify(None));
        assert!(!check.verify(Some("")));
        assert!(!check.verify(Some("s3cret ")));
        assert!(!check.verify(Some("S3CRET")));
    }

    #[test]
    fn fingerprint_is_stable_and_short() {
        assert_eq!(key_fingerprint("abc"), key_fingerprint("abc"));
        assert_ne!(key_fingerprint("abc"), key_fingerprint("abd"));
        assert_eq!(key_fingerprint("abc").len(), 16);
        assert!(!format!("{:?}", ApiKeyCheck::new(Some("abc"))).contains("abc"));
    }
}
