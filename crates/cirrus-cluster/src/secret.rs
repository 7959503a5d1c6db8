//! Discovery-time shared secret.
//!
//! The secret is generated when peers find each other and stays fixed for the
//! rest of the node's uninitiated lifetime. It is compared through SHA-256
//! digests with constant-time equality, so neither the length nor a matching
//! prefix of the expected value leaks through timing.

use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// Incoming values are checked against `digest` only. `value` is kept for
/// authenticating this node's own outgoing calls.
#[derive(Clone)]
pub struct AuthSecret {
    value: String,
    digest: [u8; 32],
}

impl AuthSecret {
    pub fn new(value: impl Into<String>) -> Self {
        let value = value.into();
        let digest = sha256(value.as_bytes());
        Self { value, digest }
    }

    /// `true` when `presented` equals this secret byte for byte.
    pub fn matches(&self, presented: impl AsRef<[u8]>) -> bool {
        let candidate = sha256(presented.as_ref());
        self.digest.ct_eq(&candidate).into()
    }

    /// Raw value, for attaching to outgoing requests only.
    pub fn expose(&self) -> &str {
        &self.value
    }
}

impl std::fmt::Debug for AuthSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AuthSecret(<redacted>)")
    }
}

fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_only_exact_value() {
        let secret = AuthSecret::new("s3cret");
        assert!(secret.matches("s3cret"));
        assert!(!secret.matches("s3cre"));
        assert!(!secret.matches("s3cret "));
        assert!(!secret.matches(""));
    }

    #[test]
    fn debug_never_prints_value() {
        let secret = AuthSecret::new("hunter2");
        let shown = format!("{secret:?}");
        assert!(!shown.contains("hunter2"));
    }
}
