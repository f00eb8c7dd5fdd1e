//! Request fingerprints.
//!
//! A fingerprint is a SHA-256 digest over every dimension that changes the
//! logical answer: principal, model, prompt, temperature (two decimals) and
//! max-token budget. Each field is length-prefixed so that no two distinct
//! tuples share a preimage.

use sha2::{Digest, Sha256};

const KEY_PREFIX: &str = "cache:inference:";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestFingerprint(String);

impl RequestFingerprint {
    pub fn compute(
        principal: &str,
        model: &str,
        prompt: &str,
        temperature: f32,
        max_tokens: u32,
    ) -> Self {
        let temperature = format!("{temperature:.2}");
        let max_tokens = max_tokens.to_string();

        let mut hasher = Sha256::new();
        for field in [principal, model, prompt, &temperature, &max_tokens] {
            hasher.update((field.len() as u64).to_be_bytes());
            hasher.update(field.as_bytes());
        }
        Self(hex::encode(hasher.finalize()))
    }

    /// Lowercase hex digest.
    pub fn digest(&self) -> &str {
        &self.0
    }

    /// The store key, `cache:inference:<hex>`.
    pub fn key(&self) -> String {
        format!("{KEY_PREFIX}{}", self.0)
    }
}

impl std::fmt::Display for RequestFingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> RequestFingerprint {
        RequestFingerprint::compute("user-1", "gpt-4o-mini", "prompt", 0.7, 1024)
    }

    #[test]
    fn stable_for_same_inputs() {
        for _ in 0..3 {
            assert_eq!(base(), base());
        }
        assert_eq!(base().digest().len(), 64);
        assert!(base().key().starts_with("cache:inference:"));
    }

    #[test]
    fn every_dimension_changes_the_fingerprint() {
        let variants = [
            RequestFingerprint::compute("user-2", "gpt-4o-mini", "prompt", 0.7, 1024),
            RequestFingerprint::compute("user-1", "gpt-4o", "prompt", 0.7, 1024),
            RequestFingerprint::compute("user-1", "gpt-4o-mini", "prompt-2", 0.7, 1024),
            RequestFingerprint::compute("user-1", "gpt-4o-mini", "prompt", 0.9, 1024),
            RequestFingerprint::compute("user-1", "gpt-4o-mini", "prompt", 0.7, 2048),
        ];
        for (i, fp) in variants.iter().enumerate() {
            assert_ne!(*fp, base(), "dimension {i} did not change the fingerprint");
        }
    }

    #[test]
    fn temperature_compared_at_two_decimals() {
        let a = RequestFingerprint::compute("u", "m", "p", 0.7, 1);
        let b = RequestFingerprint::compute("u", "m", "p", 0.701, 1);
        assert_eq!(a, b);
    }

    #[test]
    fn field_boundaries_are_unambiguous() {
        let a = RequestFingerprint::compute("a:b", "c", "p", 0.7, 1);
        let b = RequestFingerprint::compute("a", "b:c", "p", 0.7, 1);
        assert_ne!(a, b);
    }
}
