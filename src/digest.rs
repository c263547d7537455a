//! Content hashing for atom versioning.
//!
//! The content hash decides whether an overwrite fossilizes the prior
//! version: same hash, no new history entry. The hash covers the raw UTF-8
//! bytes of the content text and nothing else (no id, domain, status or
//! timestamps), so it is stable across metadata changes.

use sha2::{Digest, Sha256};

/// Compute the SHA-256 content hash.
///
/// Returned as a 64-character lowercase hex string.
pub fn compute_content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

/// Result of checking a stored hash against actual content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HashValidation {
    /// Stored hash matches the content.
    Valid,
    /// No hash stored.
    Missing,
    /// Stored hash does not match the content.
    Mismatch {
        /// The hash that was stored.
        expected: String,
        /// The hash computed from the content.
        computed: String,
    },
}

/// Validate a stored content hash against actual content.
pub fn validate_content_hash(content: &str, stored: Option<&str>) -> HashValidation {
    match stored {
        None => HashValidation::Missing,
        Some(stored) => {
            let computed = compute_content_hash(content);
            if stored == computed {
                HashValidation::Valid
            } else {
                HashValidation::Mismatch {
                    expected: stored.to_string(),
                    computed,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_is_deterministic() {
        assert_eq!(compute_content_hash("x"), compute_content_hash("x"));
        assert_ne!(compute_content_hash("x"), compute_content_hash("y"));
    }

    #[test]
    fn test_known_vector() {
        // sha256 of the empty string
        assert_eq!(
            compute_content_hash(""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_validate() {
        let hash = compute_content_hash("content");
        assert_eq!(validate_content_hash("content", Some(&hash)), HashValidation::Valid);
        assert_eq!(validate_content_hash("content", None), HashValidation::Missing);
        match validate_content_hash("tampered", Some(&hash)) {
            HashValidation::Mismatch { expected, computed } => {
                assert_eq!(expected, hash);
                assert_eq!(computed, compute_content_hash("tampered"));
            }
            other => panic!("expected mismatch, got {other:?}"),
        }
    }
}
