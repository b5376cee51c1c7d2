//! Content fingerprints
//!
//! Any stable digest would do for consensus; SHA-256 hex is used
//! everywhere so fingerprints and content addresses share one format.

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::SwarmResult;

/// Hex SHA-256 of raw bytes
pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Hex SHA-256 of a value's JSON encoding
pub fn fingerprint_json<T: Serialize + ?Sized>(value: &T) -> SwarmResult<String> {
    let encoded = serde_json::to_vec(value)?;
    Ok(content_hash(&encoded))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_content_hash_known_vector() {
        assert_eq!(
            content_hash(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_fingerprint_is_stable_and_content_sensitive() {
        let a = json!([{ "title": "Rust" }, { "title": "Ferris" }]);
        let b = json!([{ "title": "Rust" }, { "title": "Ferris" }]);
        let c = json!([{ "title": "Ferris" }, { "title": "Rust" }]);

        assert_eq!(fingerprint_json(&a).unwrap(), fingerprint_json(&b).unwrap());
        assert_ne!(fingerprint_json(&a).unwrap(), fingerprint_json(&c).unwrap());
    }
}
