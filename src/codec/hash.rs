//! Content hashes for strings that look like encoded literals.

use sha2::{Digest, Sha256};

/// SHA-256 of the UTF-8 text, lowercase hex.
pub fn content_hash(text: &str) -> String {
    hex::encode(Sha256::digest(text.as_bytes()))
}

/// Recompute the hash of `text` and compare it with a stored one.
pub fn verify(text: &str, expected: &str) -> bool {
    content_hash(text).eq_ignore_ascii_case(expected)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_digest() {
        assert_eq!(
            content_hash("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_verify_is_case_insensitive() {
        let h = content_hash("$point({x:1,y:2})").to_uppercase();
        assert!(verify("$point({x:1,y:2})", &h));
        assert!(!verify("$point({x:1,y:3})", &h));
    }
}
