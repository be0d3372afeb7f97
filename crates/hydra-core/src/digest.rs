//! SHA-256 digesting for finding identity, cache keys, and fingerprints.
//!
//! All identity-bearing hashes in Hydra are SHA-256; shortened forms are
//! 12- or 16-hex-character prefixes of the full digest.

use sha2::{Digest as Sha2Digest, Sha256};

/// Full SHA-256 hex digest of `data`.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// 12-hex-character prefix of the SHA-256 digest of `data`.
///
/// Used for repo ids and the path component of cache keys.
pub fn hash12(data: &[u8]) -> String {
    sha256_hex(data).chars().take(12).collect()
}

/// 16-hex-character prefix of the SHA-256 digest of `data`.
///
/// Used for finding ids.
pub fn hash16(data: &[u8]) -> String {
    sha256_hex(data).chars().take(16).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_hex_is_64_chars() {
        let d = sha256_hex(b"hello world");
        assert_eq!(d.len(), 64);
        assert!(d.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn digest_deterministic() {
        assert_eq!(sha256_hex(b"test data"), sha256_hex(b"test data"));
    }

    #[test]
    fn different_data_different_hash() {
        assert_ne!(sha256_hex(b"data a"), sha256_hex(b"data b"));
    }

    #[test]
    fn prefixes_match_full_digest() {
        let full = sha256_hex(b"prefix check");
        assert_eq!(hash12(b"prefix check"), full[..12]);
        assert_eq!(hash16(b"prefix check"), full[..16]);
    }
}
