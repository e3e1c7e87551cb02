//! Deterministic hashing helpers used for ids, source hashes and prompt
//! fingerprints.

use sha2::{Digest, Sha256};

/// Full SHA-256 of `data` as lowercase hex.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// First `n` hex chars of SHA-256 over `data`. `n` is capped at 64.
pub fn short_sha256(data: &[u8], n: usize) -> String {
    let mut full = sha256_hex(data);
    full.truncate(n.min(64));
    full
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_is_stable() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn short_hash_is_prefix() {
        let full = sha256_hex(b"chatsift");
        assert_eq!(short_sha256(b"chatsift", 8), full[..8]);
        assert_eq!(short_sha256(b"chatsift", 100).len(), 64);
    }
}
