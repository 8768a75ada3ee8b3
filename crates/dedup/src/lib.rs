//! Content hashing used to derive the `HashKey` identities the block index
//! and block volumes key their rows on. Deduplication itself — the
//! find-or-insert protocol against the shared index — lives in
//! `block-index`; this crate only supplies the hash function its keys are
//! built from, matching the split the original spec draws between "content
//! hashing of source files" (a Non-goal) and the block-level hash identity
//! the pipeline does own.

use common::HashKey;

/// Compute the BLAKE3 hash of `data` and return it as a hex-encoded
/// `HashKey`.
pub fn hash_content(data: &[u8]) -> HashKey {
    let hash = blake3::hash(data);
    HashKey::new(hash.to_hex().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_bytes_hash_identically() {
        let a = hash_content(b"deduplicating backup engine");
        let b = hash_content(b"deduplicating backup engine");
        let c = hash_content(b"a different payload");

        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn hash_is_stable_hex() {
        let hash = hash_content(b"");
        assert_eq!(hash.as_str().len(), 64);
        assert!(hash.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }
}
