//! Key bucketing for keymesh
//!
//! Orphaned keys (keys with no live holder) are assigned to a cluster
//! node with a stable hash: every agent that sees the same key and the
//! same cluster size picks the same node index.

use crate::common::utils::normalize_key;

/// Map a key to a bucket index in `0..n`.
///
/// Deterministic across processes and architectures: the low 8 bytes of
/// the BLAKE3 digest are read little-endian and reduced modulo `n`. The
/// key is normalized first so `"k"` and `"/k"` land in the same bucket.
pub fn key_bucket(key: &str, n: usize) -> usize {
    if n == 0 {
        return 0;
    }
    let key = normalize_key(key);
    let digest = blake3::hash(key.as_bytes());
    let x = u64::from_le_bytes(digest.as_bytes()[0..8].try_into().unwrap());
    (x % n as u64) as usize
}
