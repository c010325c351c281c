//! Content hashing for store keys.
//!
//! Keys are hashed with 32-bit FNV-1a followed by a xor-shift finalizer.
//! The FNV constants (offset `0x811C9DC5`, prime `0x01000193`) and the
//! finalizer are fixed; any future cross-process or persisted use of key
//! hashes depends on every build producing identical values.

/// FNV-1a offset basis (32-bit).
const FNV_OFFSET: u32 = 0x811C_9DC5;

/// FNV-1a prime (32-bit).
const FNV_PRIME: u32 = 0x0100_0193;

/// Hashes `bytes` with FNV-1a-32 and the trailing mix.
///
/// Used to place keys into shards; equal byte sequences always land in the
/// same shard regardless of how the key was allocated.
#[inline]
pub fn content_hash(bytes: &[u8]) -> u32 {
    mix(fnv1a(bytes))
}

#[inline]
fn fnv1a(bytes: &[u8]) -> u32 {
    let mut hash = FNV_OFFSET;
    for &b in bytes {
        hash ^= u32::from(b);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

#[inline]
fn mix(mut hash: u32) -> u32 {
    hash = hash.wrapping_add(hash << 13);
    hash ^= hash >> 7;
    hash = hash.wrapping_add(hash << 3);
    hash ^= hash >> 17;
    hash = hash.wrapping_add(hash << 5);
    hash
}
