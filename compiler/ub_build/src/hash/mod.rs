//! Content hashing.
//!
//! Fast non-cryptographic hashes over file contents, used by the cache
//! gate to decide whether a phase's inputs changed since the last
//! successful run.

use std::hash::{Hash, Hasher};
use std::ops::BitXor;

use serde::{Deserialize, Serialize};

/// A content hash of a file, a byte buffer or a combination of hashes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContentHash(u64);

impl ContentHash {
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    #[must_use]
    pub const fn value(&self) -> u64 {
        self.0
    }

    /// Format as a 16-digit hex string.
    #[must_use]
    pub fn to_hex(&self) -> String {
        format!("{:016x}", self.0)
    }

    pub fn from_hex(s: &str) -> Option<Self> {
        u64::from_str_radix(s, 16).ok().map(Self)
    }
}

impl std::fmt::Display for ContentHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// A fast, non-cryptographic hasher based on `FxHash`.
///
/// Unlike `std`'s default hasher its output is stable across processes,
/// which the on-disk stamps rely on.
#[derive(Default)]
pub struct FxHasher {
    hash: u64,
}

impl FxHasher {
    const K: u64 = 0x517c_c1b7_2722_0a95;
}

impl Hasher for FxHasher {
    fn write(&mut self, bytes: &[u8]) {
        for byte in bytes {
            self.hash = self
                .hash
                .rotate_left(5)
                .bitxor(u64::from(*byte))
                .wrapping_mul(Self::K);
        }
    }

    fn finish(&self) -> u64 {
        self.hash
    }
}

#[must_use]
pub fn hash_string(s: &str) -> ContentHash {
    let mut hasher = FxHasher::default();
    s.hash(&mut hasher);
    ContentHash(hasher.finish())
}

#[must_use]
pub fn hash_bytes(data: &[u8]) -> ContentHash {
    let mut hasher = FxHasher::default();
    data.hash(&mut hasher);
    ContentHash(hasher.finish())
}

/// Combine hashes in order; the result depends on the order.
#[must_use]
pub fn combine_hashes(hash_list: &[ContentHash]) -> ContentHash {
    let mut state = FxHasher::default();
    for hash in hash_list {
        hash.0.hash(&mut state);
    }
    ContentHash(state.finish())
}
