//! Key-to-segment partitioning.
//!
//! The container treats the partitioner as opaque: any pure function from a
//! key to a segment index works, as long as every node in the cluster
//! computes the same index for the same key.

use std::hash::{BuildHasher, Hash};

/// Pure function mapping a key to a segment index in `[0, segment_count)`.
pub trait KeyPartitioner<K>: Send + Sync {
    /// The segment the key belongs to.
    fn segment(&self, key: &K) -> usize;

    /// Number of segments this partitioner distributes over.
    fn segment_count(&self) -> usize;
}

// Fixed seeds so every node derives the same segment for the same key.
const SEED_0: u64 = 0x1735_1b7e_9dd5_62e5;
const SEED_1: u64 = 0xc0a3_91fb_0f6e_8d24;
const SEED_2: u64 = 0x9e37_79b9_7f4a_7c15;
const SEED_3: u64 = 0x6a09_e667_f3bc_c909;

/// Hash-based [`KeyPartitioner`] with cluster-stable seeds.
#[derive(Debug, Clone)]
pub struct HashPartitioner {
    segments: usize,
    hasher: ahash::RandomState,
}

impl HashPartitioner {
    /// Create a partitioner over `segments` segments.
    ///
    /// # Panics
    ///
    /// Panics if `segments` is zero.
    pub fn new(segments: usize) -> Self {
        assert!(segments > 0, "segment count must be non-zero");
        Self {
            segments,
            hasher: ahash::RandomState::with_seeds(SEED_0, SEED_1, SEED_2, SEED_3),
        }
    }
}

impl<K: Hash> KeyPartitioner<K> for HashPartitioner {
    #[inline]
    fn segment(&self, key: &K) -> usize {
        (self.hasher.hash_one(key) % self.segments as u64) as usize
    }

    fn segment_count(&self) -> usize {
        self.segments
    }
}
