//! Size-based eviction support.
//!
//! The bounded segment variant shares one [`SizeControl`] across all
//! segments: a global live-entry counter plus a [`FrequencySketch`] that
//! approximates per-key access frequency. Victim selection samples candidate
//! entries from the segments and drops the one with the lowest
//! (frequency, last-used) pair, so the policy behaves like a sampled
//! TinyLFU.

use crate::sync::{AtomicU8, AtomicU64, AtomicUsize, Ordering};
use std::hash::{BuildHasher, Hash};

/// Number of independent counter rows in the sketch.
const DEPTH: usize = 4;

/// Counters saturate here to leave headroom under concurrent increments.
const COUNTER_CEILING: u8 = 240;

// Per-row seeds; any fixed distinct values work.
const ROW_SEEDS: [[u64; 4]; DEPTH] = [
    [0x9ae1_6a3b_2f90_404f, 0x5851_f42d_4c95_7f2d, 0x1405_7b7e_f767_814f, 0x2b32_4c48_78f9_7b4d],
    [0xda94_2042_e4dd_58b5, 0x1571_8a10_48db_06c1, 0x8f1b_3c7a_2e65_d1a3, 0x452a_1d61_38b0_9f27],
    [0x6c62_272e_07bb_0142, 0x3b9a_ca00_5e4d_6b29, 0x7f4a_7c15_9e37_79b9, 0x94d0_49bb_1331_11eb],
    [0xff51_afd7_ed55_8ccd, 0xc4ce_b9fe_1a85_ec53, 0x2545_f491_4f6c_dd1d, 0x9e6c_63d0_876a_33e1],
];

/// Approximate per-key access frequency (count-min sketch).
///
/// Reads and writes on the bounded variant record into the sketch; after a
/// sample-size worth of recordings all counters are halved so stale
/// popularity decays.
pub struct FrequencySketch {
    width_mask: u64,
    rows: Vec<Vec<AtomicU8>>,
    additions: AtomicU64,
    sample_size: u64,
    hashers: Vec<ahash::RandomState>,
}

impl FrequencySketch {
    /// Create a sketch sized for roughly `capacity` resident entries.
    pub fn new(capacity: usize) -> Self {
        let width = capacity.max(16).next_power_of_two();
        let rows = (0..DEPTH)
            .map(|_| (0..width).map(|_| AtomicU8::new(0)).collect())
            .collect();
        let hashers = ROW_SEEDS
            .iter()
            .map(|s| ahash::RandomState::with_seeds(s[0], s[1], s[2], s[3]))
            .collect();
        Self {
            width_mask: (width - 1) as u64,
            rows,
            additions: AtomicU64::new(0),
            sample_size: (capacity as u64).saturating_mul(10).max(160),
            hashers,
        }
    }

    /// Record one access to `key`.
    pub fn record<T: Hash + ?Sized>(&self, key: &T) {
        for (row, hasher) in self.rows.iter().zip(&self.hashers) {
            let idx = (hasher.hash_one(key) & self.width_mask) as usize;
            let counter = &row[idx];
            if counter.load(Ordering::Relaxed) < COUNTER_CEILING {
                counter.fetch_add(1, Ordering::Relaxed);
            }
        }
        if self.additions.fetch_add(1, Ordering::Relaxed) + 1 >= self.sample_size
            && self.additions.swap(0, Ordering::Relaxed) >= self.sample_size
        {
            self.age();
        }
    }

    /// Estimate how often `key` has been accessed recently.
    pub fn estimate<T: Hash + ?Sized>(&self, key: &T) -> u8 {
        self.rows
            .iter()
            .zip(&self.hashers)
            .map(|(row, hasher)| {
                let idx = (hasher.hash_one(key) & self.width_mask) as usize;
                row[idx].load(Ordering::Relaxed)
            })
            .min()
            .unwrap_or(0)
    }

    /// Halve every counter so old popularity fades.
    fn age(&self) {
        for row in &self.rows {
            for counter in row {
                let v = counter.load(Ordering::Relaxed);
                counter.store(v >> 1, Ordering::Relaxed);
            }
        }
    }
}

/// Shared state for all bounded segments of one container.
pub(crate) struct SizeControl {
    capacity: AtomicUsize,
    len: AtomicUsize,
    pub(crate) sketch: FrequencySketch,
}

impl SizeControl {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            capacity: AtomicUsize::new(capacity),
            len: AtomicUsize::new(0),
            sketch: FrequencySketch::new(capacity),
        }
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity.load(Ordering::Acquire)
    }

    pub(crate) fn set_capacity(&self, capacity: usize) {
        self.capacity.store(capacity, Ordering::Release);
    }

    pub(crate) fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    pub(crate) fn entry_added(&self) {
        self.len.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn entry_removed(&self) {
        self.len.fetch_sub(1, Ordering::AcqRel);
    }

    pub(crate) fn entries_removed(&self, n: usize) {
        self.len.fetch_sub(n, Ordering::AcqRel);
    }

    pub(crate) fn over_capacity(&self) -> bool {
        self.len() > self.capacity()
    }
}
