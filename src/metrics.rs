//! Container statistics.
//!
//! Counters are plain atomics incremented on the hot path; [`CounterSnapshot`]
//! is the point-in-time view handed to callers.

use crate::sync::{AtomicU64, Ordering};

/// Atomic operation counters for a container.
#[derive(Debug)]
pub struct AtomicCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    stores: AtomicU64,
    removes: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
}

impl AtomicCounters {
    /// Create zeroed counters.
    pub fn new() -> Self {
        Self {
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            stores: AtomicU64::new(0),
            removes: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            expirations: AtomicU64::new(0),
        }
    }

    /// Record a read that found a live entry.
    #[inline]
    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a read that found nothing.
    #[inline]
    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a store.
    #[inline]
    pub fn record_store(&self) {
        self.stores.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an explicit removal.
    #[inline]
    pub fn record_remove(&self) {
        self.removes.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an eviction (size-based or policy-initiated).
    #[inline]
    pub fn record_eviction(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a confirmed in-memory expiration.
    #[inline]
    pub fn record_expiration(&self) {
        self.expirations.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time snapshot of all counters.
    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            stores: self.stores.load(Ordering::Relaxed),
            removes: self.removes.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
        }
    }
}

impl Default for AtomicCounters {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time counter values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CounterSnapshot {
    /// Reads that found a live entry.
    pub hits: u64,
    /// Reads that found nothing.
    pub misses: u64,
    /// Stores.
    pub stores: u64,
    /// Explicit removals.
    pub removes: u64,
    /// Evictions.
    pub evictions: u64,
    /// Confirmed in-memory expirations.
    pub expirations: u64,
}

#[cfg(all(test, not(feature = "loom")))]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let c = AtomicCounters::new();
        c.record_hit();
        c.record_hit();
        c.record_miss();
        c.record_store();
        c.record_remove();
        c.record_eviction();
        c.record_expiration();
        let snap = c.snapshot();
        assert_eq!(snap.hits, 2);
        assert_eq!(snap.misses, 1);
        assert_eq!(snap.stores, 1);
        assert_eq!(snap.removes, 1);
        assert_eq!(snap.evictions, 1);
        assert_eq!(snap.expirations, 1);
    }

    #[test]
    fn test_snapshot_is_stable() {
        let c = AtomicCounters::new();
        c.record_hit();
        let a = c.snapshot();
        c.record_hit();
        let b = c.snapshot();
        assert_eq!(a.hits, 1);
        assert_eq!(b.hits, 2);
    }
}
