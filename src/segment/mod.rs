//! Per-segment concurrent maps.
//!
//! A segment map holds the live entries of one segment and provides atomic
//! per-key read-modify-write through [`SegmentMap::compute`]. Two variants
//! exist: [`UnboundedSegment`] is a plain concurrent map, and
//! [`BoundedSegment`] additionally feeds a shared frequency sketch and emits
//! removal notifications so the container can drive size-based eviction.

mod bounded;
mod unbounded;

pub use bounded::BoundedSegment;
pub use unbounded::UnboundedSegment;

use crate::entry::CacheEntry;
use crate::error::CollaboratorError;
use std::sync::Arc;

/// Why an entry left a bounded segment map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalCause {
    /// Chosen by the size policy.
    Size,
    /// Removed by an explicit operation (remove, evict, clear).
    Explicit,
    /// Replaced by a newer entry for the same key.
    Replaced,
}

/// Notifications emitted by bounded segment maps.
///
/// The container supplies one implementation that bridges to the
/// passivation, eviction, and activation collaborators.
pub trait EvictionCallbacks<K, V>: Send + Sync {
    /// Pre-removal write hook for a size-based eviction; failure aborts the
    /// eviction and leaves the entry in place.
    fn on_entry_chosen_for_eviction(
        &self,
        entry: &Arc<CacheEntry<K, V>>,
    ) -> Result<(), CollaboratorError>;

    /// Post-removal notification for a size-based eviction.
    fn on_entry_eviction(&self, evicted: &[Arc<CacheEntry<K, V>>]);

    /// An entry was removed explicitly.
    fn on_entry_removed(&self, entry: &Arc<CacheEntry<K, V>>);

    /// An entry was replaced; activation bookkeeping may purge a staged
    /// persisted copy.
    fn on_entry_activated(&self, key: &K);
}

/// Compute closure: observes the previous entry and returns the next one.
///
/// Returning `None` removes, returning the same `Arc` is a no-op, returning
/// a new `Arc` replaces. An `Err` rolls the slot back to the previous entry.
pub type ComputeFn<'a, K, V> = dyn FnMut(
        &K,
        Option<&Arc<CacheEntry<K, V>>>,
    ) -> Result<Option<Arc<CacheEntry<K, V>>>, CollaboratorError>
    + 'a;

/// Map from key to entry for a single segment.
///
/// Each segment map is an independent lock domain; `compute` holds the
/// segment's write lock for the duration of the closure, which gives the
/// per-key mutual exclusion the container's callbacks rely on.
pub trait SegmentMap<K, V>: Send + Sync {
    /// Read an entry. Bounded variants record the access for the policy.
    fn get(&self, key: &K) -> Option<Arc<CacheEntry<K, V>>>;

    /// Read an entry with no side effects of any kind.
    fn peek(&self, key: &K) -> Option<Arc<CacheEntry<K, V>>>;

    /// Atomic per-key read-modify-write.
    fn compute(
        &self,
        key: K,
        f: &mut ComputeFn<'_, K, V>,
    ) -> Result<Option<Arc<CacheEntry<K, V>>>, CollaboratorError>;

    /// Number of entries, including expired ones.
    fn len(&self) -> usize;

    /// Whether the segment holds no entries.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove all entries. Bounded variants notify each removal as
    /// [`RemovalCause::Explicit`].
    fn clear(&self);

    /// Weakly consistent copy of the current entries.
    fn snapshot(&self) -> Vec<Arc<CacheEntry<K, V>>>;

    /// Append up to `max` arbitrary entries to `out` for victim sampling.
    fn sample(&self, max: usize, out: &mut Vec<Arc<CacheEntry<K, V>>>);

    /// Remove `expected` for size reasons if it is still the current entry
    /// for `key`, invoking the pre-removal eviction hook first.
    ///
    /// Returns `Ok(false)` when the slot changed since the victim was
    /// sampled. Unbounded variants never evict.
    fn evict_for_size(
        &self,
        key: &K,
        expected: &Arc<CacheEntry<K, V>>,
    ) -> Result<bool, CollaboratorError> {
        let _ = (key, expected);
        Ok(false)
    }
}
