//! Lazy, segment-scoped iteration.
//!
//! [`RawIter`] walks a chosen set of segments and yields every resident
//! entry, expired or not; [`Iter`] wraps it and filters through the
//! iteration-expiration hook. Both are weakly consistent: each segment is
//! snapshotted when the walk reaches it, so no lock is held across yields,
//! concurrent writes may or may not be observed, and no key is ever yielded
//! twice.
//!
//! The filtered iterator samples the clock lazily once per advance; batch
//! consumption through `fold`/`for_each` samples it once for the whole
//! batch.

use crate::entry::CacheEntry;
use crate::hooks::ExpirationManager;
use crate::segment::SegmentMap;
use crate::time::TimeService;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::trace;

/// Iterator over resident entries, including expired ones.
pub struct RawIter<K, V> {
    segments: VecDeque<Arc<dyn SegmentMap<K, V>>>,
    current: std::vec::IntoIter<Arc<CacheEntry<K, V>>>,
}

impl<K, V> RawIter<K, V> {
    pub(crate) fn new(segments: Vec<Arc<dyn SegmentMap<K, V>>>) -> Self {
        Self {
            segments: segments.into(),
            current: Vec::new().into_iter(),
        }
    }

    /// Split off roughly half of the not-yet-visited segments into a new
    /// iterator. The union of both iterators equals the original sequence.
    ///
    /// Returns `None` when fewer than two segments remain unvisited.
    pub fn try_split(&mut self) -> Option<Self> {
        if self.segments.len() < 2 {
            return None;
        }
        let tail = self.segments.split_off(self.segments.len() / 2);
        Some(Self {
            segments: tail,
            current: Vec::new().into_iter(),
        })
    }
}

impl<K, V> Iterator for RawIter<K, V> {
    type Item = Arc<CacheEntry<K, V>>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(entry) = self.current.next() {
                return Some(entry);
            }
            let segment = self.segments.pop_front()?;
            self.current = segment.snapshot().into_iter();
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.current.len(), None)
    }
}

/// Iterator over live entries: expired candidates are skipped after the
/// iteration-expiration hook confirms them.
pub struct Iter<K, V> {
    raw: RawIter<K, V>,
    time: Arc<dyn TimeService>,
    expiration: Arc<dyn ExpirationManager<K, V>>,
}

impl<K, V> Iter<K, V> {
    pub(crate) fn new(
        raw: RawIter<K, V>,
        time: Arc<dyn TimeService>,
        expiration: Arc<dyn ExpirationManager<K, V>>,
    ) -> Self {
        Self {
            raw,
            time,
            expiration,
        }
    }

    /// Split off roughly half of the remaining segments; see
    /// [`RawIter::try_split`]. The split inherits the filtering semantics.
    pub fn try_split(&mut self) -> Option<Self> {
        let raw = self.raw.try_split()?;
        Some(Self {
            raw,
            time: self.time.clone(),
            expiration: self.expiration.clone(),
        })
    }

    fn is_live(&self, entry: &Arc<CacheEntry<K, V>>, now: u64) -> bool {
        !entry.is_expired(now)
            || !self
                .expiration
                .entry_expired_in_memory_from_iteration(entry, now)
    }
}

impl<K, V> Iterator for Iter<K, V> {
    type Item = Arc<CacheEntry<K, V>>;

    fn next(&mut self) -> Option<Self::Item> {
        // one clock sample per advance, taken lazily
        let mut now = None;
        loop {
            let entry = self.raw.next()?;
            if !entry.can_expire() {
                return Some(entry);
            }
            let now = *now.get_or_insert_with(|| self.time.wall_clock_time());
            if self.is_live(&entry, now) {
                return Some(entry);
            }
            trace!("skipping expired entry during iteration");
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, None)
    }

    fn fold<B, F>(mut self, init: B, mut f: F) -> B
    where
        F: FnMut(B, Self::Item) -> B,
    {
        // one clock sample for the whole batch
        let now = self.time.wall_clock_time();
        let mut acc = init;
        while let Some(entry) = self.raw.next() {
            if entry.can_expire() && !self.is_live(&entry, now) {
                trace!("skipping expired entry during iteration");
                continue;
            }
            acc = f(acc, entry);
        }
        acc
    }
}

#[cfg(all(test, not(feature = "loom")))]
mod tests {
    use super::*;
    use crate::entry::Metadata;
    use crate::hooks::LocalExpirationManager;
    use crate::segment::UnboundedSegment;
    use crate::time::ManualClock;
    use std::collections::HashSet;

    fn seeded_segment(keys: &[(&'static str, i64)]) -> Arc<dyn SegmentMap<&'static str, u64>> {
        let seg = UnboundedSegment::new();
        for (key, lifespan) in keys {
            let meta = Metadata::immortal().with_lifespan(*lifespan);
            let entry = Arc::new(CacheEntry::new(*key, 0u64, meta, 0, false));
            seg.compute(*key, &mut |_, _| Ok(Some(entry.clone()))).unwrap();
        }
        Arc::new(seg)
    }

    fn filtered(
        segments: Vec<Arc<dyn SegmentMap<&'static str, u64>>>,
        clock: Arc<ManualClock>,
    ) -> Iter<&'static str, u64> {
        Iter::new(
            RawIter::new(segments),
            clock,
            Arc::new(LocalExpirationManager),
        )
    }

    #[test]
    fn test_yields_all_live_entries_once() {
        let segments = vec![
            seeded_segment(&[("a", -1), ("b", -1)]),
            seeded_segment(&[("c", -1)]),
        ];
        let clock = Arc::new(ManualClock::new(0));
        let keys: Vec<_> = filtered(segments, clock).map(|e| *e.key()).collect();
        let unique: HashSet<_> = keys.iter().copied().collect();
        assert_eq!(keys.len(), 3);
        assert_eq!(unique, HashSet::from(["a", "b", "c"]));
    }

    #[test]
    fn test_skips_expired_entries() {
        let segments = vec![seeded_segment(&[("live", -1), ("dead", 10)])];
        let clock = Arc::new(ManualClock::new(100));
        let keys: Vec<_> = filtered(segments, clock).map(|e| *e.key()).collect();
        assert_eq!(keys, vec!["live"]);
    }

    #[test]
    fn test_raw_iterator_includes_expired() {
        let segments = vec![seeded_segment(&[("live", -1), ("dead", 10)])];
        let count = RawIter::new(segments).count();
        assert_eq!(count, 2);
    }

    #[test]
    fn test_split_union_covers_everything() {
        let segments: Vec<_> = (0..4)
            .map(|i| {
                let keys: &[(&'static str, i64)] = match i {
                    0 => &[("a", -1)],
                    1 => &[("b", -1)],
                    2 => &[("c", -1)],
                    _ => &[("d", -1)],
                };
                seeded_segment(keys)
            })
            .collect();
        let clock = Arc::new(ManualClock::new(0));
        let mut left = filtered(segments, clock);
        let right = left.try_split().expect("split should succeed");
        let mut keys: Vec<_> = left.map(|e| *e.key()).collect();
        keys.extend(right.map(|e| *e.key()));
        keys.sort_unstable();
        assert_eq!(keys, vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn test_split_requires_two_segments() {
        let segments = vec![seeded_segment(&[("a", -1)])];
        let clock = Arc::new(ManualClock::new(0));
        let mut iter = filtered(segments, clock);
        assert!(iter.try_split().is_none());
    }

    #[test]
    fn test_fold_filters_with_single_sample() {
        let segments = vec![seeded_segment(&[("live", -1), ("dead", 10)])];
        let clock = Arc::new(ManualClock::new(100));
        let count = filtered(segments, clock).fold(0usize, |n, _| n + 1);
        assert_eq!(count, 1);
    }
}
