//! Bounded segment map.
//!
//! Shares a `SizeControl` with the other segments of the container: every
//! insert and remove adjusts the global
//! live-entry counter, and reads/writes record into the frequency sketch the
//! victim-selection policy consults. The map itself never evicts; the
//! container notices the counter crossing capacity and removes victims
//! through [`SegmentMap::evict_for_size`].

use super::{ComputeFn, EvictionCallbacks, RemovalCause, SegmentMap};
use crate::entry::CacheEntry;
use crate::error::CollaboratorError;
use crate::eviction::SizeControl;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

/// Concurrent map for one segment of a size-bounded container.
pub struct BoundedSegment<K, V> {
    map: RwLock<HashMap<K, Arc<CacheEntry<K, V>>, ahash::RandomState>>,
    control: Arc<SizeControl>,
    callbacks: Arc<dyn EvictionCallbacks<K, V>>,
}

impl<K, V> BoundedSegment<K, V> {
    /// Create an empty bounded segment sharing `control` with its siblings.
    pub(crate) fn new(control: Arc<SizeControl>, callbacks: Arc<dyn EvictionCallbacks<K, V>>) -> Self {
        Self {
            map: RwLock::new(HashMap::default()),
            control,
            callbacks,
        }
    }

    fn notify_removal(&self, key: &K, entry: &Arc<CacheEntry<K, V>>, cause: RemovalCause) {
        match cause {
            RemovalCause::Explicit => self.callbacks.on_entry_removed(entry),
            RemovalCause::Replaced => self.callbacks.on_entry_activated(key),
            // Size removals run through evict_for_size, which already fired
            // the pre-removal hook; the post-removal notification is the
            // container's to deliver outside this segment's lock.
            RemovalCause::Size => {}
        }
    }
}

impl<K, V> SegmentMap<K, V> for BoundedSegment<K, V>
where
    K: Hash + Eq + Clone + Send + Sync,
    V: Send + Sync,
{
    fn get(&self, key: &K) -> Option<Arc<CacheEntry<K, V>>> {
        let found = self.map.read().get(key).cloned();
        if found.is_some() {
            self.control.sketch.record(key);
        }
        found
    }

    fn peek(&self, key: &K) -> Option<Arc<CacheEntry<K, V>>> {
        self.map.read().get(key).cloned()
    }

    fn compute(
        &self,
        key: K,
        f: &mut ComputeFn<'_, K, V>,
    ) -> Result<Option<Arc<CacheEntry<K, V>>>, CollaboratorError> {
        let mut guard = self.map.write();
        let prev = guard.get(&key).cloned();
        let next = f(&key, prev.as_ref())?;
        match (&prev, &next) {
            (Some(p), Some(n)) if Arc::ptr_eq(p, n) => {}
            (Some(_), Some(n)) => {
                self.control.sketch.record(&key);
                guard.insert(key.clone(), n.clone());
                self.notify_removal(&key, n, RemovalCause::Replaced);
            }
            (None, Some(n)) => {
                self.control.sketch.record(&key);
                guard.insert(key, n.clone());
                self.control.entry_added();
            }
            (Some(p), None) => {
                guard.remove(&key);
                self.control.entry_removed();
                self.notify_removal(&key, p, RemovalCause::Explicit);
            }
            (None, None) => {}
        }
        Ok(next)
    }

    fn len(&self) -> usize {
        self.map.read().len()
    }

    fn clear(&self) {
        let mut guard = self.map.write();
        let drained: Vec<(K, Arc<CacheEntry<K, V>>)> = guard.drain().collect();
        self.control.entries_removed(drained.len());
        for (key, entry) in &drained {
            self.notify_removal(key, entry, RemovalCause::Explicit);
        }
    }

    fn snapshot(&self) -> Vec<Arc<CacheEntry<K, V>>> {
        self.map.read().values().cloned().collect()
    }

    fn sample(&self, max: usize, out: &mut Vec<Arc<CacheEntry<K, V>>>) {
        out.extend(self.map.read().values().take(max).cloned());
    }

    fn evict_for_size(
        &self,
        key: &K,
        expected: &Arc<CacheEntry<K, V>>,
    ) -> Result<bool, CollaboratorError> {
        let mut guard = self.map.write();
        match guard.get(key) {
            Some(current) if Arc::ptr_eq(current, expected) => {
                self.callbacks.on_entry_chosen_for_eviction(expected)?;
                guard.remove(key);
                self.control.entry_removed();
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[cfg(all(test, not(feature = "loom")))]
mod tests {
    use super::*;
    use crate::entry::Metadata;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingCallbacks {
        chosen: Mutex<Vec<&'static str>>,
        removed: Mutex<Vec<&'static str>>,
        activated: Mutex<Vec<&'static str>>,
        fail_chosen: bool,
    }

    impl EvictionCallbacks<&'static str, u64> for RecordingCallbacks {
        fn on_entry_chosen_for_eviction(
            &self,
            entry: &Arc<CacheEntry<&'static str, u64>>,
        ) -> Result<(), CollaboratorError> {
            if self.fail_chosen {
                return Err(CollaboratorError::new("passivator", "disk full"));
            }
            self.chosen.lock().unwrap().push(*entry.key());
            Ok(())
        }

        fn on_entry_eviction(&self, _evicted: &[Arc<CacheEntry<&'static str, u64>>]) {}

        fn on_entry_removed(&self, entry: &Arc<CacheEntry<&'static str, u64>>) {
            self.removed.lock().unwrap().push(*entry.key());
        }

        fn on_entry_activated(&self, key: &&'static str) {
            self.activated.lock().unwrap().push(*key);
        }
    }

    impl RecordingCallbacks {
        fn failing() -> Self {
            Self {
                fail_chosen: true,
                ..Default::default()
            }
        }
    }

    fn entry(key: &'static str, value: u64) -> Arc<CacheEntry<&'static str, u64>> {
        Arc::new(CacheEntry::new(key, value, Metadata::immortal(), 0, false))
    }

    fn segment(
        capacity: usize,
        callbacks: Arc<RecordingCallbacks>,
    ) -> BoundedSegment<&'static str, u64> {
        BoundedSegment::new(Arc::new(SizeControl::new(capacity)), callbacks)
    }

    #[test]
    fn test_insert_counts_globally() {
        let cb = Arc::new(RecordingCallbacks::default());
        let seg = segment(8, cb);
        seg.compute("a", &mut |_, _| Ok(Some(entry("a", 1)))).unwrap();
        seg.compute("b", &mut |_, _| Ok(Some(entry("b", 2)))).unwrap();
        assert_eq!(seg.control.len(), 2);
    }

    #[test]
    fn test_replace_notifies_activation() {
        let cb = Arc::new(RecordingCallbacks::default());
        let seg = segment(8, cb.clone());
        seg.compute("a", &mut |_, _| Ok(Some(entry("a", 1)))).unwrap();
        seg.compute("a", &mut |_, _| Ok(Some(entry("a", 2)))).unwrap();
        assert_eq!(seg.control.len(), 1);
        assert_eq!(*cb.activated.lock().unwrap(), vec!["a"]);
    }

    #[test]
    fn test_remove_notifies_explicit() {
        let cb = Arc::new(RecordingCallbacks::default());
        let seg = segment(8, cb.clone());
        seg.compute("a", &mut |_, _| Ok(Some(entry("a", 1)))).unwrap();
        seg.compute("a", &mut |_, _| Ok(None)).unwrap();
        assert_eq!(seg.control.len(), 0);
        assert_eq!(*cb.removed.lock().unwrap(), vec!["a"]);
    }

    #[test]
    fn test_clear_notifies_each_entry() {
        let cb = Arc::new(RecordingCallbacks::default());
        let seg = segment(8, cb.clone());
        seg.compute("a", &mut |_, _| Ok(Some(entry("a", 1)))).unwrap();
        seg.compute("b", &mut |_, _| Ok(Some(entry("b", 2)))).unwrap();
        seg.clear();
        assert_eq!(seg.control.len(), 0);
        let mut removed = cb.removed.lock().unwrap().clone();
        removed.sort_unstable();
        assert_eq!(removed, vec!["a", "b"]);
    }

    #[test]
    fn test_evict_for_size_checks_identity() {
        let cb = Arc::new(RecordingCallbacks::default());
        let seg = segment(8, cb.clone());
        let victim = entry("a", 1);
        seg.compute("a", &mut |_, _| Ok(Some(victim.clone()))).unwrap();

        // stale expectation: slot was replaced since sampling
        let replacement = entry("a", 2);
        seg.compute("a", &mut |_, _| Ok(Some(replacement.clone())))
            .unwrap();
        assert!(!seg.evict_for_size(&"a", &victim).unwrap());

        assert!(seg.evict_for_size(&"a", &replacement).unwrap());
        assert_eq!(*cb.chosen.lock().unwrap(), vec!["a"]);
        assert_eq!(seg.control.len(), 0);
        assert!(seg.peek(&"a").is_none());
    }

    #[test]
    fn test_failed_passivation_aborts_eviction() {
        let cb = Arc::new(RecordingCallbacks::failing());
        let seg = segment(8, cb);
        let victim = entry("a", 1);
        seg.compute("a", &mut |_, _| Ok(Some(victim.clone()))).unwrap();
        assert!(seg.evict_for_size(&"a", &victim).is_err());
        assert!(seg.peek(&"a").is_some());
        assert_eq!(seg.control.len(), 1);
    }

    #[test]
    fn test_get_records_access_peek_does_not() {
        let cb = Arc::new(RecordingCallbacks::default());
        let seg = segment(8, cb);
        seg.compute("a", &mut |_, _| Ok(Some(entry("a", 1)))).unwrap();
        let before = seg.control.sketch.estimate(&"a");
        for _ in 0..4 {
            seg.peek(&"a");
        }
        assert_eq!(seg.control.sketch.estimate(&"a"), before);
        for _ in 0..4 {
            seg.get(&"a");
        }
        assert!(seg.control.sketch.estimate(&"a") > before);
    }
}
