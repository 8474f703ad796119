//! Unbounded segment map.

use super::{ComputeFn, SegmentMap};
use crate::entry::CacheEntry;
use crate::error::CollaboratorError;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

/// Concurrent map for one segment with no size bound.
///
/// Reads share the segment's lock; computes take it exclusively, which gives
/// per-key atomicity at segment granularity.
pub struct UnboundedSegment<K, V> {
    map: RwLock<HashMap<K, Arc<CacheEntry<K, V>>, ahash::RandomState>>,
}

impl<K, V> UnboundedSegment<K, V> {
    /// Create an empty segment map.
    pub fn new() -> Self {
        Self {
            map: RwLock::new(HashMap::default()),
        }
    }
}

impl<K, V> Default for UnboundedSegment<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> SegmentMap<K, V> for UnboundedSegment<K, V>
where
    K: Hash + Eq + Clone + Send + Sync,
    V: Send + Sync,
{
    fn get(&self, key: &K) -> Option<Arc<CacheEntry<K, V>>> {
        self.map.read().get(key).cloned()
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
            (_, Some(n)) => {
                guard.insert(key, n.clone());
            }
            (Some(_), None) => {
                guard.remove(&key);
            }
            (None, None) => {}
        }
        Ok(next)
    }

    fn len(&self) -> usize {
        self.map.read().len()
    }

    fn clear(&self) {
        self.map.write().clear();
    }

    fn snapshot(&self) -> Vec<Arc<CacheEntry<K, V>>> {
        self.map.read().values().cloned().collect()
    }

    fn sample(&self, max: usize, out: &mut Vec<Arc<CacheEntry<K, V>>>) {
        out.extend(self.map.read().values().take(max).cloned());
    }
}
