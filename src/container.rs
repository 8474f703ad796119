//! Segmented container façade.
//!
//! [`SegmentedContainer`] routes every operation to the segment map owning
//! the key (computing the segment through the partitioner when the caller
//! does not supply one), runs mutations inside the map's per-key compute,
//! and invokes the expiration, activation, passivation, and eviction
//! collaborators at the points where the corresponding state transition
//! becomes visible.
//!
//! Collaborators and the write/remove extension hooks run inside the
//! compute's critical section; they are part of the atomic step and must not
//! call back into the container for the same key.

use crate::config::{ContainerConfig, StorageType};
use crate::entry::{CacheEntry, DefaultEntryFactory, EntryFactory, WriteMeta};
use crate::error::{CollaboratorError, ContainerError, ContainerResult};
use crate::eviction::SizeControl;
use crate::hooks::{
    ActivationManager, EvictionManager, ExpirationManager, LocalExpirationManager,
    NoopActivationManager, NoopEvictionManager, NoopPassivationManager, PassivationManager,
};
use crate::iter::{Iter, RawIter};
use crate::metrics::{AtomicCounters, CounterSnapshot};
use crate::partition::{HashPartitioner, KeyPartitioner};
use crate::segment::{BoundedSegment, EvictionCallbacks, SegmentMap, UnboundedSegment};
use crate::sync::{AtomicU64, Ordering};
use crate::time::{TimeService, WallClock};
use parking_lot::RwLock;
use std::fmt;
use std::hash::Hash;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use tracing::{error, trace};

/// Candidates examined per eviction round.
const EVICTION_SAMPLE: usize = 8;

/// Consecutive failed eviction attempts tolerated before giving up a round.
const EVICTION_STALL_LIMIT: usize = 64;

/// Handle identifying a registered removal listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type RemovalListener<K, V> = Arc<dyn Fn(&[Arc<CacheEntry<K, V>>]) + Send + Sync>;

type WriteHook<K, V> = Box<dyn Fn(&K, &Arc<CacheEntry<K, V>>) + Send + Sync>;
type RemoveHook<K, V> = Box<dyn Fn(&K, &Arc<CacheEntry<K, V>>) + Send + Sync>;

/// Copy-on-write registry of removal listeners.
///
/// Readers clone the current immutable vector; registration swaps in a new
/// one, so notification never synchronizes with registration.
struct ListenerRegistry<K, V> {
    entries: RwLock<Arc<Vec<(ListenerId, RemovalListener<K, V>)>>>,
    next_id: AtomicU64,
}

impl<K, V> ListenerRegistry<K, V> {
    fn new() -> Self {
        Self {
            entries: RwLock::new(Arc::new(Vec::new())),
            next_id: AtomicU64::new(0),
        }
    }

    fn add(&self, listener: RemovalListener<K, V>) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut guard = self.entries.write();
        let mut next = (**guard).clone();
        next.push((id, listener));
        *guard = Arc::new(next);
        id
    }

    fn remove(&self, id: ListenerId) {
        let mut guard = self.entries.write();
        let next: Vec<_> = guard
            .iter()
            .filter(|(lid, _)| *lid != id)
            .cloned()
            .collect();
        *guard = Arc::new(next);
    }

    fn notify(&self, entries: &[Arc<CacheEntry<K, V>>]) {
        let current = self.entries.read().clone();
        for (id, listener) in current.iter() {
            let listener = listener.as_ref();
            // a faulty listener must not abort the mutation
            if catch_unwind(AssertUnwindSafe(|| listener(entries))).is_err() {
                error!(listener = id.0, "removal listener panicked");
            }
        }
    }
}

/// Bridges bounded-map removal notifications to the collaborators.
struct EvictionBridge<K, V> {
    passivator: Arc<dyn PassivationManager<K, V>>,
    activator: Arc<dyn ActivationManager<K>>,
    eviction_manager: Arc<dyn EvictionManager<K, V>>,
    listeners: Arc<ListenerRegistry<K, V>>,
    passivation: bool,
}

impl<K, V> EvictionCallbacks<K, V> for EvictionBridge<K, V>
where
    K: Send + Sync,
    V: Send + Sync,
{
    fn on_entry_chosen_for_eviction(
        &self,
        entry: &Arc<CacheEntry<K, V>>,
    ) -> Result<(), CollaboratorError> {
        if self.passivation {
            self.passivator.passivate(entry)
        } else {
            Ok(())
        }
    }

    fn on_entry_eviction(&self, evicted: &[Arc<CacheEntry<K, V>>]) {
        self.eviction_manager.on_entry_eviction(evicted);
        self.listeners.notify(evicted);
    }

    fn on_entry_removed(&self, _entry: &Arc<CacheEntry<K, V>>) {}

    fn on_entry_activated(&self, key: &K) {
        if let Err(err) = self.activator.on_update(key, true) {
            error!(%err, "activation bookkeeping failed after replace");
        }
    }
}

/// Transformer run inside a compute block.
///
/// Observes the previous entry (if any) and returns the next one, built
/// through the supplied factory. Returning the same `Arc` leaves the slot
/// untouched; returning `None` removes.
pub trait ComputeAction<K, V> {
    /// Decide the next entry for `key`.
    fn compute(
        &mut self,
        key: &K,
        prev: Option<&Arc<CacheEntry<K, V>>>,
        factory: &dyn EntryFactory<K, V>,
    ) -> Option<Arc<CacheEntry<K, V>>>;
}

impl<K, V, F> ComputeAction<K, V> for F
where
    F: FnMut(
        &K,
        Option<&Arc<CacheEntry<K, V>>>,
        &dyn EntryFactory<K, V>,
    ) -> Option<Arc<CacheEntry<K, V>>>,
{
    fn compute(
        &mut self,
        key: &K,
        prev: Option<&Arc<CacheEntry<K, V>>>,
        factory: &dyn EntryFactory<K, V>,
    ) -> Option<Arc<CacheEntry<K, V>>> {
        self(key, prev, factory)
    }
}

/// Segmented, concurrent in-memory data container.
///
/// Keys are partitioned across a fixed number of segments; each segment owns
/// an independent concurrent map. All mutations run inside the owning
/// segment's compute, so per-key updates are linearizable and the
/// collaborator callbacks observe a consistent entry state.
pub struct SegmentedContainer<K, V> {
    config: ContainerConfig,
    segments: Vec<RwLock<Option<Arc<dyn SegmentMap<K, V>>>>>,
    partitioner: Arc<dyn KeyPartitioner<K>>,
    time: Arc<dyn TimeService>,
    entry_factory: Arc<dyn EntryFactory<K, V>>,
    expiration: Arc<dyn ExpirationManager<K, V>>,
    activator: Arc<dyn ActivationManager<K>>,
    passivator: Arc<dyn PassivationManager<K, V>>,
    listeners: Arc<ListenerRegistry<K, V>>,
    write_hook: Option<WriteHook<K, V>>,
    remove_hook: Option<RemoveHook<K, V>>,
    control: Option<Arc<SizeControl>>,
    bridge: Arc<EvictionBridge<K, V>>,
    counters: AtomicCounters,
}

impl<K, V> SegmentedContainer<K, V>
where
    K: Hash + Eq + Clone + fmt::Debug + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    /// Start building a container.
    pub fn builder() -> ContainerBuilder<K, V> {
        ContainerBuilder::new()
    }

    /// Bind the initial topology: every configured segment is assigned to
    /// this node.
    ///
    /// Clustered deployments skip this and drive
    /// [`add_segments`](Self::add_segments) from ownership changes instead.
    pub fn start(&self) {
        self.add_segments(0..self.segments.len());
    }

    /// Release every segment, draining removal callbacks synchronously.
    pub fn stop(&self) {
        for (segment, slot) in self.segments.iter().enumerate() {
            let removed = slot.write().take();
            if let Some(map) = removed {
                map.clear();
                trace!(segment, "released segment");
            }
        }
    }

    /// Create the maps for newly owned segments. Already-owned segments are
    /// left untouched; out-of-range indexes are rejected with an error log.
    pub fn add_segments(&self, segments: impl IntoIterator<Item = usize>) {
        for segment in segments {
            let Some(slot) = self.segments.get(segment) else {
                error!(
                    segment,
                    segment_count = self.segments.len(),
                    "cannot own segment outside the configured range"
                );
                continue;
            };
            let mut guard = slot.write();
            if guard.is_none() {
                *guard = Some(self.new_segment_map());
                trace!(segment, "assigned segment");
            }
        }
    }

    /// Drop the maps of revoked segments. Entries are released without
    /// removal notifications; their data now lives elsewhere in the cluster.
    pub fn remove_segments(&self, segments: impl IntoIterator<Item = usize>) {
        for segment in segments {
            if let Some(slot) = self.segments.get(segment) {
                let removed = slot.write().take();
                if let Some(map) = removed {
                    if let Some(control) = &self.control {
                        control.entries_removed(map.len());
                    }
                    trace!(segment, "revoked segment");
                }
            }
        }
    }

    /// Number of segments the container was built with.
    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    /// Entry representation mode from the configuration.
    pub fn storage(&self) -> StorageType {
        self.config.storage
    }

    /// Live-entry bound, when the container is bounded.
    pub fn capacity(&self) -> Option<usize> {
        self.control.as_ref().map(|c| c.capacity())
    }

    /// Change the live-entry bound and evict down to it if needed.
    pub fn resize(&self, new_capacity: usize) -> ContainerResult<()> {
        let Some(control) = &self.control else {
            return Err(ContainerError::NotBounded);
        };
        control.set_capacity(new_capacity);
        self.enforce_capacity()
    }

    /// Point-in-time operation counters.
    pub fn counters(&self) -> CounterSnapshot {
        self.counters.snapshot()
    }

    /// Read an entry, refreshing its last-used time.
    ///
    /// An entry whose local expiry predicate fires is handed to the
    /// expiration hook; if the hook confirms, the entry is dropped and the
    /// read reports absent.
    pub fn get(&self, key: &K) -> Option<Arc<CacheEntry<K, V>>> {
        self.get_in(self.partitioner.segment(key), key)
    }

    /// [`get`](Self::get) against an explicit segment.
    pub fn get_in(&self, segment: usize, key: &K) -> Option<Arc<CacheEntry<K, V>>> {
        let Some(map) = self.map_for(segment) else {
            self.counters.record_miss();
            return None;
        };
        let Some(entry) = map.get(key) else {
            self.counters.record_miss();
            return None;
        };
        if entry.can_expire() {
            let now = self.time.wall_clock_time();
            if entry.is_expired(now) && self.expiration.entry_expired_in_memory(&entry, now) {
                self.drop_expired(&map, key, &entry);
                self.counters.record_expiration();
                self.counters.record_miss();
                return None;
            }
            entry.touch(now);
        }
        self.counters.record_hit();
        Some(entry)
    }

    /// Read an entry without expiration checks or touch.
    pub fn peek(&self, key: &K) -> Option<Arc<CacheEntry<K, V>>> {
        self.peek_in(self.partitioner.segment(key), key)
    }

    /// [`peek`](Self::peek) against an explicit segment.
    pub fn peek_in(&self, segment: usize, key: &K) -> Option<Arc<CacheEntry<K, V>>> {
        self.map_for(segment)?.peek(key)
    }

    /// Whether a live entry exists for `key`. Applies the same expiration
    /// semantics as [`get`](Self::get) but neither touches nor removes.
    pub fn contains_key(&self, key: &K) -> bool {
        self.contains_key_in(self.partitioner.segment(key), key)
    }

    /// [`contains_key`](Self::contains_key) against an explicit segment.
    pub fn contains_key_in(&self, segment: usize, key: &K) -> bool {
        let Some(entry) = self.peek_in(segment, key) else {
            return false;
        };
        if entry.can_expire() {
            let now = self.time.wall_clock_time();
            if entry.is_expired(now) && self.expiration.entry_expired_in_memory(&entry, now) {
                return false;
            }
        }
        true
    }

    /// Store a value, replacing any previous entry for the key.
    ///
    /// L1-wrapped metadata is unwrapped and the stored entry tagged as L1.
    pub fn put(&self, key: K, value: V, meta: impl Into<WriteMeta>) -> ContainerResult<()> {
        let segment = self.partitioner.segment(&key);
        self.put_in(segment, key, value, meta)
    }

    /// [`put`](Self::put) against an explicit segment.
    pub fn put_in(
        &self,
        segment: usize,
        key: K,
        value: V,
        meta: impl Into<WriteMeta>,
    ) -> ContainerResult<()> {
        let Some(map) = self.map_for(segment) else {
            error!(
                key = ?key,
                segment,
                "insertion attempted for a segment not owned by this node"
            );
            return Err(self.missing_segment_error(segment));
        };
        let (meta, l1) = match meta.into() {
            WriteMeta::Standard(m) => (m, false),
            WriteMeta::L1(m) => (m, true),
        };
        let existing = map.peek(&key);
        trace!(key = ?key, update = existing.is_some(), "creating entry for write");
        let copy = if l1 {
            self.entry_factory.create_l1(key.clone(), value, meta)
        } else if let Some(prev) = &existing {
            self.entry_factory.update(prev, value, meta)
        } else {
            self.entry_factory.create(key.clone(), value, meta)
        };
        map.compute(key, &mut |k, prev| {
            if let Some(hook) = &self.write_hook {
                hook(k, &copy);
            }
            self.activator.on_update(k, prev.is_none())?;
            trace!(key = ?k, "storing entry in container");
            Ok(Some(copy.clone()))
        })?;
        self.counters.record_store();
        self.enforce_capacity()
    }

    /// Remove the entry for `key`.
    ///
    /// Returns the previous entry, or `None` when there was none or it was
    /// already expired at the observed time (the removal callbacks still ran
    /// with the dead entry).
    pub fn remove(&self, key: &K) -> ContainerResult<Option<Arc<CacheEntry<K, V>>>> {
        self.remove_in(self.partitioner.segment(key), key)
    }

    /// [`remove`](Self::remove) against an explicit segment.
    pub fn remove_in(
        &self,
        segment: usize,
        key: &K,
    ) -> ContainerResult<Option<Arc<CacheEntry<K, V>>>> {
        let Some(map) = self.map_for(segment) else {
            return Ok(None);
        };
        let mut removed: Option<Arc<CacheEntry<K, V>>> = None;
        map.compute(key.clone(), &mut |k, prev| {
            self.activator.on_remove(k, prev.is_none())?;
            if let Some(p) = prev {
                if let Some(hook) = &self.remove_hook {
                    hook(k, p);
                }
                self.listeners.notify(std::slice::from_ref(p));
                removed = Some(p.clone());
            }
            Ok(None)
        })?;
        let Some(entry) = removed else {
            return Ok(None);
        };
        trace!(key = ?key, "removed entry from container");
        self.counters.record_remove();
        if entry.can_expire() {
            let now = self.time.wall_clock_time();
            if entry.is_expired(now) && self.expiration.entry_expired_in_memory(&entry, now) {
                // the caller observed a removal of nothing live
                return Ok(None);
            }
        }
        Ok(Some(entry))
    }

    /// Policy-initiated eviction: passivate the entry to the store, then
    /// remove it. No-op when the key is absent.
    pub fn evict(&self, key: &K) -> ContainerResult<()> {
        self.evict_in(self.partitioner.segment(key), key)
    }

    /// [`evict`](Self::evict) against an explicit segment.
    pub fn evict_in(&self, segment: usize, key: &K) -> ContainerResult<()> {
        let Some(map) = self.map_for(segment) else {
            return Ok(());
        };
        let mut evicted = false;
        map.compute(key.clone(), &mut |k, prev| match prev {
            Some(p) => {
                self.passivator.passivate(p)?;
                if let Some(hook) = &self.remove_hook {
                    hook(k, p);
                }
                self.listeners.notify(std::slice::from_ref(p));
                evicted = true;
                Ok(None)
            }
            None => Ok(None),
        })?;
        if evicted {
            self.counters.record_eviction();
            trace!(key = ?key, "evicted entry to store");
        }
        Ok(())
    }

    /// Atomic per-key transform through a [`ComputeAction`].
    pub fn compute<A>(
        &self,
        key: K,
        action: &mut A,
    ) -> ContainerResult<Option<Arc<CacheEntry<K, V>>>>
    where
        A: ComputeAction<K, V>,
    {
        let segment = self.partitioner.segment(&key);
        self.compute_in(segment, key, action)
    }

    /// [`compute`](Self::compute) against an explicit segment.
    pub fn compute_in<A>(
        &self,
        segment: usize,
        key: K,
        action: &mut A,
    ) -> ContainerResult<Option<Arc<CacheEntry<K, V>>>>
    where
        A: ComputeAction<K, V>,
    {
        let Some(map) = self.map_for(segment) else {
            return Ok(None);
        };
        let factory = &self.entry_factory;
        let result = map.compute(key, &mut |k, prev| {
            let next = action.compute(k, prev, factory.as_ref());
            match (prev, next) {
                (Some(p), Some(n)) if Arc::ptr_eq(p, &n) => Ok(Some(n)),
                (prev, Some(n)) => {
                    if let Some(hook) = &self.write_hook {
                        hook(k, &n);
                    }
                    self.activator.on_update(k, prev.is_none())?;
                    trace!(key = ?k, "storing entry in container");
                    Ok(Some(n))
                }
                (Some(p), None) => {
                    if let Some(hook) = &self.remove_hook {
                        hook(k, p);
                    }
                    self.activator.on_remove(k, false)?;
                    self.listeners.notify(std::slice::from_ref(p));
                    Ok(None)
                }
                (None, None) => Ok(None),
            }
        })?;
        self.enforce_capacity()?;
        Ok(result)
    }

    /// Refresh an entry's last-used time. Returns `false` when the entry is
    /// absent or already expired at `now`.
    pub fn touch(&self, key: &K, now: u64) -> bool {
        self.touch_in(self.partitioner.segment(key), key, now)
    }

    /// [`touch`](Self::touch) against an explicit segment.
    pub fn touch_in(&self, segment: usize, key: &K, now: u64) -> bool {
        let Some(entry) = self.peek_in(segment, key) else {
            return false;
        };
        if entry.can_expire() && entry.is_expired(now) {
            return false;
        }
        entry.touch(now);
        true
    }

    /// Number of live (non-expired) entries across all segments.
    ///
    /// Walks the filtered iterator; prefer
    /// [`size_including_expired`](Self::size_including_expired) when the
    /// approximation is acceptable.
    pub fn size(&self) -> usize {
        self.iter().count()
    }

    /// Live-entry count across the listed segments.
    pub fn size_in(&self, segments: &[usize]) -> usize {
        self.iter_in(segments).count()
    }

    /// Resident-entry count across all segments, expired entries included.
    /// The sum saturates instead of wrapping; unowned segments count as 0.
    pub fn size_including_expired(&self) -> usize {
        self.segments
            .iter()
            .map(|slot| slot.read().as_ref().map(|m| m.len()).unwrap_or(0))
            .fold(0usize, usize::saturating_add)
    }

    /// [`size_including_expired`](Self::size_including_expired) across the
    /// listed segments.
    pub fn size_including_expired_in(&self, segments: &[usize]) -> usize {
        segments
            .iter()
            .map(|&s| self.map_for(s).map(|m| m.len()).unwrap_or(0))
            .fold(0usize, usize::saturating_add)
    }

    /// Remove every entry in every owned segment.
    pub fn clear(&self) {
        for slot in &self.segments {
            let map = slot.read().clone();
            if let Some(map) = map {
                map.clear();
            }
        }
    }

    /// Remove every entry in the listed segments.
    pub fn clear_in(&self, segments: &[usize]) {
        for &segment in segments {
            if let Some(map) = self.map_for(segment) {
                map.clear();
            }
        }
    }

    /// Lazy iterator over live entries in all owned segments.
    pub fn iter(&self) -> Iter<K, V> {
        Iter::new(
            RawIter::new(self.all_maps()),
            self.time.clone(),
            self.expiration.clone(),
        )
    }

    /// Lazy iterator over live entries in the listed segments.
    pub fn iter_in(&self, segments: &[usize]) -> Iter<K, V> {
        Iter::new(
            RawIter::new(self.maps_in(segments)),
            self.time.clone(),
            self.expiration.clone(),
        )
    }

    /// Iterator over all resident entries, expired ones included.
    pub fn iter_including_expired(&self) -> RawIter<K, V> {
        RawIter::new(self.all_maps())
    }

    /// [`iter_including_expired`](Self::iter_including_expired) over the
    /// listed segments.
    pub fn iter_including_expired_in(&self, segments: &[usize]) -> RawIter<K, V> {
        RawIter::new(self.maps_in(segments))
    }

    /// Iterator over the keys of live entries.
    pub fn keys(&self) -> impl Iterator<Item = K> {
        self.iter().map(|e| e.key().clone())
    }

    /// Iterator over the values of live entries.
    pub fn values(&self) -> impl Iterator<Item = V>
    where
        V: Clone,
    {
        self.iter().map(|e| e.value().clone())
    }

    /// Register a removal listener; it receives the entries dropped by
    /// explicit removes, policy evictions, and size evictions.
    pub fn add_removal_listener(
        &self,
        listener: impl Fn(&[Arc<CacheEntry<K, V>>]) + Send + Sync + 'static,
    ) -> ListenerId {
        self.listeners.add(Arc::new(listener))
    }

    /// Detach a previously registered removal listener.
    pub fn remove_removal_listener(&self, id: ListenerId) {
        self.listeners.remove(id);
    }

    fn new_segment_map(&self) -> Arc<dyn SegmentMap<K, V>> {
        match &self.control {
            Some(control) => Arc::new(BoundedSegment::new(control.clone(), self.bridge.clone())),
            None => Arc::new(UnboundedSegment::new()),
        }
    }

    fn map_for(&self, segment: usize) -> Option<Arc<dyn SegmentMap<K, V>>> {
        match self.segments.get(segment) {
            Some(slot) => slot.read().clone(),
            None => {
                error!(
                    segment,
                    segment_count = self.segments.len(),
                    "segment index out of range"
                );
                None
            }
        }
    }

    fn all_maps(&self) -> Vec<Arc<dyn SegmentMap<K, V>>> {
        self.segments
            .iter()
            .filter_map(|slot| slot.read().clone())
            .collect()
    }

    fn maps_in(&self, segments: &[usize]) -> Vec<Arc<dyn SegmentMap<K, V>>> {
        segments.iter().filter_map(|&s| self.map_for(s)).collect()
    }

    fn missing_segment_error(&self, segment: usize) -> ContainerError {
        if segment >= self.segments.len() {
            ContainerError::SegmentOutOfRange {
                segment,
                segment_count: self.segments.len(),
            }
        } else {
            ContainerError::SegmentNotOwned { segment }
        }
    }

    /// Drop an entry whose expiration the hook confirmed, if it is still the
    /// resident entry for `key`.
    fn drop_expired(
        &self,
        map: &Arc<dyn SegmentMap<K, V>>,
        key: &K,
        expected: &Arc<CacheEntry<K, V>>,
    ) {
        let result = map.compute(key.clone(), &mut |k, prev| match prev {
            Some(p) if Arc::ptr_eq(p, expected) => {
                if let Some(hook) = &self.remove_hook {
                    hook(k, p);
                }
                Ok(None)
            }
            other => Ok(other.cloned()),
        });
        match result {
            Ok(_) => trace!(key = ?key, "dropped expired entry"),
            Err(err) => error!(key = ?key, %err, "failed to drop expired entry"),
        }
    }

    /// Evict sampled victims until the live-entry count is within capacity.
    ///
    /// Runs outside any segment lock; each removal locks only the victim's
    /// segment, so the bound may be transiently exceeded by in-flight
    /// insertions but never by more.
    fn enforce_capacity(&self) -> ContainerResult<()> {
        let Some(control) = &self.control else {
            return Ok(());
        };
        let mut stalls = 0usize;
        while control.over_capacity() {
            let Some((map, victim)) = self.select_victim() else {
                break;
            };
            match map.evict_for_size(victim.key(), &victim) {
                Ok(true) => {
                    stalls = 0;
                    self.counters.record_eviction();
                    trace!(key = ?victim.key(), "evicted entry for size");
                    self.bridge.on_entry_eviction(std::slice::from_ref(&victim));
                }
                Ok(false) => {
                    // victim changed since sampling; re-sample
                    stalls += 1;
                    if stalls > EVICTION_STALL_LIMIT {
                        break;
                    }
                }
                Err(err) => return Err(err.into()),
            }
        }
        Ok(())
    }

    /// Pick the sampled entry with the lowest (frequency, last-used) pair.
    /// Already-expired candidates are taken immediately.
    fn select_victim(&self) -> Option<(Arc<dyn SegmentMap<K, V>>, Arc<CacheEntry<K, V>>)> {
        use rand::seq::SliceRandom;

        let control = self.control.as_ref()?;
        let now = self.time.wall_clock_time();
        let mut order: Vec<usize> = (0..self.segments.len()).collect();
        order.shuffle(&mut rand::thread_rng());

        let mut best: Option<(Arc<dyn SegmentMap<K, V>>, Arc<CacheEntry<K, V>>, u8)> = None;
        let mut candidates = Vec::new();
        let mut sampled = 0usize;
        for segment in order {
            let Some(map) = self.map_for(segment) else {
                continue;
            };
            map.sample(EVICTION_SAMPLE, &mut candidates);
            for entry in candidates.drain(..) {
                if entry.can_expire() && entry.is_expired(now) {
                    return Some((map, entry));
                }
                let freq = control.sketch.estimate(entry.key());
                let better = match &best {
                    None => true,
                    Some((_, current, best_freq)) => {
                        freq < *best_freq
                            || (freq == *best_freq && entry.last_used() < current.last_used())
                    }
                };
                if better {
                    best = Some((map.clone(), entry, freq));
                }
                sampled += 1;
            }
            if sampled >= EVICTION_SAMPLE {
                break;
            }
        }
        best.map(|(map, entry, _)| (map, entry))
    }
}

/// Builder wiring a [`SegmentedContainer`] and its collaborators.
///
/// Every collaborator has a local default: wall-clock time, seeded hash
/// partitioner, factory stamping from the clock, always-confirming
/// expiration, and no-op activation/passivation/eviction managers.
pub struct ContainerBuilder<K, V> {
    config: ContainerConfig,
    time: Option<Arc<dyn TimeService>>,
    partitioner: Option<Arc<dyn KeyPartitioner<K>>>,
    entry_factory: Option<Arc<dyn EntryFactory<K, V>>>,
    expiration: Option<Arc<dyn ExpirationManager<K, V>>>,
    activator: Option<Arc<dyn ActivationManager<K>>>,
    passivator: Option<Arc<dyn PassivationManager<K, V>>>,
    eviction_manager: Option<Arc<dyn EvictionManager<K, V>>>,
    write_hook: Option<WriteHook<K, V>>,
    remove_hook: Option<RemoveHook<K, V>>,
}

impl<K, V> ContainerBuilder<K, V>
where
    K: Hash + Eq + Clone + fmt::Debug + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    /// Create a builder with the default configuration.
    pub fn new() -> Self {
        Self {
            config: ContainerConfig::default(),
            time: None,
            partitioner: None,
            entry_factory: None,
            expiration: None,
            activator: None,
            passivator: None,
            eviction_manager: None,
            write_hook: None,
            remove_hook: None,
        }
    }

    /// Use this configuration record.
    pub fn config(mut self, config: ContainerConfig) -> Self {
        self.config = config;
        self
    }

    /// Inject the time service.
    pub fn time(mut self, time: Arc<dyn TimeService>) -> Self {
        self.time = Some(time);
        self
    }

    /// Inject the key partitioner.
    pub fn partitioner(mut self, partitioner: Arc<dyn KeyPartitioner<K>>) -> Self {
        self.partitioner = Some(partitioner);
        self
    }

    /// Inject the entry factory.
    pub fn entry_factory(mut self, factory: Arc<dyn EntryFactory<K, V>>) -> Self {
        self.entry_factory = Some(factory);
        self
    }

    /// Inject the expiration manager.
    pub fn expiration_manager(mut self, expiration: Arc<dyn ExpirationManager<K, V>>) -> Self {
        self.expiration = Some(expiration);
        self
    }

    /// Inject the activation manager.
    pub fn activation_manager(mut self, activator: Arc<dyn ActivationManager<K>>) -> Self {
        self.activator = Some(activator);
        self
    }

    /// Inject the passivation manager.
    pub fn passivation_manager(mut self, passivator: Arc<dyn PassivationManager<K, V>>) -> Self {
        self.passivator = Some(passivator);
        self
    }

    /// Inject the eviction manager.
    pub fn eviction_manager(mut self, manager: Arc<dyn EvictionManager<K, V>>) -> Self {
        self.eviction_manager = Some(manager);
        self
    }

    /// Extension hook invoked for every entry written inside a compute
    /// block.
    pub fn on_entry_written(
        mut self,
        hook: impl Fn(&K, &Arc<CacheEntry<K, V>>) + Send + Sync + 'static,
    ) -> Self {
        self.write_hook = Some(Box::new(hook));
        self
    }

    /// Extension hook invoked for every entry removed inside a compute
    /// block.
    pub fn on_entry_removed(
        mut self,
        hook: impl Fn(&K, &Arc<CacheEntry<K, V>>) + Send + Sync + 'static,
    ) -> Self {
        self.remove_hook = Some(Box::new(hook));
        self
    }

    /// Wire everything together.
    ///
    /// The container owns no segments until [`SegmentedContainer::start`] or
    /// [`SegmentedContainer::add_segments`] assigns them.
    pub fn build(self) -> SegmentedContainer<K, V> {
        let config = self.config;
        let time = self.time.unwrap_or_else(|| Arc::new(WallClock));
        let partitioner = self
            .partitioner
            .unwrap_or_else(|| Arc::new(HashPartitioner::new(config.segment_count)));
        let entry_factory = self
            .entry_factory
            .unwrap_or_else(|| Arc::new(DefaultEntryFactory::new(time.clone())));
        let expiration = self
            .expiration
            .unwrap_or_else(|| Arc::new(LocalExpirationManager));
        let activator = self
            .activator
            .unwrap_or_else(|| Arc::new(NoopActivationManager));
        let passivator = self
            .passivator
            .unwrap_or_else(|| Arc::new(NoopPassivationManager));
        let eviction_manager = self
            .eviction_manager
            .unwrap_or_else(|| Arc::new(NoopEvictionManager));
        let listeners = Arc::new(ListenerRegistry::new());
        let control = config
            .is_bounded()
            .then(|| Arc::new(SizeControl::new(config.max_entries)));
        let bridge = Arc::new(EvictionBridge {
            passivator: passivator.clone(),
            activator: activator.clone(),
            eviction_manager: eviction_manager.clone(),
            listeners: listeners.clone(),
            passivation: config.passivation,
        });
        let segments: Vec<RwLock<Option<Arc<dyn SegmentMap<K, V>>>>> = (0..config.segment_count)
            .map(|_| RwLock::new(None))
            .collect();
        SegmentedContainer {
            config,
            segments,
            partitioner,
            time,
            entry_factory,
            expiration,
            activator,
            passivator,
            listeners,
            write_hook: self.write_hook,
            remove_hook: self.remove_hook,
            control,
            bridge,
            counters: AtomicCounters::new(),
        }
    }
}

impl<K, V> Default for ContainerBuilder<K, V>
where
    K: Hash + Eq + Clone + fmt::Debug + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(all(test, not(feature = "loom")))]
mod tests {
    use super::*;
    use crate::entry::Metadata;

    fn container() -> SegmentedContainer<String, u64> {
        let c = SegmentedContainer::builder()
            .config(ContainerConfig::new().with_segment_count(4))
            .build();
        c.start();
        c
    }

    #[test]
    fn test_put_get_roundtrip() {
        let c = container();
        c.put("a".into(), 1, Metadata::immortal()).unwrap();
        let entry = c.get(&"a".to_string()).unwrap();
        assert_eq!(*entry.value(), 1);
        let snap = c.counters();
        assert_eq!(snap.stores, 1);
        assert_eq!(snap.hits, 1);
    }

    #[test]
    fn test_entry_lives_in_partitioned_segment() {
        let c = container();
        let partitioner = HashPartitioner::new(4);
        for i in 0..50u64 {
            let key = format!("key-{i}");
            c.put(key.clone(), i, Metadata::immortal()).unwrap();
            let segment = partitioner.segment(&key);
            assert!(c.peek_in(segment, &key).is_some());
            for other in (0..4).filter(|&s| s != segment) {
                assert!(c.peek_in(other, &key).is_none());
            }
        }
    }

    #[test]
    fn test_put_unowned_segment_is_error() {
        let c: SegmentedContainer<String, u64> = SegmentedContainer::builder()
            .config(ContainerConfig::new().with_segment_count(4))
            .build();
        // never started: nothing owned
        let err = c.put("a".into(), 1, Metadata::immortal()).unwrap_err();
        assert!(matches!(err, ContainerError::SegmentNotOwned { .. }));
        assert!(c.get(&"a".to_string()).is_none());
    }

    #[test]
    fn test_put_out_of_range_segment_is_error() {
        let c = container();
        let err = c
            .put_in(99, "a".into(), 1, Metadata::immortal())
            .unwrap_err();
        assert!(matches!(err, ContainerError::SegmentOutOfRange { .. }));
    }

    #[test]
    fn test_remove_returns_previous() {
        let c = container();
        c.put("a".into(), 7, Metadata::immortal()).unwrap();
        let prev = c.remove(&"a".to_string()).unwrap().unwrap();
        assert_eq!(*prev.value(), 7);
        assert!(c.get(&"a".to_string()).is_none());
        assert!(c.remove(&"a".to_string()).unwrap().is_none());
    }

    #[test]
    fn test_listener_registry_order_and_removal() {
        let c = container();
        let log = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let l1 = {
            let log = log.clone();
            c.add_removal_listener(move |_| log.lock().push(1))
        };
        let _l2 = {
            let log = log.clone();
            c.add_removal_listener(move |_| log.lock().push(2))
        };
        c.put("a".into(), 1, Metadata::immortal()).unwrap();
        c.remove(&"a".to_string()).unwrap();
        assert_eq!(*log.lock(), vec![1, 2]);

        c.remove_removal_listener(l1);
        c.put("b".into(), 1, Metadata::immortal()).unwrap();
        c.remove(&"b".to_string()).unwrap();
        assert_eq!(*log.lock(), vec![1, 2, 2]);
    }

    #[test]
    fn test_panicking_listener_does_not_abort() {
        let c = container();
        c.add_removal_listener(|_| panic!("boom"));
        c.put("a".into(), 1, Metadata::immortal()).unwrap();
        assert!(c.remove(&"a".to_string()).unwrap().is_some());
        assert!(c.get(&"a".to_string()).is_none());
    }

    #[test]
    fn test_clear_in_scopes_to_segments() {
        let c = container();
        for i in 0..50u64 {
            c.put(format!("key-{i}"), i, Metadata::immortal()).unwrap();
        }
        let before = c.size_including_expired();
        assert_eq!(before, 50);
        c.clear_in(&[0, 1]);
        let after = c.size_including_expired();
        assert_eq!(after, c.size_including_expired_in(&[2, 3]));
        assert!(after < before);
        c.clear();
        assert_eq!(c.size_including_expired(), 0);
    }

    #[test]
    fn test_resize_requires_bounded() {
        let c = container();
        assert!(matches!(c.resize(10), Err(ContainerError::NotBounded)));
        assert_eq!(c.capacity(), None);
    }

    #[test]
    fn test_stop_releases_segments() {
        let c = container();
        c.put("a".into(), 1, Metadata::immortal()).unwrap();
        c.stop();
        assert_eq!(c.size_including_expired(), 0);
        assert!(c.get(&"a".to_string()).is_none());
        assert!(c.put("a".into(), 1, Metadata::immortal()).is_err());
    }
}
