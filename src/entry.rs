//! Cache entry model.
//!
//! An entry is an immutable-on-write record: every logical mutation builds a
//! fresh [`CacheEntry`] through an [`EntryFactory`] and installs it inside a
//! compute block. The only field that moves after construction is the
//! last-used time, which [`CacheEntry::touch`] advances monotonically.
//!
//! Lifespan and max-idle are millisecond durations with `-1` meaning
//! "unbounded". An entry can expire iff at least one of the two is set; it is
//! expired at time `T` when its lifespan has elapsed since creation or its
//! max-idle has elapsed since last use.

use crate::sync::{AtomicU64, Ordering};
use crate::time::TimeService;
use std::fmt;
use std::sync::Arc;

/// Sentinel for "no lifespan" / "no max-idle".
pub const IMMORTAL: i64 = -1;

/// Expiration and versioning metadata attached to an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Metadata {
    /// Maximum entry lifetime in milliseconds since creation, `-1` for none.
    pub lifespan: i64,
    /// Maximum idle time in milliseconds since last use, `-1` for none.
    pub max_idle: i64,
    /// Optional version token for conditional replication.
    pub version: Option<u64>,
}

impl Metadata {
    /// Metadata for an entry that never expires.
    pub const fn immortal() -> Self {
        Self {
            lifespan: IMMORTAL,
            max_idle: IMMORTAL,
            version: None,
        }
    }

    /// Set the lifespan in milliseconds.
    pub fn with_lifespan(mut self, millis: i64) -> Self {
        self.lifespan = millis;
        self
    }

    /// Set the max-idle in milliseconds.
    pub fn with_max_idle(mut self, millis: i64) -> Self {
        self.max_idle = millis;
        self
    }

    /// Set the version token.
    pub fn with_version(mut self, version: u64) -> Self {
        self.version = Some(version);
        self
    }
}

impl Default for Metadata {
    fn default() -> Self {
        Self::immortal()
    }
}

/// Metadata as supplied to a write.
///
/// A write against a key owned primarily by another node carries its inner
/// metadata behind an L1 wrapper; the container unwraps it before storing and
/// tags the stored entry as L1 so downstream systems can tell the copies
/// apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMeta {
    /// Metadata for a primary-owned entry.
    Standard(Metadata),
    /// Metadata for a short-lived local copy of a remotely-owned entry.
    L1(Metadata),
}

impl WriteMeta {
    /// Wrap `inner` metadata for an L1 write.
    pub fn l1(inner: Metadata) -> Self {
        Self::L1(inner)
    }

    /// The metadata that will be visible on the stored entry.
    pub fn inner(&self) -> Metadata {
        match self {
            Self::Standard(m) | Self::L1(m) => *m,
        }
    }
}

impl From<Metadata> for WriteMeta {
    fn from(m: Metadata) -> Self {
        Self::Standard(m)
    }
}

/// A key-value pair plus metadata, shared as `Arc<CacheEntry>`.
///
/// References handed out by the container are logically immutable; `touch`
/// only advances the last-used time and never moves it backwards.
pub struct CacheEntry<K, V> {
    key: K,
    value: V,
    created: u64,
    last_used: AtomicU64,
    lifespan: i64,
    max_idle: i64,
    version: Option<u64>,
    l1: bool,
}

impl<K, V> CacheEntry<K, V> {
    /// Create an entry with `created = last_used = now`.
    pub fn new(key: K, value: V, meta: Metadata, now: u64, l1: bool) -> Self {
        Self::with_times(key, value, meta, now, now, l1)
    }

    /// Create an entry with explicit timestamps.
    ///
    /// Used by factories that preserve the creation time across updates.
    pub fn with_times(
        key: K,
        value: V,
        meta: Metadata,
        created: u64,
        last_used: u64,
        l1: bool,
    ) -> Self {
        Self {
            key,
            value,
            created,
            last_used: AtomicU64::new(last_used),
            lifespan: meta.lifespan,
            max_idle: meta.max_idle,
            version: meta.version,
            l1,
        }
    }

    /// The entry's key.
    #[inline]
    pub fn key(&self) -> &K {
        &self.key
    }

    /// The entry's value.
    #[inline]
    pub fn value(&self) -> &V {
        &self.value
    }

    /// Creation time in milliseconds.
    #[inline]
    pub fn created(&self) -> u64 {
        self.created
    }

    /// Last-used time in milliseconds.
    #[inline]
    pub fn last_used(&self) -> u64 {
        self.last_used.load(Ordering::Acquire)
    }

    /// Lifespan in milliseconds, `-1` for none.
    #[inline]
    pub fn lifespan(&self) -> i64 {
        self.lifespan
    }

    /// Max-idle in milliseconds, `-1` for none.
    #[inline]
    pub fn max_idle(&self) -> i64 {
        self.max_idle
    }

    /// Version token, if any.
    #[inline]
    pub fn version(&self) -> Option<u64> {
        self.version
    }

    /// Whether this entry is a local copy of a remotely-owned entry.
    #[inline]
    pub fn is_l1(&self) -> bool {
        self.l1
    }

    /// The metadata visible on this entry.
    pub fn metadata(&self) -> Metadata {
        Metadata {
            lifespan: self.lifespan,
            max_idle: self.max_idle,
            version: self.version,
        }
    }

    /// Whether any expiration bound is set.
    #[inline]
    pub fn can_expire(&self) -> bool {
        self.lifespan >= 0 || self.max_idle >= 0
    }

    /// Whether the entry is expired at `now`.
    #[inline]
    pub fn is_expired(&self, now: u64) -> bool {
        if self.lifespan >= 0 && now.saturating_sub(self.created) >= self.lifespan as u64 {
            return true;
        }
        self.max_idle >= 0 && now.saturating_sub(self.last_used()) >= self.max_idle as u64
    }

    /// Advance the last-used time to `now`, never moving it backwards.
    #[inline]
    pub fn touch(&self, now: u64) {
        self.last_used.fetch_max(now, Ordering::AcqRel);
    }
}

impl<K: fmt::Debug, V> fmt::Debug for CacheEntry<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheEntry")
            .field("key", &self.key)
            .field("created", &self.created)
            .field("last_used", &self.last_used())
            .field("lifespan", &self.lifespan)
            .field("max_idle", &self.max_idle)
            .field("version", &self.version)
            .field("l1", &self.l1)
            .finish_non_exhaustive()
    }
}

/// Builds entries for the container's write paths.
///
/// Implementations decide how timestamps are assigned; the default factory
/// samples the injected [`TimeService`] at build time.
pub trait EntryFactory<K, V>: Send + Sync {
    /// Build a brand-new entry.
    fn create(&self, key: K, value: V, meta: Metadata) -> Arc<CacheEntry<K, V>>;

    /// Build the replacement for `prev`, preserving its creation time.
    fn update(&self, prev: &CacheEntry<K, V>, value: V, meta: Metadata) -> Arc<CacheEntry<K, V>>;

    /// Build a new L1 entry.
    fn create_l1(&self, key: K, value: V, meta: Metadata) -> Arc<CacheEntry<K, V>>;
}

/// Default [`EntryFactory`] stamping entries from a [`TimeService`].
pub struct DefaultEntryFactory {
    time: Arc<dyn TimeService>,
}

impl DefaultEntryFactory {
    /// Create a factory reading timestamps from `time`.
    pub fn new(time: Arc<dyn TimeService>) -> Self {
        Self { time }
    }
}

impl<K, V> EntryFactory<K, V> for DefaultEntryFactory
where
    K: Clone + Send + Sync,
    V: Send + Sync,
{
    fn create(&self, key: K, value: V, meta: Metadata) -> Arc<CacheEntry<K, V>> {
        let now = self.time.wall_clock_time();
        Arc::new(CacheEntry::new(key, value, meta, now, false))
    }

    fn update(&self, prev: &CacheEntry<K, V>, value: V, meta: Metadata) -> Arc<CacheEntry<K, V>> {
        let now = self.time.wall_clock_time();
        Arc::new(CacheEntry::with_times(
            prev.key().clone(),
            value,
            meta,
            prev.created(),
            now,
            prev.is_l1(),
        ))
    }

    fn create_l1(&self, key: K, value: V, meta: Metadata) -> Arc<CacheEntry<K, V>> {
        let now = self.time.wall_clock_time();
        Arc::new(CacheEntry::new(key, value, meta, now, true))
    }
}
