//! Collaborator contracts.
//!
//! The container never owns expiration reaping, persistence, or activation
//! bookkeeping; it invokes these capability traits at well-defined points
//! inside its compute blocks. Implementations must not call back into the
//! container for the same key (or the same segment for passivation), since
//! they run while that segment's write lock is held.
//!
//! The expiration predicates are synchronous. An implementation backed by an
//! asynchronous reaper joins its completion internally before returning; the
//! container always waits for the decision before proceeding either way.

use crate::entry::CacheEntry;
use crate::error::CollaboratorError;
use std::sync::Arc;

/// Authoritative expiration decisions.
///
/// The container samples the clock, applies the local expiry predicate, and
/// then delegates here. A `true` return confirms the entry is dead (the
/// container treats it as absent); `false` vetoes and the entry remains.
pub trait ExpirationManager<K, V>: Send + Sync {
    /// Decide expiration for an entry touched by a point read or write.
    fn entry_expired_in_memory(&self, entry: &CacheEntry<K, V>, now: u64) -> bool;

    /// Decide expiration for an entry seen during iteration.
    ///
    /// Called once per skipped candidate; implementations keep this cheap
    /// and defer any remote notification.
    fn entry_expired_in_memory_from_iteration(&self, entry: &CacheEntry<K, V>, now: u64) -> bool;
}

/// Expiration manager for a node with no external reaper: every locally
/// expired entry is confirmed dead.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalExpirationManager;

impl<K, V> ExpirationManager<K, V> for LocalExpirationManager {
    fn entry_expired_in_memory(&self, _entry: &CacheEntry<K, V>, _now: u64) -> bool {
        true
    }

    fn entry_expired_in_memory_from_iteration(&self, _entry: &CacheEntry<K, V>, _now: u64) -> bool {
        true
    }
}

/// Activation bookkeeping for entries that may have a passivated copy in the
/// store.
pub trait ActivationManager<K>: Send + Sync {
    /// A write installed an entry; `was_create` is true when the slot was
    /// previously empty, in which case any staged persisted copy must be
    /// purged.
    fn on_update(&self, key: &K, was_create: bool) -> Result<(), CollaboratorError>;

    /// A removal ran; `was_absent` is true when there was nothing in memory.
    fn on_remove(&self, key: &K, was_absent: bool) -> Result<(), CollaboratorError>;
}

/// No-op [`ActivationManager`].
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopActivationManager;

impl<K> ActivationManager<K> for NoopActivationManager {
    fn on_update(&self, _key: &K, _was_create: bool) -> Result<(), CollaboratorError> {
        Ok(())
    }

    fn on_remove(&self, _key: &K, _was_absent: bool) -> Result<(), CollaboratorError> {
        Ok(())
    }
}

/// Write hook moving an entry to the persistent store before it leaves
/// memory for size reasons.
pub trait PassivationManager<K, V>: Send + Sync {
    /// Persist `entry`; failure aborts the eviction and the entry stays.
    fn passivate(&self, entry: &Arc<CacheEntry<K, V>>) -> Result<(), CollaboratorError>;
}

/// No-op [`PassivationManager`].
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopPassivationManager;

impl<K, V> PassivationManager<K, V> for NoopPassivationManager {
    fn passivate(&self, _entry: &Arc<CacheEntry<K, V>>) -> Result<(), CollaboratorError> {
        Ok(())
    }
}

/// Post-removal notification for size-based evictions.
pub trait EvictionManager<K, V>: Send + Sync {
    /// Entries were evicted for size; delivered after the removal, on the
    /// evicting thread.
    fn on_entry_eviction(&self, evicted: &[Arc<CacheEntry<K, V>>]);
}

/// No-op [`EvictionManager`].
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopEvictionManager;

impl<K, V> EvictionManager<K, V> for NoopEvictionManager {
    fn on_entry_eviction(&self, _evicted: &[Arc<CacheEntry<K, V>>]) {}
}
