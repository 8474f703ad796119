//! gridmap: segmented concurrent in-memory data container for a
//! distributed key-value cache.
//!
//! Keys are partitioned across a fixed number of segments derived from the
//! cluster's hashing topology. Each segment owns an independent concurrent
//! map of live entries; the container routes operations by segment, runs
//! every mutation inside a per-key compute block, checks expiration against
//! an injected hook, and cooperates with activation/passivation and
//! eviction collaborators.
//!
//! # Architecture
//!
//! ```text
//!            +-----------------------------------------+
//!            |           SegmentedContainer            |
//!            | partitioner / clock / collaborators     |
//!            +----+--------------+--------------+------+
//!                 |              |              |
//!                 v              v              v
//!           +-----------+ +-----------+  +-----------+
//!           | Segment 0 | | Segment 1 |  | Segment N |
//!           | (map)     | | (map)     |  | (map)     |
//!           +-----------+ +-----------+  +-----------+
//!                 \              |              /
//!                  \             v             /
//!                   +-------------------------+
//!                   |  SizeControl (bounded)  |
//!                   | len + frequency sketch  |
//!                   +-------------------------+
//! ```
//!
//! Segment maps come in two variants: [`UnboundedSegment`] is a plain
//! concurrent map, [`BoundedSegment`] shares a global live-entry counter and
//! frequency sketch so the container can evict sampled victims once the
//! configured capacity is crossed.
//!
//! # Example
//!
//! ```
//! use gridmap::{ContainerConfig, Metadata, SegmentedContainer};
//!
//! let container: SegmentedContainer<String, u64> = SegmentedContainer::builder()
//!     .config(ContainerConfig::new().with_segment_count(16))
//!     .build();
//! container.start();
//!
//! container.put("answer".into(), 42, Metadata::immortal()).unwrap();
//! let entry = container.get(&"answer".to_string()).unwrap();
//! assert_eq!(*entry.value(), 42);
//! ```
//!
//! # Concurrency
//!
//! Each segment map is an independent lock domain. A compute block holds the
//! owning segment's write lock for its duration, so no two computes on the
//! same key interleave and the collaborator callbacks running inside it are
//! part of the atomic step. Iteration snapshots one segment at a time and
//! never holds a lock across yields.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod config;
mod container;
mod entry;
mod error;
mod eviction;
mod hooks;
mod iter;
mod metrics;
mod partition;
mod segment;
mod sync;
mod time;

pub use config::{ContainerConfig, StorageType};
pub use container::{ComputeAction, ContainerBuilder, ListenerId, SegmentedContainer};
pub use entry::{CacheEntry, DefaultEntryFactory, EntryFactory, IMMORTAL, Metadata, WriteMeta};
pub use error::{CollaboratorError, ContainerError, ContainerResult};
pub use eviction::FrequencySketch;
pub use hooks::{
    ActivationManager, EvictionManager, ExpirationManager, LocalExpirationManager,
    NoopActivationManager, NoopEvictionManager, NoopPassivationManager, PassivationManager,
};
pub use iter::{Iter, RawIter};
pub use metrics::{AtomicCounters, CounterSnapshot};
pub use partition::{HashPartitioner, KeyPartitioner};
pub use segment::{
    BoundedSegment, EvictionCallbacks, RemovalCause, SegmentMap, UnboundedSegment,
};
pub use time::{ManualClock, TimeService, WallClock};
