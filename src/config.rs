//! Container configuration.

use serde::Deserialize;

/// Entry representation selected by the deployment.
///
/// The container records the mode and exposes it; under typed keys and
/// values the representation itself is the caller's instantiation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StorageType {
    /// Entries hold deserialized values.
    #[default]
    Object,
    /// Entries hold serialized byte values.
    Binary,
    /// Entries hold values in native memory.
    OffHeap,
}

/// Typed configuration record for the container.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ContainerConfig {
    /// Number of segments; fixed at construction.
    pub segment_count: usize,
    /// Entry representation.
    pub storage: StorageType,
    /// Maximum live entries across all segments; `0` means unbounded.
    pub max_entries: usize,
    /// Whether size-based evictions passivate entries to the store.
    pub passivation: bool,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            segment_count: 256,
            storage: StorageType::Object,
            max_entries: 0,
            passivation: false,
        }
    }
}

impl ContainerConfig {
    /// Create a config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the segment count.
    pub fn with_segment_count(mut self, count: usize) -> Self {
        self.segment_count = count;
        self
    }

    /// Set the entry representation.
    pub fn with_storage(mut self, storage: StorageType) -> Self {
        self.storage = storage;
        self
    }

    /// Bound the container to `max_entries` live entries.
    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries;
        self
    }

    /// Enable or disable passivation on size-based eviction.
    pub fn with_passivation(mut self, enabled: bool) -> Self {
        self.passivation = enabled;
        self
    }

    /// Whether the container uses the bounded segment variant.
    pub fn is_bounded(&self) -> bool {
        self.max_entries > 0
    }
}
