//! Wall-clock abstraction.
//!
//! Every expiration decision in the container samples the clock through
//! [`TimeService`], so deployments can swap the source (and tests can drive
//! it by hand with [`ManualClock`]).

use crate::sync::{AtomicU64, Ordering};

/// Source of wall-clock time in milliseconds since the Unix epoch.
///
/// A monotonic source is not required but preferred; the container only
/// compares samples taken through the same service.
pub trait TimeService: Send + Sync {
    /// Current wall-clock time in milliseconds.
    fn wall_clock_time(&self) -> u64;
}

/// Production clock backed by `clocksource`'s coarse wall clock.
///
/// Samples have second granularity, scaled to the millisecond contract;
/// lifespans are long relative to a second, and the cheap cached read is
/// what the hot path wants.
#[derive(Debug, Default, Clone, Copy)]
pub struct WallClock;

impl TimeService for WallClock {
    fn wall_clock_time(&self) -> u64 {
        clocksource::coarse::UnixInstant::now()
            .duration_since(clocksource::coarse::UnixInstant::EPOCH)
            .as_secs() as u64
            * 1_000
    }
}

/// Manually driven clock for tests and deterministic replay.
#[derive(Debug)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    /// Create a clock frozen at `start` milliseconds.
    pub fn new(start: u64) -> Self {
        Self {
            now: AtomicU64::new(start),
        }
    }

    /// Set the current time.
    pub fn set(&self, millis: u64) {
        self.now.store(millis, Ordering::Release);
    }

    /// Advance the current time by `millis`.
    pub fn advance(&self, millis: u64) {
        self.now.fetch_add(millis, Ordering::AcqRel);
    }
}

impl TimeService for ManualClock {
    fn wall_clock_time(&self) -> u64 {
        self.now.load(Ordering::Acquire)
    }
}
