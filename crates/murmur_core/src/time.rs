//! Time types for murmur.
//!
//! The protocol engine never reads a wall clock. It is handed a
//! `LogicalTime` (milliseconds since some origin) by whoever drives it,
//! which is what lets the simulator run whole clusters deterministically.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Logical time in milliseconds since the clock's origin
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct LogicalTime(u64);

impl LogicalTime {
    /// Time zero
    #[must_use]
    pub const fn zero() -> Self {
        Self(0)
    }

    /// Create from milliseconds
    #[must_use]
    pub const fn from_millis(ms: u64) -> Self {
        Self(ms)
    }

    /// Get milliseconds
    #[must_use]
    pub const fn as_millis(&self) -> u64 {
        self.0
    }

    /// The time `ms` milliseconds after this one
    #[must_use]
    pub const fn after(&self, ms: u64) -> Self {
        Self(self.0.saturating_add(ms))
    }

    /// Milliseconds elapsed since `earlier`, zero if `earlier` is later
    #[must_use]
    pub const fn since(&self, earlier: LogicalTime) -> u64 {
        self.0.saturating_sub(earlier.0)
    }
}

impl std::fmt::Display for LogicalTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

impl From<u64> for LogicalTime {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

/// Source of the current logical time
pub trait Clock: Send + Sync {
    /// Current time
    fn now(&self) -> LogicalTime;
}

/// Clock backed by the process monotonic clock
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    /// Create a clock whose origin is now
    #[must_use]
    pub fn new() -> Self {
        Self { origin: Instant::now() }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> LogicalTime {
        LogicalTime(self.origin.elapsed().as_millis() as u64)
    }
}

/// Manually advanced clock, for simulation and tests
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    /// Create a clock at time zero
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance by `ms` milliseconds and return the new time
    pub fn advance(&self, ms: u64) -> LogicalTime {
        LogicalTime(self.now.fetch_add(ms, Ordering::SeqCst) + ms)
    }

    /// Jump to an absolute time; never moves backwards
    pub fn set(&self, to: LogicalTime) {
        self.now.fetch_max(to.0, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> LogicalTime {
        LogicalTime(self.now.load(Ordering::SeqCst))
    }
}
