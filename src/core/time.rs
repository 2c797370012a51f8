//! Time utilities.
//!
//! Every lease deadline and retransmission window is expressed as a
//! [`Timestamp`] in milliseconds since the UNIX epoch. Components never sample
//! the wall clock directly; they read it through a [`Clock`] so tests can
//! drive expirations deterministically with a [`ManualClock`].

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// A point in time, in milliseconds since the UNIX epoch.
///
/// This is also the `expire` value carried in protocol responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp {
    /// Milliseconds since the UNIX epoch.
    pub ms: u64,
}

impl Timestamp {
    /// Create a timestamp from a millisecond value.
    pub const fn new(ms: u64) -> Self {
        Self { ms }
    }

    /// The zero timestamp. Used as "no expiry" on idle entries and
    /// on responses that carry no lease.
    pub const fn zero() -> Self {
        Self { ms: 0 }
    }

    /// Check whether this is the zero timestamp.
    pub const fn is_zero(self) -> bool {
        self.ms == 0
    }

    /// Add milliseconds, saturating at `u64::MAX`.
    pub const fn add_ms(self, ms: u64) -> Self {
        Self {
            ms: self.ms.saturating_add(ms),
        }
    }

    /// Subtract milliseconds, saturating at zero.
    pub const fn sub_ms(self, ms: u64) -> Self {
        Self {
            ms: self.ms.saturating_sub(ms),
        }
    }

    /// Check if this timestamp is at or after the given deadline.
    pub const fn is_at_or_after(self, deadline: Timestamp) -> bool {
        self.ms >= deadline.ms
    }

    /// Check if this timestamp is before the given deadline.
    pub const fn is_before(self, deadline: Timestamp) -> bool {
        self.ms < deadline.ms
    }

    /// Milliseconds until a deadline.
    ///
    /// Returns 0 if the deadline has already passed.
    pub fn ms_until(self, deadline: Timestamp) -> u64 {
        deadline.ms.saturating_sub(self.ms)
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}ms", self.ms)
    }
}

impl From<u64> for Timestamp {
    fn from(ms: u64) -> Self {
        Self::new(ms)
    }
}

// ============================================================================
// Clocks
// ============================================================================

/// Source of the current time.
pub trait Clock: Send + Sync {
    /// Current time.
    fn now(&self) -> Timestamp;
}

/// Wall-clock time source.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        Timestamp::new(now)
    }
}

/// Manually advanced clock for deterministic tests and simulations.
#[derive(Debug, Default)]
pub struct ManualClock {
    now_ms: AtomicU64,
}

impl ManualClock {
    /// Create a clock starting at the given millisecond value.
    pub fn new(start_ms: u64) -> Self {
        Self {
            now_ms: AtomicU64::new(start_ms),
        }
    }

    /// Move the clock forward.
    pub fn advance(&self, ms: u64) {
        self.now_ms.fetch_add(ms, Ordering::AcqRel);
    }

    /// Set the clock to an absolute value.
    pub fn set(&self, ms: u64) {
        self.now_ms.store(ms, Ordering::Release);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        Timestamp::new(self.now_ms.load(Ordering::Acquire))
    }
}
