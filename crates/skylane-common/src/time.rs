// ============================================
// File: crates/skylane-common/src/time.rs
// ============================================
//! # Time Utilities
//!
//! ## Creation Reason
//! Token expiry and bandwidth windows are expressed in wall-clock Unix
//! seconds, while liveness tracking needs a monotonic clock shared between
//! tasks. Both live here so every role reads time the same way.
//!
//! ## Main Functionality
//! - `unix_timestamp()` / `unix_timestamp_nanos()`: wall-clock readings
//! - `is_expired()`: the single expiry rule used by every token
//! - `AtomicInstant`: lock-free monotonic timestamp
//!
//! ## ⚠️ Important Note for Next Developer
//! - Tokens are valid while `now <= expire`; do not reimplement the
//!   comparison elsewhere, call `is_expired`
//! - Engine code takes `now` as a parameter; only loops read the clock
//!
//! ## Last Modified
//! v0.1.0 - Initial time utilities

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

// ============================================
// Wall Clock
// ============================================

/// Returns the current Unix timestamp in seconds.
///
/// A clock set before the epoch reads as zero rather than panicking.
#[must_use]
pub fn unix_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

/// Returns the current Unix timestamp in nanoseconds, truncated to 64 bits.
#[must_use]
pub fn unix_timestamp_nanos() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or_default()
}

/// Returns `true` once `now` has passed `expire_timestamp`.
#[must_use]
pub const fn is_expired(expire_timestamp: u64, now: u64) -> bool {
    now > expire_timestamp
}

// ============================================
// AtomicInstant
// ============================================

/// Thread-safe wrapper around [`Instant`] for concurrent access.
///
/// Stores nanoseconds elapsed since a process-wide reference instant in an
/// `AtomicU64`, so the receive task can stamp activity while the state task
/// reads it without taking a lock.
///
/// # Example
/// ```
/// use skylane_common::time::AtomicInstant;
/// use std::time::Instant;
///
/// let atomic = AtomicInstant::now();
/// atomic.store(Instant::now());
/// assert!(atomic.elapsed().as_secs() < 1);
/// ```
#[derive(Debug)]
pub struct AtomicInstant {
    nanos: AtomicU64,
}

impl AtomicInstant {
    fn reference() -> Instant {
        static REFERENCE: OnceLock<Instant> = OnceLock::new();
        *REFERENCE.get_or_init(Instant::now)
    }

    fn offset(instant: Instant) -> u64 {
        instant
            .checked_duration_since(Self::reference())
            .map_or(0, |d| d.as_nanos() as u64)
    }

    /// Creates a new `AtomicInstant` set to the current time.
    #[must_use]
    pub fn now() -> Self {
        Self {
            nanos: AtomicU64::new(Self::offset(Instant::now())),
        }
    }

    /// Loads the stored instant.
    #[must_use]
    pub fn load(&self) -> Instant {
        Self::reference() + Duration::from_nanos(self.nanos.load(Ordering::Relaxed))
    }

    /// Stores a new instant.
    pub fn store(&self, instant: Instant) {
        self.nanos.store(Self::offset(instant), Ordering::Relaxed);
    }

    /// Updates to the current time.
    pub fn touch(&self) {
        self.store(Instant::now());
    }

    /// Returns the elapsed time since the stored instant.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.load().elapsed()
    }

    /// Checks if more than `duration` has elapsed since the stored instant.
    #[must_use]
    pub fn has_elapsed(&self, duration: Duration) -> bool {
        self.elapsed() > duration
    }
}

impl Default for AtomicInstant {
    fn default() -> Self {
        Self::now()
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_unix_timestamp_is_plausible() {
        // 2020-01-01
        assert!(unix_timestamp() > 1_577_836_800);
        assert!(unix_timestamp_nanos() / 1_000_000_000 >= unix_timestamp() - 1);
    }

    #[test]
    fn test_expiry_is_inclusive() {
        assert!(!is_expired(100, 99));
        assert!(!is_expired(100, 100));
        assert!(is_expired(100, 101));
    }

    #[test]
    fn test_atomic_instant_store() {
        let atomic = AtomicInstant::now();
        thread::sleep(Duration::from_millis(10));

        let before = atomic.load();
        atomic.touch();
        assert!(atomic.load() > before);
    }

    #[test]
    fn test_atomic_instant_elapsed() {
        let atomic = AtomicInstant::now();
        thread::sleep(Duration::from_millis(10));

        assert!(atomic.elapsed() >= Duration::from_millis(10));
        assert!(atomic.has_elapsed(Duration::from_millis(5)));
    }
}
