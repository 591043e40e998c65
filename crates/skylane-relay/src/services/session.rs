// ============================================
// File: crates/skylane-relay/src/services/session.rs
// ============================================
//! # Session Table
//!
//! ## Creation Reason
//! Gateway and server workers keep per-session state keyed by the client's
//! public key. Sessions are never closed explicitly; they age out.
//!
//! ## Main Functionality
//! - `SessionTable<T>`: two generations of `SessionId → T`
//! - Lookup promotes hits from the old generation into the new one
//! - Rotation drops the old generation wholesale
//!
//! ## Eviction Model
//! ```text
//!            rotate                     rotate
//!   new ──────────────► old ──────────────► dropped
//!    ▲                   │
//!    └──── lookup hit ───┘
//! ```
//! A session untouched for two intervals is gone; one touched within the
//! last interval survives the next rotation. No timers, no table walks.
//!
//! ## ⚠️ Important Note for Next Developer
//! - One table per worker; there is no locking in here
//! - `maybe_rotate` reads the clock only every `ROTATION_CHECK_PACKETS`
//!   calls. Worst-case idle lifetime is therefore slightly above two
//!   intervals under low traffic, and a touch between two clock reads
//!   counts as happening at the earlier read
//!
//! ## Last Modified
//! v0.1.0 - Double-buffer session table

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tracing::debug;

use skylane_common::SessionId;

/// Calls to `maybe_rotate` between clock reads.
pub const ROTATION_CHECK_PACKETS: u32 = 64;

// ============================================
// SessionTable
// ============================================

/// Double-buffered session map with O(1) amortized eviction.
#[derive(Debug)]
pub struct SessionTable<T> {
    new: HashMap<SessionId, T>,
    old: HashMap<SessionId, T>,
    interval: Duration,
    last_rotation: Instant,
    calls: u32,
}

impl<T> SessionTable<T> {
    /// Creates an empty table rotating every `interval`.
    #[must_use]
    pub fn new(interval: Duration) -> Self {
        Self::starting_at(interval, Instant::now())
    }

    /// Creates an empty table whose first interval starts at `now`.
    #[must_use]
    pub fn starting_at(interval: Duration, now: Instant) -> Self {
        Self {
            new: HashMap::new(),
            old: HashMap::new(),
            interval,
            last_rotation: now,
            calls: 0,
        }
    }

    /// Looks up a session, promoting it from the old generation.
    pub fn get_mut(&mut self, id: &SessionId) -> Option<&mut T> {
        if !self.new.contains_key(id) {
            let entry = self.old.remove(id)?;
            self.new.insert(*id, entry);
        }
        self.new.get_mut(id)
    }

    /// Looks up a session without touching its generation.
    #[must_use]
    pub fn peek(&self, id: &SessionId) -> Option<&T> {
        self.new.get(id).or_else(|| self.old.get(id))
    }

    /// Whether a session is present in either generation.
    #[must_use]
    pub fn contains(&self, id: &SessionId) -> bool {
        self.new.contains_key(id) || self.old.contains_key(id)
    }

    /// Looks up a session, creating it with `create` on first touch.
    pub fn get_or_insert_with(&mut self, id: SessionId, create: impl FnOnce() -> T) -> &mut T {
        let old = &mut self.old;
        self.new
            .entry(id)
            .or_insert_with(|| old.remove(&id).unwrap_or_else(create))
    }

    /// Inserts or replaces a session in the new generation.
    pub fn insert(&mut self, id: SessionId, entry: T) {
        self.old.remove(&id);
        self.new.insert(id, entry);
    }

    /// Rotates if the interval has passed, reading the clock only every
    /// `ROTATION_CHECK_PACKETS` calls. Returns `true` on rotation.
    pub fn maybe_rotate(&mut self) -> bool {
        self.calls = self.calls.wrapping_add(1);
        if self.calls % ROTATION_CHECK_PACKETS != 0 {
            return false;
        }
        self.rotate_if_due(Instant::now())
    }

    /// Rotates if `now` is at least one interval past the last rotation.
    /// Two or more intervals without a rotation expire both generations.
    pub fn rotate_if_due(&mut self, now: Instant) -> bool {
        let elapsed = now.saturating_duration_since(self.last_rotation);
        if elapsed < self.interval {
            return false;
        }
        if elapsed >= self.interval.saturating_mul(2) {
            let expired = self.len();
            self.new.clear();
            self.old.clear();
            debug!(expired, "Session table idle for two intervals; cleared");
        } else {
            self.rotate();
        }
        self.last_rotation = now;
        true
    }

    /// Drops the old generation and ages the new one.
    pub fn rotate(&mut self) {
        let expired = self.old.len();
        self.old = std::mem::take(&mut self.new);
        debug!(expired, live = self.old.len(), "Session table rotated");
    }

    /// Sessions across both generations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.new.len() + self.old.len()
    }

    /// `true` when no session is held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.new.is_empty() && self.old.is_empty()
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    const INTERVAL: Duration = Duration::from_secs(10);

    fn id(byte: u8) -> SessionId {
        SessionId::from_array([byte; 32])
    }

    #[test]
    fn test_insert_and_lookup() {
        let mut table = SessionTable::new(INTERVAL);
        *table.get_or_insert_with(id(1), || 5u32) += 1;
        assert_eq!(table.peek(&id(1)), Some(&6));
        assert!(table.get_mut(&id(2)).is_none());
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_untouched_session_evicted_after_two_intervals() {
        let start = Instant::now();
        let mut table = SessionTable::starting_at(INTERVAL, start);
        table.insert(id(1), ());

        assert!(table.rotate_if_due(start + INTERVAL));
        assert!(table.contains(&id(1)));
        assert!(table.rotate_if_due(start + INTERVAL * 2));
        assert!(!table.contains(&id(1)));
        assert!(table.is_empty());
    }

    #[test]
    fn test_long_gap_expires_both_generations() {
        let start = Instant::now();
        let mut table = SessionTable::starting_at(INTERVAL, start);
        table.insert(id(1), ());
        assert!(table.rotate_if_due(start + INTERVAL));
        table.insert(id(2), ());

        // No rotation check for three intervals
        assert!(table.rotate_if_due(start + INTERVAL * 4));
        assert!(table.get_mut(&id(1)).is_none());
        assert!(table.get_mut(&id(2)).is_none());
        assert!(table.is_empty());
    }

    #[test]
    fn test_untouched_for_three_intervals_is_absent() {
        let start = Instant::now();
        let mut table = SessionTable::starting_at(INTERVAL, start);
        table.insert(id(1), 0u8);
        assert!(table.rotate_if_due(start + INTERVAL * 3));
        assert!(table.get_mut(&id(1)).is_none());
    }

    #[test]
    fn test_touched_session_survives_rotation() {
        let start = Instant::now();
        let mut table = SessionTable::starting_at(INTERVAL, start);
        table.insert(id(1), 0u8);

        assert!(table.rotate_if_due(start + INTERVAL));
        // Touch while in the old generation
        assert!(table.get_mut(&id(1)).is_some());
        assert!(table.rotate_if_due(start + INTERVAL * 2));
        assert!(table.contains(&id(1)));
        assert!(table.rotate_if_due(start + INTERVAL * 3));
        assert!(!table.contains(&id(1)));
    }

    #[test]
    fn test_get_or_insert_promotes_existing_entry() {
        let mut table = SessionTable::new(INTERVAL);
        table.insert(id(3), 42u64);
        table.rotate();
        let entry = table.get_or_insert_with(id(3), || 0);
        assert_eq!(*entry, 42);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_rotation_not_due() {
        let start = Instant::now();
        let mut table = SessionTable::starting_at(INTERVAL, start);
        table.insert(id(1), ());
        assert!(!table.rotate_if_due(start + INTERVAL / 2));
        assert!(table.contains(&id(1)));
    }

    #[test]
    fn test_maybe_rotate_reads_clock_sparingly() {
        let mut table: SessionTable<()> = SessionTable::starting_at(Duration::ZERO, Instant::now());
        for _ in 1..ROTATION_CHECK_PACKETS {
            assert!(!table.maybe_rotate());
        }
        assert!(table.maybe_rotate());
    }
}
