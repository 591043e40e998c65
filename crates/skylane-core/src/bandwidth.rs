// ============================================
// File: crates/skylane-core/src/bandwidth.rs
// ============================================
//! # Bandwidth Limiter
//!
//! ## Creation Reason
//! Each session (and each client) is capped at a fixed number of bits per
//! wall-clock second. The limiter is consulted before every send; a send
//! that would overflow the current second is skipped, not queued.
//!
//! ## Main Functionality
//! - `BandwidthLimiter::try_consume()`: account a packet or choke it
//! - `wire_bits()`: on-wire cost of a UDP payload including IP/UDP headers
//!
//! ## ⚠️ Important Note for Next Developer
//! - The window is aligned to whole Unix seconds, not rolling; a burst may
//!   use the full cap at the end of one second and again at the start of
//!   the next
//! - Callers pass `now`; the limiter never reads the clock itself
//!
//! ## Last Modified
//! v0.1.0 - Initial implementation

/// IPv4 + UDP header bytes counted against bandwidth.
pub const UDP_IP_HEADER_BYTES: usize = 28;

/// Wire cost in bits of a UDP payload of `payload_bytes`.
#[must_use]
pub const fn wire_bits(payload_bytes: usize) -> u64 {
    ((payload_bytes + UDP_IP_HEADER_BYTES) * 8) as u64
}

/// Converts a kbps envelope to bits per second.
#[must_use]
pub const fn kbps_to_bits_per_second(kbps: u32) -> u64 {
    kbps as u64 * 1000
}

/// Fixed one-second window bit counter.
///
/// # Example
/// ```
/// use skylane_core::bandwidth::BandwidthLimiter;
///
/// let mut limiter = BandwidthLimiter::new(1000);
/// assert!(limiter.try_consume(600, 10));
/// assert!(!limiter.try_consume(600, 10)); // choked
/// assert!(limiter.try_consume(600, 11)); // next second
/// ```
#[derive(Debug, Clone)]
pub struct BandwidthLimiter {
    bits_per_second: u64,
    accumulated_bits: u64,
    window_start: u64,
}

impl BandwidthLimiter {
    /// Creates a limiter capped at `bits_per_second`.
    #[must_use]
    pub const fn new(bits_per_second: u64) -> Self {
        Self {
            bits_per_second,
            accumulated_bits: 0,
            window_start: 0,
        }
    }

    /// Creates a limiter from a kbps envelope.
    #[must_use]
    pub const fn from_kbps(kbps: u32) -> Self {
        Self::new(kbps_to_bits_per_second(kbps))
    }

    /// Cap in bits per second.
    #[must_use]
    pub const fn bits_per_second(&self) -> u64 {
        self.bits_per_second
    }

    /// Changes the cap without resetting the current window.
    pub fn set_bits_per_second(&mut self, bits_per_second: u64) {
        self.bits_per_second = bits_per_second;
    }

    /// Accounts `bits` in the window containing `now` (Unix seconds).
    ///
    /// Returns `false` (choke) when the send would exceed the cap; nothing
    /// is accounted in that case.
    pub fn try_consume(&mut self, bits: u64, now: u64) -> bool {
        if now != self.window_start {
            self.window_start = now;
            self.accumulated_bits = 0;
        }
        let total = self.accumulated_bits.saturating_add(bits);
        if total > self.bits_per_second {
            return false;
        }
        self.accumulated_bits = total;
        true
    }
}

// ============================================
// Tests
// ============================================
