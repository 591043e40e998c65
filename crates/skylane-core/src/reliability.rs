// ============================================
// File: crates/skylane-core/src/reliability.rs
// ============================================
//! # Reliability & Acknowledgment Engine
//!
//! ## Creation Reason
//! Payloads are never retransmitted, but both ends still need to know what
//! arrived. Each packet carries the sender's sequence plus an `ack` and a
//! 256-bit window of what the sender has received. This module builds and
//! consumes those fields.
//!
//! ## Main Functionality
//! - `SequenceCounter`: per-direction send counter that refuses to wrap
//! - `ReceiveWindow`: received ring, highest sequence, staleness rule,
//!   ack-bit construction
//! - `AckTracker`: turns incoming `(ack, ack_bits)` into newly confirmed
//!   sequences, each reported exactly once
//! - `PayloadIdRing`: maps sent sequences back to application payload ids
//! - `Reliability`: all of the above for one session and direction pair
//!
//! ## Ack Bits
//! ```text
//! bit i (byte i / 8, bit i % 8, LSB first) set  <=>  sequence (ack - i) received
//! ```
//! `ack` is the highest sequence received, so a sender that has received
//! anything always sets bit 0. An all-zero field means nothing has arrived
//! yet, and `ack` is then not acknowledged.
//!
//! ## ⚠️ Important Note for Next Developer
//! - `RING_CAPACITY` (1024) defines the dedup window and must not shrink
//!   below `ACK_WINDOW` (256)
//! - `STALE_SEQUENCE_THRESHOLD` (100) is deliberately smaller than the
//!   ring: older-but-not-stale packets are recorded for acks but never move
//!   the receive sequence
//!
//! ## Last Modified
//! v0.1.0 - Initial reliability engine

use crate::error::{CoreError, Result};

// ============================================
// Constants
// ============================================

/// Slots in every sequence ring.
pub const RING_CAPACITY: usize = 1024;

/// Sequences covered by one ack-bits field.
pub const ACK_WINDOW: usize = 256;

/// Size of the ack-bits field on the wire.
pub const ACK_BITS_BYTES: usize = ACK_WINDOW / 8;

/// Packets trailing the receive sequence by more than this are ignored.
pub const STALE_SEQUENCE_THRESHOLD: u64 = 100;

const EMPTY: u64 = u64::MAX;

/// 256-bit acknowledgment bitmap.
pub type AckBits = [u8; ACK_BITS_BYTES];

const fn slot(sequence: u64) -> usize {
    (sequence % RING_CAPACITY as u64) as usize
}

// ============================================
// SequenceCounter
// ============================================

/// Monotonic send counter.
///
/// The envelope nonce is derived from the sequence, so the counter stops
/// before it could wrap and reuse one.
#[derive(Debug, Clone)]
pub struct SequenceCounter {
    next: u64,
}

impl SequenceCounter {
    /// Starts counting at `first`.
    #[must_use]
    pub const fn starting_at(first: u64) -> Self {
        Self { next: first }
    }

    /// The value `next()` would hand out.
    #[must_use]
    pub const fn peek(&self) -> u64 {
        self.next
    }

    /// Takes the next sequence.
    ///
    /// # Errors
    /// `SequenceExhausted` once the 64-bit space is used up; the session
    /// must be re-keyed (reconnect with a new connect token).
    pub fn next(&mut self) -> Result<u64> {
        if self.next == EMPTY {
            return Err(CoreError::SequenceExhausted);
        }
        let sequence = self.next;
        self.next += 1;
        Ok(sequence)
    }
}

// ============================================
// SequenceRing
// ============================================

/// Fixed ring recording which sequences have been seen.
#[derive(Debug, Clone)]
struct SequenceRing {
    slots: Box<[u64]>,
}

impl SequenceRing {
    fn new() -> Self {
        Self {
            slots: vec![EMPTY; RING_CAPACITY].into_boxed_slice(),
        }
    }

    fn insert(&mut self, sequence: u64) {
        self.slots[slot(sequence)] = sequence;
    }

    fn contains(&self, sequence: u64) -> bool {
        sequence != EMPTY && self.slots[slot(sequence)] == sequence
    }
}

// ============================================
// ReceiveWindow
// ============================================

/// What happened to an incoming sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveOutcome {
    /// New and highest so far; the receive sequence moved.
    Advanced,
    /// New but older than the highest; recorded for acks only.
    Accepted,
    /// Trails the receive sequence by more than the threshold; ignored.
    Stale,
    /// Already recorded.
    Duplicate,
}

impl ReceiveOutcome {
    /// `true` when the packet should be processed further.
    #[must_use]
    pub const fn is_fresh(self) -> bool {
        matches!(self, Self::Advanced | Self::Accepted)
    }
}

/// Receive side of one direction.
#[derive(Debug, Clone)]
pub struct ReceiveWindow {
    sequence: u64,
    received: SequenceRing,
}

impl ReceiveWindow {
    /// Starts with `sequence` as the current receive sequence.
    #[must_use]
    pub fn new(sequence: u64) -> Self {
        Self {
            sequence,
            received: SequenceRing::new(),
        }
    }

    /// Highest sequence received (the `ack` to send).
    #[must_use]
    pub const fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Records an incoming sequence.
    pub fn receive(&mut self, sequence: u64) -> ReceiveOutcome {
        if self.sequence.saturating_sub(sequence) > STALE_SEQUENCE_THRESHOLD {
            return ReceiveOutcome::Stale;
        }
        if self.received.contains(sequence) {
            return ReceiveOutcome::Duplicate;
        }
        self.received.insert(sequence);
        if sequence > self.sequence {
            self.sequence = sequence;
            ReceiveOutcome::Advanced
        } else {
            ReceiveOutcome::Accepted
        }
    }

    /// Builds the ack bitmap relative to [`ReceiveWindow::sequence`].
    #[must_use]
    pub fn ack_bits(&self) -> AckBits {
        let mut bits = [0u8; ACK_BITS_BYTES];
        for i in 0..ACK_WINDOW {
            let Some(sequence) = self.sequence.checked_sub(i as u64) else {
                break;
            };
            if self.received.contains(sequence) {
                bits[i / 8] |= 1 << (i % 8);
            }
        }
        bits
    }
}

/// Expands an `(ack, ack_bits)` pair into the acknowledged sequences.
///
/// `ack` itself is reported through bit 0, which [`ReceiveWindow::ack_bits`]
/// sets whenever anything was received. A clear bit 0 means `ack` is only
/// the starting point, not a received sequence.
pub fn acked_sequences(ack: u64, bits: &AckBits) -> impl Iterator<Item = u64> + '_ {
    (0..ACK_WINDOW)
        .filter(move |&i| bits[i / 8] & (1 << (i % 8)) != 0)
        .filter_map(move |i| ack.checked_sub(i as u64))
}

// ============================================
// AckTracker
// ============================================

/// Deduplicates acknowledgments for locally sent sequences.
#[derive(Debug, Clone)]
pub struct AckTracker {
    acked: SequenceRing,
    highest: u64,
}

impl AckTracker {
    /// Creates an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self {
            acked: SequenceRing::new(),
            highest: 0,
        }
    }

    /// Returns the sequences confirmed for the first time by this pair.
    ///
    /// A sequence is reported at most once over the tracker's lifetime.
    /// Sequences that have fallen a full ring behind the newest report
    /// are ignored, since their slot may already be reused.
    pub fn process_acks(&mut self, ack: u64, bits: &AckBits) -> Vec<u64> {
        let mut confirmed = Vec::new();
        for sequence in acked_sequences(ack, bits) {
            if sequence == EMPTY
                || sequence.saturating_add(RING_CAPACITY as u64) <= self.highest
                || self.acked.contains(sequence)
            {
                continue;
            }
            self.acked.insert(sequence);
            self.highest = self.highest.max(sequence);
            confirmed.push(sequence);
        }
        confirmed
    }
}

impl Default for AckTracker {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================
// PayloadIdRing
// ============================================

/// Maps sent sequences to application payload ids.
#[derive(Debug, Clone)]
pub struct PayloadIdRing {
    slots: Box<[(u64, u64)]>,
}

impl PayloadIdRing {
    /// Creates an empty ring.
    #[must_use]
    pub fn new() -> Self {
        Self {
            slots: vec![(EMPTY, 0); RING_CAPACITY].into_boxed_slice(),
        }
    }

    /// Remembers which payload went out under `sequence`.
    pub fn insert(&mut self, sequence: u64, payload_id: u64) {
        self.slots[slot(sequence)] = (sequence, payload_id);
    }

    /// Looks up the payload sent under `sequence`, if still in the ring.
    #[must_use]
    pub fn get(&self, sequence: u64) -> Option<u64> {
        let (stored, payload_id) = self.slots[slot(sequence)];
        (stored == sequence && stored != EMPTY).then_some(payload_id)
    }
}

impl Default for PayloadIdRing {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================
// Reliability
// ============================================

/// Full reliability state for one session.
#[derive(Debug, Clone)]
pub struct Reliability {
    send: SequenceCounter,
    receive: ReceiveWindow,
    acks: AckTracker,
    payload_ids: PayloadIdRing,
}

impl Reliability {
    /// Fresh state for an endpoint that has not heard from its peer yet.
    #[must_use]
    pub fn new() -> Self {
        Self::with_sequences(0, 0)
    }

    /// State seeded from the first packet seen for a session: sending
    /// continues after the peer's `ack`, receiving starts at its `sequence`.
    #[must_use]
    pub fn seeded(first_ack: u64, first_sequence: u64) -> Self {
        Self::with_sequences(first_ack.saturating_add(1), first_sequence)
    }

    fn with_sequences(next_send: u64, receive: u64) -> Self {
        Self {
            send: SequenceCounter::starting_at(next_send),
            receive: ReceiveWindow::new(receive),
            acks: AckTracker::new(),
            payload_ids: PayloadIdRing::new(),
        }
    }

    /// Takes the next send sequence and records its payload id.
    ///
    /// # Errors
    /// `SequenceExhausted`, see [`SequenceCounter::next`].
    pub fn next_send(&mut self, payload_id: Option<u64>) -> Result<u64> {
        let sequence = self.send.next()?;
        if let Some(id) = payload_id {
            self.payload_ids.insert(sequence, id);
        }
        Ok(sequence)
    }

    /// Records an incoming sequence.
    pub fn receive(&mut self, sequence: u64) -> ReceiveOutcome {
        self.receive.receive(sequence)
    }

    /// The `ack` and `ack_bits` to put in the next outgoing packet.
    #[must_use]
    pub fn ack_fields(&self) -> (u64, AckBits) {
        (self.receive.sequence(), self.receive.ack_bits())
    }

    /// Consumes the peer's ack fields; returns newly confirmed sequences
    /// paired with their payload ids where known.
    pub fn process_acks(&mut self, ack: u64, bits: &AckBits) -> Vec<(u64, Option<u64>)> {
        self.acks
            .process_acks(ack, bits)
            .into_iter()
            .map(|sequence| (sequence, self.payload_ids.get(sequence)))
            .collect()
    }

    /// Current receive sequence.
    #[must_use]
    pub const fn receive_sequence(&self) -> u64 {
        self.receive.sequence()
    }

    /// Next send sequence.
    #[must_use]
    pub const fn send_sequence(&self) -> u64 {
        self.send.peek()
    }
}

impl Default for Reliability {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_refuses_to_wrap() {
        let mut counter = SequenceCounter::starting_at(u64::MAX - 1);
        assert_eq!(counter.next().unwrap(), u64::MAX - 1);
        assert!(matches!(counter.next(), Err(CoreError::SequenceExhausted)));
        assert!(matches!(counter.next(), Err(CoreError::SequenceExhausted)));
    }

    #[test]
    fn test_receive_outcomes() {
        let mut window = ReceiveWindow::new(0);
        assert_eq!(window.receive(0), ReceiveOutcome::Accepted);
        assert_eq!(window.receive(5), ReceiveOutcome::Advanced);
        assert_eq!(window.receive(3), ReceiveOutcome::Accepted);
        assert_eq!(window.receive(3), ReceiveOutcome::Duplicate);
        assert_eq!(window.sequence(), 5);

        assert_eq!(window.receive(500), ReceiveOutcome::Advanced);
        // 100 behind is still usable, 101 behind is stale
        assert_eq!(window.receive(400), ReceiveOutcome::Accepted);
        assert_eq!(window.receive(399), ReceiveOutcome::Stale);
        assert_eq!(window.sequence(), 500);
    }

    #[test]
    fn test_ack_bits_layout() {
        let mut window = ReceiveWindow::new(0);
        for seq in [10, 9, 7, 2] {
            window.receive(seq);
        }
        let bits = window.ack_bits();
        // ack = 10: bits 0 (10), 1 (9), 3 (7), 8 (2)
        assert_eq!(bits[0], 0b0000_1011);
        assert_eq!(bits[1], 0b0000_0001);
        assert!(bits[2..].iter().all(|&b| b == 0));

        let decoded: Vec<u64> = acked_sequences(10, &bits).collect();
        assert_eq!(decoded, vec![10, 9, 7, 2]);
    }

    #[test]
    fn test_ack_bits_near_zero() {
        let mut window = ReceiveWindow::new(0);
        window.receive(1);
        let bits = window.ack_bits();
        assert_eq!(acked_sequences(1, &bits).collect::<Vec<_>>(), vec![1]);
        // Bits past zero are never produced
        assert_eq!(acked_sequences(1, &[0xFF; ACK_BITS_BYTES]).count(), 2);
    }

    #[test]
    fn test_ack_is_received_through_bit_zero() {
        // Fresh peer: ack field present, nothing received
        assert_eq!(acked_sequences(0, &[0u8; ACK_BITS_BYTES]).count(), 0);
        assert!(AckTracker::new().process_acks(0, &[0u8; ACK_BITS_BYTES]).is_empty());

        let mut window = ReceiveWindow::new(0);
        window.receive(5);
        let bits = window.ack_bits();
        assert_eq!(bits[0] & 1, 1);
        assert_eq!(acked_sequences(5, &bits).next(), Some(5));
    }

    #[test]
    fn test_process_acks_reports_once() {
        let mut tracker = AckTracker::new();
        let mut bits = [0u8; ACK_BITS_BYTES];
        bits[0] = 0b0000_0111; // 20, 19, 18

        assert_eq!(tracker.process_acks(20, &bits), vec![20, 19, 18]);
        assert!(tracker.process_acks(20, &bits).is_empty());

        // Window slides: 21 is new, 20 and 19 are repeats
        bits[0] = 0b0000_0111;
        assert_eq!(tracker.process_acks(21, &bits), vec![21]);
    }

    #[test]
    fn test_process_acks_ignores_sequences_a_ring_behind() {
        let mut tracker = AckTracker::new();
        let mut bits = [0u8; ACK_BITS_BYTES];
        bits[0] = 1;
        assert_eq!(tracker.process_acks(5, &bits), vec![5]);
        assert_eq!(tracker.process_acks(5 + RING_CAPACITY as u64, &bits), vec![5 + 1024]);
        // 5 shares a slot with 1029 and must not be reported again
        assert!(tracker.process_acks(5, &bits).is_empty());
    }

    #[test]
    fn test_payload_id_ring() {
        let mut ring = PayloadIdRing::new();
        ring.insert(3, 300);
        assert_eq!(ring.get(3), Some(300));
        assert_eq!(ring.get(4), None);
        ring.insert(3 + RING_CAPACITY as u64, 999);
        assert_eq!(ring.get(3), None);
    }

    #[test]
    fn test_seeded_state() {
        let mut state = Reliability::seeded(41, 17);
        assert_eq!(state.send_sequence(), 42);
        assert_eq!(state.receive_sequence(), 17);
        assert_eq!(state.receive(17), ReceiveOutcome::Accepted);
        assert_eq!(state.next_send(Some(7)).unwrap(), 42);
    }

    #[test]
    fn test_acks_translate_to_payload_ids() {
        let mut sender = Reliability::new();
        let mut receiver = Reliability::new();

        for id in 100..105 {
            let seq = sender.next_send(Some(id)).unwrap();
            if seq != 2 {
                receiver.receive(seq);
            }
        }
        let (ack, bits) = receiver.ack_fields();
        let delivered = sender.process_acks(ack, &bits);
        assert_eq!(
            delivered,
            vec![(4, Some(104)), (3, Some(103)), (1, Some(101)), (0, Some(100))]
        );
    }
}
