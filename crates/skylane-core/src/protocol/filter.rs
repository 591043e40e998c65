// ============================================
// File: crates/skylane-core/src/protocol/filter.rs
// ============================================
//! # Packet Obfuscation Filter
//!
//! ## Creation Reason
//! Every UDP datagram that reaches a gateway, server or client has to be
//! classified before any decryption happens. Two keyless tags make that
//! classification cheap: a 15-byte chonkle after the type byte and a 2-byte
//! pittle at the tail. Both are pure functions of the filter magic, the
//! source and destination endpoints, and the packet length.
//!
//! ## Main Functionality
//! - `generate_chonkle()` / `generate_pittle()`: tag derivation
//! - `PacketFilter::basic()`: shape check with no addressing context
//! - `PacketFilter::advanced()`: recompute both tags from the observed
//!   4-tuple and compare
//! - `PacketFilter::stamp()`: write both tags into an outgoing packet
//!
//! ## Main Logical Flow
//! ```text
//! recv ──► basic() ──► advanced(from, to) ──► decrypt / parse
//!            │               │
//!            ▼               ▼
//!          drop            drop
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - This is not authentication. It rejects noise and reflection probes
//!   before the expensive path runs
//! - The byte arithmetic below is a compatibility contract between every
//!   role. Any change breaks interop; the reference vectors in the tests
//!   must keep passing
//!
//! ## Last Modified
//! v0.1.0 - Initial filter implementation

use crate::protocol::address::Address;
use crate::protocol::messages::{PacketType, MAX_PACKET_BYTES, MIN_PACKET_BYTES, PROTOCOL_VERSION};

// ============================================
// Constants
// ============================================

/// Size of the chonkle tag.
pub const CHONKLE_BYTES: usize = 15;

/// Size of the pittle tag.
pub const PITTLE_BYTES: usize = 2;

/// Offset of the chonkle tag (after version and type).
pub const CHONKLE_OFFSET: usize = 2;

/// Size of the filter magic.
pub const MAGIC_BYTES: usize = 8;

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

// ============================================
// Tag Derivation
// ============================================

fn fnv1a(hash: u64, bytes: &[u8]) -> u64 {
    bytes
        .iter()
        .fold(hash, |h, &b| (h ^ u64::from(b)).wrapping_mul(FNV_PRIME))
}

/// Derives the 15-byte chonkle tag.
///
/// FNV-1a 64 over `magic | from ip | from port | to ip | to port | length`,
/// then each output byte is forced into a narrow range.
#[must_use]
pub fn generate_chonkle(
    magic: &[u8; MAGIC_BYTES],
    from: &Address,
    to: &Address,
    packet_len: usize,
) -> [u8; CHONKLE_BYTES] {
    let mut hash = fnv1a(FNV_OFFSET_BASIS, magic);
    hash = fnv1a(hash, from.ip_bytes());
    hash = fnv1a(hash, &from.port().to_le_bytes());
    hash = fnv1a(hash, to.ip_bytes());
    hash = fnv1a(hash, &to.port().to_le_bytes());
    hash = fnv1a(hash, &(packet_len as u32).to_le_bytes());

    let d = hash.to_le_bytes();
    [
        ((d[6] & 0xC0) >> 6) + 42,
        (d[3] & 0x1F) + 200,
        ((d[2] & 0xFC) >> 2) + 5,
        d[0],
        (d[2] & 0x03) + 78,
        (d[4] & 0x7F) + 96,
        ((d[1] & 0xFC) >> 2) + 100,
        if d[7] & 0x01 == 0 { 79 } else { 7 },
        if d[4] & 0x80 == 0 { 37 } else { 83 },
        (d[5] & 0x07) + 124,
        ((d[1] & 0xE0) >> 5) + 175,
        (d[6] & 0x3F) + 33,
        [97, 5, 43, 13][usize::from(d[1] & 0x03)],
        ((d[5] & 0xF8) >> 3) + 210,
        ((d[7] & 0xFE) >> 1) + 17,
    ]
}

/// Derives the 2-byte pittle tag.
///
/// A wrapping 16-bit byte sum over the same endpoint fields and length,
/// folded so that the second byte is a function of the first.
#[must_use]
pub fn generate_pittle(from: &Address, to: &Address, packet_len: usize) -> [u8; PITTLE_BYTES] {
    let sum = from
        .ip_bytes()
        .iter()
        .chain(&from.port().to_le_bytes())
        .chain(to.ip_bytes())
        .chain(&to.port().to_le_bytes())
        .chain(&(packet_len as u32).to_le_bytes())
        .fold(0u16, |acc, &b| acc.wrapping_add(u16::from(b)));

    let s = sum.to_le_bytes();
    let p0 = 1 | (s[0] ^ s[1] ^ 193);
    let p1 = 1 | ((255 - p0) ^ 113);
    [p0, p1]
}

fn chonkle_in_range(c: &[u8]) -> bool {
    (42..=45).contains(&c[0])
        && (200..=231).contains(&c[1])
        && (5..=68).contains(&c[2])
        && (78..=81).contains(&c[4])
        && (96..=223).contains(&c[5])
        && (100..=163).contains(&c[6])
        && matches!(c[7], 7 | 79)
        && matches!(c[8], 37 | 83)
        && (124..=131).contains(&c[9])
        && (175..=182).contains(&c[10])
        && (33..=96).contains(&c[11])
        && matches!(c[12], 97 | 5 | 43 | 13)
        && (210..=241).contains(&c[13])
        && (17..=144).contains(&c[14])
}

fn pittle_in_shape(p0: u8, p1: u8) -> bool {
    p0 & 1 == 1 && p1 == 1 | ((255 - p0) ^ 113)
}

// ============================================
// PacketFilter
// ============================================

/// Filter bound to the process-wide magic value.
///
/// Constructed once from configuration and shared by value; it holds no
/// mutable state.
///
/// # Example
/// ```
/// use skylane_core::protocol::{Address, PacketFilter};
///
/// let filter = PacketFilter::new([1, 2, 3, 4, 5, 6, 7, 8]);
/// let from = Address::V4 { ip: [10, 0, 0, 1], port: 4000 };
/// let to = Address::V4 { ip: [10, 0, 0, 2], port: 5000 };
///
/// let mut packet = vec![0u8; 64];
/// filter.stamp(&mut packet, &from, &to);
/// assert!(PacketFilter::basic(&packet));
/// assert!(filter.advanced(&packet, &from, &to));
/// assert!(!filter.advanced(&packet, &to, &from));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketFilter {
    magic: [u8; MAGIC_BYTES],
}

impl PacketFilter {
    /// Creates a filter for the given magic.
    #[must_use]
    pub const fn new(magic: [u8; MAGIC_BYTES]) -> Self {
        Self { magic }
    }

    /// Returns the magic value.
    #[must_use]
    pub const fn magic(&self) -> &[u8; MAGIC_BYTES] {
        &self.magic
    }

    /// Shape precheck with no addressing context.
    ///
    /// Accepts only packets inside the size limits, with a known version and
    /// type byte, whose chonkle bytes are inside their ranges and whose
    /// pittle has the derived shape.
    #[must_use]
    pub fn basic(data: &[u8]) -> bool {
        if data.len() < MIN_PACKET_BYTES || data.len() > MAX_PACKET_BYTES {
            return false;
        }
        if data[0] != PROTOCOL_VERSION || PacketType::from_byte(data[1]).is_none() {
            return false;
        }
        let chonkle = &data[CHONKLE_OFFSET..CHONKLE_OFFSET + CHONKLE_BYTES];
        if !chonkle_in_range(chonkle) {
            return false;
        }
        let tail = data.len() - PITTLE_BYTES;
        pittle_in_shape(data[tail], data[tail + 1])
    }

    /// Recomputes both tags for the observed endpoints and compares them
    /// with the embedded values.
    #[must_use]
    pub fn advanced(&self, data: &[u8], from: &Address, to: &Address) -> bool {
        if data.len() < MIN_PACKET_BYTES || data.len() > MAX_PACKET_BYTES {
            return false;
        }
        let chonkle = generate_chonkle(&self.magic, from, to, data.len());
        if data[CHONKLE_OFFSET..CHONKLE_OFFSET + CHONKLE_BYTES] != chonkle {
            return false;
        }
        let pittle = generate_pittle(from, to, data.len());
        data[data.len() - PITTLE_BYTES..] == pittle
    }

    /// Runs `basic` then `advanced`.
    #[must_use]
    pub fn accepts(&self, data: &[u8], from: &Address, to: &Address) -> bool {
        Self::basic(data) && self.advanced(data, from, to)
    }

    /// Writes both tags into a fully laid-out packet.
    ///
    /// The packet must be at least `MIN_PACKET_BYTES` long; the length that
    /// goes into the tags is `packet.len()`.
    pub fn stamp(&self, packet: &mut [u8], from: &Address, to: &Address) {
        debug_assert!(packet.len() >= MIN_PACKET_BYTES);
        let len = packet.len();
        let chonkle = generate_chonkle(&self.magic, from, to, len);
        packet[CHONKLE_OFFSET..CHONKLE_OFFSET + CHONKLE_BYTES].copy_from_slice(&chonkle);
        packet[len - PITTLE_BYTES..].copy_from_slice(&generate_pittle(from, to, len));
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    const MAGIC: [u8; 8] = [1, 2, 3, 4, 5, 6, 7, 8];

    fn endpoints() -> (Address, Address) {
        (
            Address::V4 { ip: [1, 2, 3, 4], port: 1000 },
            Address::V4 { ip: [4, 3, 2, 1], port: 5000 },
        )
    }

    #[test]
    fn test_pittle_reference_vector() {
        let (from, to) = endpoints();
        assert_eq!(generate_pittle(&from, &to, 1000), [71, 201]);
    }

    #[test]
    fn test_chonkle_reference_vector() {
        let (from, to) = endpoints();
        let chonkle = generate_chonkle(&MAGIC, &from, &to, 1000);
        assert_eq!(chonkle[..8], [45, 203, 67, 96, 78, 180, 127, 7]);
        assert_eq!(
            chonkle,
            [45, 203, 67, 96, 78, 180, 127, 7, 83, 130, 178, 34, 5, 225, 115]
        );
    }

    #[test]
    fn test_stamped_packet_passes_both_filters() {
        let (from, to) = endpoints();
        let filter = PacketFilter::new(MAGIC);
        let mut packet = vec![0u8; 1000];
        packet[1] = PacketType::Challenge.as_byte();
        filter.stamp(&mut packet, &from, &to);

        assert!(PacketFilter::basic(&packet));
        assert!(filter.advanced(&packet, &from, &to));
        assert!(filter.accepts(&packet, &from, &to));
    }

    #[test]
    fn test_advanced_rejects_wrong_context() {
        let (from, to) = endpoints();
        let filter = PacketFilter::new(MAGIC);
        let mut packet = vec![0u8; 200];
        filter.stamp(&mut packet, &from, &to);

        // Another magic
        assert!(!PacketFilter::new([0; 8]).advanced(&packet, &from, &to));
        // Another source port
        let moved = Address::V4 { ip: [1, 2, 3, 4], port: 1001 };
        assert!(!filter.advanced(&packet, &moved, &to));
        // Truncated by one byte changes the length input
        assert!(!filter.advanced(&packet[..199], &from, &to));
    }

    #[test]
    fn test_basic_rejects_shape_violations() {
        let (from, to) = endpoints();
        let filter = PacketFilter::new(MAGIC);

        let mut packet = vec![0u8; 100];
        filter.stamp(&mut packet, &from, &to);
        assert!(PacketFilter::basic(&packet));

        let mut bad_version = packet.clone();
        bad_version[0] = 1;
        assert!(!PacketFilter::basic(&bad_version));

        let mut bad_type = packet.clone();
        bad_type[1] = 7;
        assert!(!PacketFilter::basic(&bad_type));

        let mut bad_pittle = packet.clone();
        bad_pittle[99] ^= 0x02;
        assert!(!PacketFilter::basic(&bad_pittle));

        assert!(!PacketFilter::basic(&[0u8; MIN_PACKET_BYTES - 1]));
        assert!(!PacketFilter::basic(&vec![0u8; MAX_PACKET_BYTES + 1]));
    }
}
