// ============================================
// File: crates/skylane-core/src/protocol/messages.rs
// ============================================
//! # Protocol Message Definitions
//!
//! ## Creation Reason
//! Defines packet types, size limits and the reliability header shared by
//! both hops (client↔gateway and gateway↔server).
//!
//! ## Main Functionality
//! - `PacketType`: Payload / Challenge
//! - `PayloadHeader`: ack, ack bits, gateway id, server id, inner type, flags
//! - Size limits enforced by the filter before any parsing
//!
//! ## Packet Sizes
//! | Packet | Fixed overhead (bytes) |
//! |--------|------------------------|
//! | Client hop payload | 213 (+40 with challenge token) |
//! | Challenge | 91 |
//! | Relay hop payload | 117 + both addresses |
//!
//! ## ⚠️ Important Note for Next Developer
//! - Field order is critical - DO NOT reorder without a version bump
//! - Add new packet types at end of enum to maintain compatibility
//!
//! ## Last Modified
//! v0.1.0 - Initial message definitions

use bytes::BufMut;

use crate::error::Result;
use crate::protocol::codec::{Codec, Reader};
use crate::reliability::{AckBits, ACK_BITS_BYTES};

// ============================================
// Constants
// ============================================

/// Only protocol version on the wire.
pub const PROTOCOL_VERSION: u8 = 0;

/// Smallest packet the filter accepts: version, type, chonkle, pittle.
pub const MIN_PACKET_BYTES: usize = 1 + 1 + 15 + 2;

/// Largest packet any role sends or accepts.
pub const MAX_PACKET_BYTES: usize = 1500;

/// Inner type for application payload.
pub const INNER_TYPE_PAYLOAD: u8 = 0;

/// Flag: a challenge token follows the payload header.
pub const FLAG_CHALLENGE_TOKEN: u8 = 0x01;

/// Encoded size of [`PayloadHeader`].
pub const PAYLOAD_HEADER_BYTES: usize = 8 + ACK_BITS_BYTES + 8 + 8 + 1 + 1;

// ============================================
// PacketType
// ============================================

/// Packet type identifier (second byte of every packet).
///
/// | Value | Type |
/// |-------|------|
/// | 0x00 | Payload |
/// | 0x01 | Challenge |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketType {
    /// Application payload with reliability header.
    Payload = 0x00,
    /// Gateway challenge carrying a challenge token.
    Challenge = 0x01,
}

impl PacketType {
    /// Converts a byte to a `PacketType`.
    #[must_use]
    pub const fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x00 => Some(Self::Payload),
            0x01 => Some(Self::Challenge),
            _ => None,
        }
    }

    /// Converts the `PacketType` to its byte representation.
    #[must_use]
    pub const fn as_byte(&self) -> u8 {
        *self as u8
    }
}

impl TryFrom<u8> for PacketType {
    type Error = u8;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        Self::from_byte(value).ok_or(value)
    }
}

// ============================================
// PayloadHeader
// ============================================

/// Reliability and routing header of a payload packet.
///
/// # Wire Format (58 bytes)
/// ```text
/// ┌──────────┬─────────────┬────────────┬───────────┬────────────┬───────┐
/// │ ack u64  │ ack bits 32 │ gateway u64│ server u64│ inner type │ flags │
/// └──────────┴─────────────┴────────────┴───────────┴────────────┴───────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PayloadHeader {
    /// Highest sequence received from the peer
    pub ack: u64,
    /// Window of received sequences below `ack`
    pub ack_bits: AckBits,
    /// Gateway the sender believes it is talking through (0 = unknown)
    pub gateway_id: u64,
    /// Server the sender believes it is talking to (0 = unknown)
    pub server_id: u64,
    /// Kind of payload
    pub inner_type: u8,
    /// Bit flags (`FLAG_*`)
    pub flags: u8,
}

impl PayloadHeader {
    /// Whether the challenge-token flag is set.
    #[must_use]
    pub const fn has_challenge_token(&self) -> bool {
        self.flags & FLAG_CHALLENGE_TOKEN != 0
    }
}

impl Default for PayloadHeader {
    fn default() -> Self {
        Self {
            ack: 0,
            ack_bits: [0u8; ACK_BITS_BYTES],
            gateway_id: 0,
            server_id: 0,
            inner_type: INNER_TYPE_PAYLOAD,
            flags: 0,
        }
    }
}

impl Codec for PayloadHeader {
    fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.put_u64_le(self.ack);
        buf.put_slice(&self.ack_bits);
        buf.put_u64_le(self.gateway_id);
        buf.put_u64_le(self.server_id);
        buf.put_u8(self.inner_type);
        buf.put_u8(self.flags);
    }

    fn decode(reader: &mut Reader<'_>) -> Result<Self> {
        Ok(Self {
            ack: reader.read_u64()?,
            ack_bits: reader.read_array()?,
            gateway_id: reader.read_u64()?,
            server_id: reader.read_u64()?,
            inner_type: reader.read_u8()?,
            flags: reader.read_u8()?,
        })
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packet_type_bytes() {
        assert_eq!(PacketType::from_byte(0), Some(PacketType::Payload));
        assert_eq!(PacketType::from_byte(1), Some(PacketType::Challenge));
        assert_eq!(PacketType::from_byte(2), None);
        assert_eq!(PacketType::try_from(9), Err(9));
        assert_eq!(PacketType::Challenge.as_byte(), 1);
    }

    #[test]
    fn test_payload_header_layout() {
        let mut header = PayloadHeader {
            ack: 0x0102,
            gateway_id: 7,
            server_id: 9,
            flags: FLAG_CHALLENGE_TOKEN,
            ..PayloadHeader::default()
        };
        header.ack_bits[0] = 0xFF;

        let bytes = header.to_bytes();
        assert_eq!(bytes.len(), PAYLOAD_HEADER_BYTES);
        assert_eq!(&bytes[..2], &[0x02, 0x01]);
        assert_eq!(bytes[8], 0xFF);
        assert_eq!(bytes[PAYLOAD_HEADER_BYTES - 1], FLAG_CHALLENGE_TOKEN);
        assert!(header.has_challenge_token());
        assert_eq!(PayloadHeader::from_slice(&bytes).unwrap(), header);
    }
}
