// ============================================
// File: crates/skylane-core/src/protocol/packet.rs
// ============================================
//! # Packet Layouts
//!
//! ## Creation Reason
//! Builds and parses the three datagrams of the relay. Each builder writes
//! the full layout, seals where needed, then stamps the obfuscation tags
//! last because they depend on the final length.
//!
//! ## Wire Format
//! ```text
//! Client hop payload (client↔gateway):
//! ┌─────┬──────┬─────────┬───────────────┬─────────┬────────────┬─────────┐
//! │ ver │ type │ chonkle │ session token │ tok seq │ session id │ seq     │
//! │ 1   │ 1    │ 15      │ 72            │ 8       │ 32         │ 8       │
//! ├─────┴──────┴─────────┴───────────────┴─────────┴────────────┴─────────┤
//! │                    ▲ associated data: session token .. seq            │
//! ├────────────────────────────────────────────────┬───────────┬──────────┤
//! │ payload header 58 │ [challenge 40] │ payload   │ MAC 16    │ pittle 2 │
//! │            ▲ encrypted                         │           │          │
//! └────────────────────────────────────────────────┴───────────┴──────────┘
//!
//! Challenge (gateway→client):
//!   ver · type · chonkle · session id (32) · challenge token (40) · pittle
//!
//! Relay hop payload (gateway↔server), not encrypted:
//!   ver · type · chonkle · gateway internal address · client address ·
//!   session id · seq · payload header · payload · pittle
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - Builders refuse to produce packets above `MAX_PACKET_BYTES`
//! - Parsers assume the filter already ran; they still bounds-check
//!   every field
//!
//! ## Last Modified
//! v0.1.0 - Initial packet layouts

use bytes::{BufMut, BytesMut};

use skylane_common::{SessionId, SESSION_ID_SIZE};

use crate::crypto::{Direction, Envelope, MAC_BYTES};
use crate::error::{CoreError, Result};
use crate::protocol::address::Address;
use crate::protocol::codec::{Codec, Reader};
use crate::protocol::filter::{PacketFilter, CHONKLE_BYTES, CHONKLE_OFFSET, PITTLE_BYTES};
use crate::protocol::messages::{
    PacketType, PayloadHeader, FLAG_CHALLENGE_TOKEN, MAX_PACKET_BYTES, PAYLOAD_HEADER_BYTES,
    PROTOCOL_VERSION,
};
use crate::token::{ENCRYPTED_CHALLENGE_TOKEN_BYTES, ENCRYPTED_SESSION_TOKEN_BYTES};

// ============================================
// Layout Constants
// ============================================

const BODY_OFFSET: usize = CHONKLE_OFFSET + CHONKLE_BYTES;

/// End of the associated-data region of a client hop packet.
const CLIENT_AAD_END: usize = BODY_OFFSET + ENCRYPTED_SESSION_TOKEN_BYTES + 8 + SESSION_ID_SIZE + 8;

/// Fixed bytes of a client hop payload packet.
pub const CLIENT_PACKET_OVERHEAD: usize =
    CLIENT_AAD_END + PAYLOAD_HEADER_BYTES + MAC_BYTES + PITTLE_BYTES;

/// Size of a challenge packet.
pub const CHALLENGE_PACKET_BYTES: usize =
    BODY_OFFSET + SESSION_ID_SIZE + ENCRYPTED_CHALLENGE_TOKEN_BYTES + PITTLE_BYTES;

/// Fixed bytes of a relay hop packet, excluding the two addresses.
pub const RELAY_PACKET_OVERHEAD: usize =
    BODY_OFFSET + SESSION_ID_SIZE + 8 + PAYLOAD_HEADER_BYTES + PITTLE_BYTES;

/// Largest payload a client packet can carry with a challenge attached.
pub const MAX_CLIENT_PAYLOAD_BYTES: usize =
    MAX_PACKET_BYTES - CLIENT_PACKET_OVERHEAD - ENCRYPTED_CHALLENGE_TOKEN_BYTES;

// ============================================
// Shared Helpers
// ============================================

fn begin(out: &mut BytesMut, packet_type: PacketType, len: usize) -> Result<()> {
    if len > MAX_PACKET_BYTES {
        return Err(CoreError::PacketTooLarge {
            max: MAX_PACKET_BYTES,
            actual: len,
        });
    }
    out.clear();
    out.reserve(len);
    out.put_u8(PROTOCOL_VERSION);
    out.put_u8(packet_type.as_byte());
    out.put_bytes(0, CHONKLE_BYTES);
    Ok(())
}

fn finish(out: &mut BytesMut, filter: &PacketFilter, from: &Address, to: &Address) {
    out.put_bytes(0, PITTLE_BYTES);
    filter.stamp(out, from, to);
}

fn expect_type(data: &[u8], expected: PacketType, min_len: usize) -> Result<()> {
    if data.len() < min_len {
        return Err(CoreError::too_short(min_len, data.len()));
    }
    if data[0] != PROTOCOL_VERSION {
        return Err(CoreError::UnsupportedVersion {
            got: data[0],
            expected: PROTOCOL_VERSION,
        });
    }
    match PacketType::from_byte(data[1]) {
        Some(t) if t == expected => Ok(()),
        Some(_) => Err(CoreError::malformed("unexpected packet type")),
        None => Err(CoreError::UnknownPacketType(data[1])),
    }
}

/// Reads the packet type of a filtered packet.
///
/// # Errors
/// `PacketTooShort` or `UnknownPacketType`.
pub fn packet_type(data: &[u8]) -> Result<PacketType> {
    let byte = *data.get(1).ok_or(CoreError::too_short(2, data.len()))?;
    PacketType::from_byte(byte).ok_or(CoreError::UnknownPacketType(byte))
}

// ============================================
// ClientPacket
// ============================================

/// Clear fields of a client hop packet, readable before decryption.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientPacketPrefix {
    /// Sealed session token
    pub session_token: [u8; ENCRYPTED_SESSION_TOKEN_BYTES],
    /// Renewal count of the session token
    pub session_token_sequence: u64,
    /// Client public key
    pub session_id: SessionId,
    /// Sender's sequence (also the envelope nonce)
    pub sequence: u64,
}

/// Payload packet on the client↔gateway hop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientPacket<'a> {
    /// Clear prefix
    pub prefix: ClientPacketPrefix,
    /// Reliability header (encrypted on the wire)
    pub header: PayloadHeader,
    /// Outstanding challenge token being answered (upstream only)
    pub challenge_token: Option<[u8; ENCRYPTED_CHALLENGE_TOKEN_BYTES]>,
    /// Application payload
    pub payload: &'a [u8],
}

impl<'a> ClientPacket<'a> {
    /// Total encoded size.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        let challenge = if self.challenge_token.is_some() {
            ENCRYPTED_CHALLENGE_TOKEN_BYTES
        } else {
            0
        };
        CLIENT_PACKET_OVERHEAD + challenge + self.payload.len()
    }

    /// Lays out, seals and stamps the packet into `out`.
    ///
    /// # Errors
    /// `PacketTooLarge`, or `Encryption` from the envelope.
    pub fn write(
        &self,
        out: &mut BytesMut,
        envelope: &Envelope,
        direction: Direction,
        filter: &PacketFilter,
        from: &Address,
        to: &Address,
    ) -> Result<()> {
        let len = self.encoded_len();
        begin(out, PacketType::Payload, len)?;

        out.put_slice(&self.prefix.session_token);
        out.put_u64_le(self.prefix.session_token_sequence);
        out.put_slice(self.prefix.session_id.as_bytes());
        out.put_u64_le(self.prefix.sequence);

        let mut header = self.header;
        header.flags &= !FLAG_CHALLENGE_TOKEN;
        if self.challenge_token.is_some() {
            header.flags |= FLAG_CHALLENGE_TOKEN;
        }
        header.encode(out);
        if let Some(token) = &self.challenge_token {
            out.put_slice(token);
        }
        out.put_slice(self.payload);

        let sealed_end = out.len();
        let (head, body) = out.split_at_mut(CLIENT_AAD_END);
        let tag = envelope.seal_in_place(
            direction,
            self.prefix.sequence,
            &head[BODY_OFFSET..],
            &mut body[..sealed_end - CLIENT_AAD_END],
        )?;
        out.put_slice(&tag);
        finish(out, filter, from, to);
        debug_assert_eq!(out.len(), len);
        Ok(())
    }

    /// Reads the clear prefix of a client hop packet.
    ///
    /// # Errors
    /// Shape errors when the packet is not a client payload packet.
    pub fn peek(data: &[u8]) -> Result<ClientPacketPrefix> {
        expect_type(data, PacketType::Payload, CLIENT_PACKET_OVERHEAD)?;
        let mut reader = Reader::new(&data[BODY_OFFSET..CLIENT_AAD_END]);
        Ok(ClientPacketPrefix {
            session_token: reader.read_array()?,
            session_token_sequence: reader.read_u64()?,
            session_id: SessionId::from_array(reader.read_array()?),
            sequence: reader.read_u64()?,
        })
    }

    /// Authenticates and decrypts the packet in place.
    ///
    /// # Errors
    /// Shape errors, or `Decryption` when the tag does not verify.
    pub fn open(data: &'a mut [u8], envelope: &Envelope, direction: Direction) -> Result<Self> {
        let prefix = Self::peek(data)?;
        let len = data.len();
        let tag_start = len - PITTLE_BYTES - MAC_BYTES;
        let mut tag = [0u8; MAC_BYTES];
        tag.copy_from_slice(&data[tag_start..len - PITTLE_BYTES]);

        let (head, rest) = data.split_at_mut(CLIENT_AAD_END);
        let sealed = &mut rest[..tag_start - CLIENT_AAD_END];
        envelope.open_in_place(direction, prefix.sequence, &head[BODY_OFFSET..], sealed, &tag)?;
        let sealed: &'a [u8] = sealed;

        let mut reader = Reader::new(sealed);
        let header = PayloadHeader::decode(&mut reader)?;
        let challenge_token = if header.has_challenge_token() {
            Some(reader.read_array()?)
        } else {
            None
        };
        Ok(Self {
            prefix,
            header,
            challenge_token,
            payload: reader.rest(),
        })
    }
}

// ============================================
// ChallengePacket
// ============================================

/// Challenge sent by a gateway to a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChallengePacket {
    /// Session being challenged
    pub session_id: SessionId,
    /// Sealed challenge token
    pub challenge_token: [u8; ENCRYPTED_CHALLENGE_TOKEN_BYTES],
}

impl ChallengePacket {
    /// Lays out and stamps the packet into `out`.
    ///
    /// # Errors
    /// Never in practice; the size is fixed below the limit.
    pub fn write(&self, out: &mut BytesMut, filter: &PacketFilter, from: &Address, to: &Address) -> Result<()> {
        begin(out, PacketType::Challenge, CHALLENGE_PACKET_BYTES)?;
        out.put_slice(self.session_id.as_bytes());
        out.put_slice(&self.challenge_token);
        finish(out, filter, from, to);
        Ok(())
    }

    /// Parses a challenge packet.
    ///
    /// # Errors
    /// Shape errors.
    pub fn decode(data: &[u8]) -> Result<Self> {
        expect_type(data, PacketType::Challenge, CHALLENGE_PACKET_BYTES)?;
        let mut reader = Reader::new(&data[BODY_OFFSET..]);
        Ok(Self {
            session_id: SessionId::from_array(reader.read_array()?),
            challenge_token: reader.read_array()?,
        })
    }
}

// ============================================
// RelayPacket
// ============================================

/// Payload packet on the gateway↔server hop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayPacket<'a> {
    /// Gateway worker socket that replies must go to
    pub gateway_address: Address,
    /// Client endpoint as seen by the gateway
    pub client_address: Address,
    /// Client public key
    pub session_id: SessionId,
    /// Sequence of the end that produced the payload
    pub sequence: u64,
    /// Reliability header
    pub header: PayloadHeader,
    /// Application payload
    pub payload: &'a [u8],
}

impl<'a> RelayPacket<'a> {
    /// Total encoded size.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        RELAY_PACKET_OVERHEAD
            + self.gateway_address.encoded_len()
            + self.client_address.encoded_len()
            + self.payload.len()
    }

    /// Lays out and stamps the packet into `out`.
    ///
    /// # Errors
    /// `PacketTooLarge`.
    pub fn write(&self, out: &mut BytesMut, filter: &PacketFilter, from: &Address, to: &Address) -> Result<()> {
        begin(out, PacketType::Payload, self.encoded_len())?;
        self.gateway_address.encode(out);
        self.client_address.encode(out);
        out.put_slice(self.session_id.as_bytes());
        out.put_u64_le(self.sequence);
        self.header.encode(out);
        out.put_slice(self.payload);
        finish(out, filter, from, to);
        Ok(())
    }

    /// Parses a relay hop packet.
    ///
    /// # Errors
    /// Shape errors.
    pub fn decode(data: &'a [u8]) -> Result<Self> {
        expect_type(data, PacketType::Payload, RELAY_PACKET_OVERHEAD)?;
        let mut reader = Reader::new(&data[BODY_OFFSET..data.len() - PITTLE_BYTES]);
        Ok(Self {
            gateway_address: Address::decode(&mut reader)?,
            client_address: Address::decode(&mut reader)?,
            session_id: SessionId::from_array(reader.read_array()?),
            sequence: reader.read_u64()?,
            header: PayloadHeader::decode(&mut reader)?,
            payload: reader.rest(),
        })
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{KeyPair, Purpose};

    const MAGIC: [u8; 8] = [9, 8, 7, 6, 5, 4, 3, 2];

    fn client_addr() -> Address {
        Address::V4 { ip: [192, 168, 1, 10], port: 50000 }
    }

    fn gateway_addr() -> Address {
        Address::V4 { ip: [10, 0, 0, 1], port: 40000 }
    }

    fn envelopes() -> (Envelope, Envelope, SessionId) {
        let client = KeyPair::generate();
        let gateway = KeyPair::generate();
        (
            Envelope::new(client.private_key(), &gateway.public_key(), Purpose::Packet).unwrap(),
            Envelope::new(gateway.private_key(), &client.public_key(), Purpose::Packet).unwrap(),
            client.public_key().session_id(),
        )
    }

    fn prefix(session_id: SessionId, sequence: u64) -> ClientPacketPrefix {
        ClientPacketPrefix {
            session_token: [0x5A; ENCRYPTED_SESSION_TOKEN_BYTES],
            session_token_sequence: 2,
            session_id,
            sequence,
        }
    }

    #[test]
    fn test_layout_sizes() {
        assert_eq!(CLIENT_PACKET_OVERHEAD, 213);
        assert_eq!(CHALLENGE_PACKET_BYTES, 91);
        assert_eq!(RELAY_PACKET_OVERHEAD, 117);
    }

    #[test]
    fn test_client_packet_seal_and_open() {
        let (at_client, at_gateway, session_id) = envelopes();
        let filter = PacketFilter::new(MAGIC);
        let payload = [7u8; 100];
        let packet = ClientPacket {
            prefix: prefix(session_id, 11),
            header: PayloadHeader { ack: 4, gateway_id: 3, ..PayloadHeader::default() },
            challenge_token: Some([0xC4; ENCRYPTED_CHALLENGE_TOKEN_BYTES]),
            payload: &payload,
        };

        let mut out = BytesMut::new();
        packet
            .write(&mut out, &at_client, Direction::Upstream, &filter, &client_addr(), &gateway_addr())
            .unwrap();
        assert_eq!(out.len(), CLIENT_PACKET_OVERHEAD + 40 + 100);
        assert!(filter.accepts(&out, &client_addr(), &gateway_addr()));

        let peeked = ClientPacket::peek(&out).unwrap();
        assert_eq!(peeked.session_id, session_id);
        assert_eq!(peeked.sequence, 11);

        let mut received = out.to_vec();
        let opened = ClientPacket::open(&mut received, &at_gateway, Direction::Upstream).unwrap();
        assert_eq!(opened.payload, &payload);
        assert_eq!(opened.header.ack, 4);
        assert!(opened.header.has_challenge_token());
        assert_eq!(opened.challenge_token, packet.challenge_token);
    }

    #[test]
    fn test_tampered_aad_fails() {
        let (at_client, at_gateway, session_id) = envelopes();
        let filter = PacketFilter::new(MAGIC);
        let packet = ClientPacket {
            prefix: prefix(session_id, 1),
            header: PayloadHeader::default(),
            challenge_token: None,
            payload: b"hi",
        };
        let mut out = BytesMut::new();
        packet
            .write(&mut out, &at_client, Direction::Upstream, &filter, &client_addr(), &gateway_addr())
            .unwrap();

        let mut tampered = out.to_vec();
        // Session token sequence lives in the associated data
        tampered[BODY_OFFSET + ENCRYPTED_SESSION_TOKEN_BYTES] ^= 1;
        assert!(matches!(
            ClientPacket::open(&mut tampered, &at_gateway, Direction::Upstream),
            Err(CoreError::Decryption)
        ));

        let mut wrong_direction = out.to_vec();
        assert!(ClientPacket::open(&mut wrong_direction, &at_gateway, Direction::Downstream).is_err());
    }

    #[test]
    fn test_oversized_packet_refused() {
        let (at_client, _, session_id) = envelopes();
        let payload = vec![0u8; MAX_PACKET_BYTES];
        let packet = ClientPacket {
            prefix: prefix(session_id, 1),
            header: PayloadHeader::default(),
            challenge_token: None,
            payload: &payload,
        };
        let mut out = BytesMut::new();
        let err = packet
            .write(&mut out, &at_client, Direction::Upstream, &PacketFilter::new(MAGIC), &client_addr(), &gateway_addr())
            .unwrap_err();
        assert!(matches!(err, CoreError::PacketTooLarge { .. }));
    }

    #[test]
    fn test_challenge_packet() {
        let filter = PacketFilter::new(MAGIC);
        let packet = ChallengePacket {
            session_id: SessionId::random(),
            challenge_token: [3; ENCRYPTED_CHALLENGE_TOKEN_BYTES],
        };
        let mut out = BytesMut::new();
        packet.write(&mut out, &filter, &gateway_addr(), &client_addr()).unwrap();

        assert_eq!(out.len(), CHALLENGE_PACKET_BYTES);
        assert_eq!(packet_type(&out).unwrap(), PacketType::Challenge);
        assert!(filter.accepts(&out, &gateway_addr(), &client_addr()));
        assert_eq!(ChallengePacket::decode(&out).unwrap(), packet);
        assert!(ClientPacket::peek(&out).is_err());
    }

    #[test]
    fn test_relay_packet() {
        let filter = PacketFilter::new(MAGIC);
        let server = Address::V4 { ip: [10, 0, 0, 2], port: 30000 };
        let packet = RelayPacket {
            gateway_address: gateway_addr(),
            client_address: Address::V6 { ip: [0x20; 16], port: 1 },
            session_id: SessionId::random(),
            sequence: 77,
            header: PayloadHeader { server_id: 5, ..PayloadHeader::default() },
            payload: b"relay me",
        };
        let mut out = BytesMut::new();
        packet.write(&mut out, &filter, &gateway_addr(), &server).unwrap();

        assert_eq!(out.len(), RELAY_PACKET_OVERHEAD + 7 + 19 + 8);
        assert!(filter.accepts(&out, &gateway_addr(), &server));
        assert_eq!(RelayPacket::decode(&out).unwrap(), packet);
    }

    #[test]
    fn test_wrong_version_reported() {
        let mut data = vec![0u8; CHALLENGE_PACKET_BYTES];
        data[0] = 3;
        data[1] = PacketType::Challenge.as_byte();
        assert!(matches!(
            ChallengePacket::decode(&data),
            Err(CoreError::UnsupportedVersion { got: 3, .. })
        ));
    }
}
