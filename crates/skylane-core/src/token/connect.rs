// ============================================
// File: crates/skylane-core/src/token/connect.rs
// ============================================
//! # Connect Token
//!
//! ## Creation Reason
//! The connect token bootstraps a client: it names the gateway, hands over
//! a freshly generated client key pair, sets the bandwidth and packet-rate
//! envelope, and carries the first sealed session token.
//!
//! ## Wire Format (223 bytes, little-endian)
//! ```text
//! user id            u64
//! expire timestamp   u64
//! up kbps            u32
//! down kbps          u32
//! packets per second u32
//! gateway address    tagged, zero-padded to 19 bytes
//! gateway public key 32
//! client public key  32
//! client private key 32
//! session expire     u64
//! session token      72 (sealed, sequence 0)
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - The token is not encrypted: it contains the client private key and
//!   must only travel over an already-secured channel
//!
//! ## Last Modified
//! v0.1.0 - Initial implementation

use std::fmt;

use bytes::BufMut;

use skylane_common::time::is_expired;
use skylane_common::{decode_base64_array, encode_base64};

use super::session::ENCRYPTED_SESSION_TOKEN_BYTES;
use crate::crypto::{KeyPair, PrivateKey, PublicKey, KEY_SIZE};
use crate::error::{CoreError, Result};
use crate::protocol::address::{Address, MAX_ADDRESS_BYTES};
use crate::protocol::codec::{Codec, Reader};

// ============================================
// Constants
// ============================================

/// Size of the serialized connect token.
pub const CONNECT_TOKEN_BYTES: usize =
    8 + 8 + 4 + 4 + 4 + MAX_ADDRESS_BYTES + KEY_SIZE * 3 + 8 + ENCRYPTED_SESSION_TOKEN_BYTES;

// ============================================
// ConnectToken
// ============================================

/// Client bootstrap capability minted by auth.
#[derive(Clone)]
pub struct ConnectToken {
    /// Account the session belongs to
    pub user_id: u64,
    /// Unix seconds after which the token cannot start a client
    pub expire_timestamp: u64,
    /// Upstream bandwidth envelope
    pub envelope_up_kbps: u32,
    /// Downstream bandwidth envelope
    pub envelope_down_kbps: u32,
    /// Client send rate
    pub packets_per_second: u32,
    /// Gateway to connect to
    pub gateway_address: Address,
    /// Gateway envelope key
    pub gateway_public_key: PublicKey,
    /// Generated client key pair; its public half is the session id
    pub client_keys: KeyPair,
    /// Expiry of the embedded session token
    pub session_token_expire_timestamp: u64,
    /// Sealed session token (sequence 0)
    pub session_token: [u8; ENCRYPTED_SESSION_TOKEN_BYTES],
}

impl ConnectToken {
    /// Returns `true` once the token can no longer start a client.
    #[must_use]
    pub const fn is_expired(&self, now: u64) -> bool {
        is_expired(self.expire_timestamp, now)
    }

    /// Serializes to the fixed-size binary form.
    #[must_use]
    pub fn to_array(&self) -> [u8; CONNECT_TOKEN_BYTES] {
        let mut out = [0u8; CONNECT_TOKEN_BYTES];
        let mut buf = &mut out[..];
        self.encode(&mut buf);
        out
    }

    /// Base64 text form for transport.
    #[must_use]
    pub fn to_base64(&self) -> String {
        encode_base64(&self.to_array())
    }

    /// Parses the base64 text form.
    ///
    /// # Errors
    /// `Common` for bad base64 or length, or a decoding error.
    pub fn from_base64(text: &str) -> Result<Self> {
        let bytes = decode_base64_array::<CONNECT_TOKEN_BYTES>("connect token", text)?;
        Self::from_slice(&bytes)
    }
}

impl Codec for ConnectToken {
    fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.put_u64_le(self.user_id);
        buf.put_u64_le(self.expire_timestamp);
        buf.put_u32_le(self.envelope_up_kbps);
        buf.put_u32_le(self.envelope_down_kbps);
        buf.put_u32_le(self.packets_per_second);
        self.gateway_address.encode(buf);
        buf.put_bytes(0, MAX_ADDRESS_BYTES - self.gateway_address.encoded_len());
        buf.put_slice(self.gateway_public_key.as_bytes());
        buf.put_slice(self.client_keys.public_key().as_bytes());
        buf.put_slice(&self.client_keys.private_key().to_bytes());
        buf.put_u64_le(self.session_token_expire_timestamp);
        buf.put_slice(&self.session_token);
    }

    fn decode(reader: &mut Reader<'_>) -> Result<Self> {
        let user_id = reader.read_u64()?;
        let expire_timestamp = reader.read_u64()?;
        let envelope_up_kbps = reader.read_u32()?;
        let envelope_down_kbps = reader.read_u32()?;
        let packets_per_second = reader.read_u32()?;

        let address_slot = reader.read_slice(MAX_ADDRESS_BYTES)?;
        let gateway_address = Address::from_slice(address_slot)?;

        let gateway_public_key = PublicKey::from_bytes(reader.read_array()?);
        let client_public_key = PublicKey::from_bytes(reader.read_array()?);
        let client_keys = KeyPair::from_private(PrivateKey::from_bytes(reader.read_array()?));
        if client_keys.public_key() != client_public_key {
            return Err(CoreError::malformed("client key pair mismatch"));
        }

        Ok(Self {
            user_id,
            expire_timestamp,
            envelope_up_kbps,
            envelope_down_kbps,
            packets_per_second,
            gateway_address,
            gateway_public_key,
            client_keys,
            session_token_expire_timestamp: reader.read_u64()?,
            session_token: reader.read_array()?,
        })
    }
}

impl fmt::Debug for ConnectToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectToken")
            .field("user_id", &self.user_id)
            .field("expire_timestamp", &self.expire_timestamp)
            .field("gateway_address", &self.gateway_address)
            .field("client_public_key", &self.client_keys.public_key())
            .finish_non_exhaustive()
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ConnectToken {
        ConnectToken {
            user_id: 99,
            expire_timestamp: 1_700_000_030,
            envelope_up_kbps: 256,
            envelope_down_kbps: 1024,
            packets_per_second: 10,
            gateway_address: Address::V4 { ip: [127, 0, 0, 1], port: 40000 },
            gateway_public_key: KeyPair::generate().public_key(),
            client_keys: KeyPair::generate(),
            session_token_expire_timestamp: 1_700_000_030,
            session_token: [0xAB; ENCRYPTED_SESSION_TOKEN_BYTES],
        }
    }

    #[test]
    fn test_fixed_size() {
        assert_eq!(CONNECT_TOKEN_BYTES, 223);
        assert_eq!(sample().to_bytes().len(), CONNECT_TOKEN_BYTES);
    }

    #[test]
    fn test_base64_roundtrip_preserves_fields() {
        let original = sample();
        let restored = ConnectToken::from_base64(&original.to_base64()).unwrap();

        assert_eq!(restored.user_id, original.user_id);
        assert_eq!(restored.expire_timestamp, original.expire_timestamp);
        assert_eq!(restored.envelope_up_kbps, original.envelope_up_kbps);
        assert_eq!(restored.envelope_down_kbps, original.envelope_down_kbps);
        assert_eq!(restored.packets_per_second, original.packets_per_second);
        assert_eq!(restored.gateway_address, original.gateway_address);
        assert_eq!(restored.gateway_public_key, original.gateway_public_key);
        assert_eq!(restored.client_keys.public_key(), original.client_keys.public_key());
        assert_eq!(restored.session_token, original.session_token);
    }

    #[test]
    fn test_v6_gateway_fits_slot() {
        let mut token = sample();
        token.gateway_address = Address::V6 { ip: [1; 16], port: 7 };
        let restored = ConnectToken::from_slice(&token.to_array()).unwrap();
        assert_eq!(restored.gateway_address, token.gateway_address);
    }

    #[test]
    fn test_tampered_client_key_rejected() {
        let mut bytes = sample().to_array();
        // First byte of the client public key
        bytes[8 + 8 + 4 + 4 + 4 + MAX_ADDRESS_BYTES + KEY_SIZE] ^= 1;
        assert!(matches!(
            ConnectToken::from_slice(&bytes),
            Err(CoreError::MalformedPacket { .. })
        ));
    }

    #[test]
    fn test_expiry() {
        let token = sample();
        assert!(!token.is_expired(token.expire_timestamp));
        assert!(token.is_expired(token.expire_timestamp + 1));
    }
}
