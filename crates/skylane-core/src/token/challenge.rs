// ============================================
// File: crates/skylane-core/src/token/challenge.rs
// ============================================
//! # Challenge Token
//!
//! ## Creation Reason
//! When a session shows up from a new address, or names another gateway,
//! the gateway cannot tell a migrating client from a spoofer. It answers
//! with a challenge token sealed to the session's public key; only the real
//! client can open it, and echoing it back proves possession.
//!
//! ## Wire Format
//! ```text
//! ┌───────────────┬──────────────┬──────────┬──────────┐
//! │ Sequence      │ Gateway ID   │ Expire   │ MAC      │
//! │ u64 (nonce)   │ u64 sealed   │ u64 seal │ 16 bytes │
//! └───────────────┴──────────────┴──────────┴──────────┘
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - The sequence is both the ordering key (newer supersedes older) and the
//!   nonce, so the gateway draws it from a single monotonic counter
//!
//! ## Last Modified
//! v0.1.0 - Initial implementation

use bytes::BufMut;

use skylane_common::time::is_expired;

use crate::crypto::{Direction, Envelope, MAC_BYTES};
use crate::error::{CoreError, Result};
use crate::protocol::codec::{Codec, Reader};

// ============================================
// Constants
// ============================================

/// Size of the plain token body.
pub const CHALLENGE_TOKEN_BODY_BYTES: usize = 8 + 8;

/// Size of the sealed token blob.
pub const ENCRYPTED_CHALLENGE_TOKEN_BYTES: usize = 8 + CHALLENGE_TOKEN_BODY_BYTES + MAC_BYTES;

// ============================================
// ChallengeToken
// ============================================

/// Gateway-issued proof-of-possession challenge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChallengeToken {
    /// Issuing gateway
    pub gateway_id: u64,
    /// Unix seconds after which the challenge is void
    pub expire_timestamp: u64,
}

impl ChallengeToken {
    /// Seals the token under `sequence`.
    ///
    /// # Errors
    /// `Encryption` if the AEAD fails.
    pub fn encrypt(&self, envelope: &Envelope, sequence: u64) -> Result<[u8; ENCRYPTED_CHALLENGE_TOKEN_BYTES]> {
        let mut out = [0u8; ENCRYPTED_CHALLENGE_TOKEN_BYTES];
        out[..8].copy_from_slice(&sequence.to_le_bytes());
        {
            let mut body = &mut out[8..8 + CHALLENGE_TOKEN_BODY_BYTES];
            self.encode(&mut body);
        }
        let tag = envelope.seal_in_place(
            Direction::Downstream,
            sequence,
            &[],
            &mut out[8..8 + CHALLENGE_TOKEN_BODY_BYTES],
        )?;
        out[8 + CHALLENGE_TOKEN_BODY_BYTES..].copy_from_slice(&tag);
        Ok(out)
    }

    /// Reads the clear sequence without decrypting.
    #[must_use]
    pub fn peek_sequence(blob: &[u8; ENCRYPTED_CHALLENGE_TOKEN_BYTES]) -> u64 {
        let mut seq = [0u8; 8];
        seq.copy_from_slice(&blob[..8]);
        u64::from_le_bytes(seq)
    }

    /// Opens a sealed token, returning its sequence and body.
    ///
    /// # Errors
    /// `Decryption` on a wrong key or tampering.
    pub fn decrypt(envelope: &Envelope, blob: &[u8; ENCRYPTED_CHALLENGE_TOKEN_BYTES]) -> Result<(u64, Self)> {
        let sequence = Self::peek_sequence(blob);
        let mut body = [0u8; CHALLENGE_TOKEN_BODY_BYTES];
        body.copy_from_slice(&blob[8..8 + CHALLENGE_TOKEN_BODY_BYTES]);
        let mut tag = [0u8; MAC_BYTES];
        tag.copy_from_slice(&blob[8 + CHALLENGE_TOKEN_BODY_BYTES..]);

        envelope.open_in_place(Direction::Downstream, sequence, &[], &mut body, &tag)?;
        Ok((sequence, Self::from_slice(&body)?))
    }

    /// Checks that the challenge was issued by `gateway_id` and is live.
    ///
    /// # Errors
    /// `GatewayMismatch` or `TokenExpired`.
    pub fn validate(&self, gateway_id: u64, now: u64) -> Result<()> {
        if self.gateway_id != gateway_id {
            return Err(CoreError::GatewayMismatch {
                expected: gateway_id,
                got: self.gateway_id,
            });
        }
        if is_expired(self.expire_timestamp, now) {
            return Err(CoreError::expired(self.expire_timestamp, now));
        }
        Ok(())
    }
}

impl Codec for ChallengeToken {
    fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.put_u64_le(self.gateway_id);
        buf.put_u64_le(self.expire_timestamp);
    }

    fn decode(reader: &mut Reader<'_>) -> Result<Self> {
        Ok(Self {
            gateway_id: reader.read_u64()?,
            expire_timestamp: reader.read_u64()?,
        })
    }
}

// ============================================
// Tests
// ============================================
