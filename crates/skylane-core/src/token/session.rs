// ============================================
// File: crates/skylane-core/src/token/session.rs
// ============================================
//! # Session Token
//!
//! ## Creation Reason
//! The session token is the lease that lets a client's traffic through a
//! gateway. Auth seals it for the gateway; the client only stores and
//! forwards the blob.
//!
//! ## Wire Format
//! ```text
//! Plain body (48 bytes):
//! ┌──────────────┬──────────┬──────────┬────────────┐
//! │ Session ID   │ Expire   │ Up kbps  │ Down kbps  │
//! │ 32 bytes     │ u64      │ u32      │ u32        │
//! └──────────────┴──────────┴──────────┴────────────┘
//!
//! Encrypted form (72 bytes):
//! ┌──────────────┬────────────────────┬──────────┐
//! │ Nonce prefix │ Sealed body        │ MAC      │
//! │ u64 random   │ 48 bytes           │ 16 bytes │
//! └──────────────┴────────────────────┴──────────┘
//! ```
//!
//! The token sequence (number of renewals) travels next to the blob in the
//! packet header and is bound as associated data, so a blob cannot be
//! relabelled with a different sequence.
//!
//! ## ⚠️ Important Note for Next Developer
//! - Renewal re-seals under a fresh random nonce prefix; never reuse the
//!   old prefix
//!
//! ## Last Modified
//! v0.1.0 - Initial implementation

use bytes::BufMut;
use rand::RngCore;

use skylane_common::time::is_expired;
use skylane_common::{SessionId, SESSION_ID_SIZE};

use super::{SESSION_TOKEN_EXTENSION_SECONDS, SESSION_TOKEN_RENEW_WINDOW_SECONDS};
use crate::crypto::{Direction, Envelope, MAC_BYTES};
use crate::error::{CoreError, Result};
use crate::protocol::codec::{Codec, Reader};

// ============================================
// Constants
// ============================================

/// Size of the plain token body.
pub const SESSION_TOKEN_BODY_BYTES: usize = SESSION_ID_SIZE + 8 + 4 + 4;

/// Size of the sealed token blob.
pub const ENCRYPTED_SESSION_TOKEN_BYTES: usize = 8 + SESSION_TOKEN_BODY_BYTES + MAC_BYTES;

// ============================================
// SessionToken
// ============================================

/// Session identity plus lease.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionToken {
    /// Client public key
    pub session_id: SessionId,
    /// Unix seconds after which the lease is void
    pub expire_timestamp: u64,
    /// Upstream bandwidth envelope
    pub envelope_up_kbps: u32,
    /// Downstream bandwidth envelope
    pub envelope_down_kbps: u32,
}

impl SessionToken {
    /// Seals the token for `sequence`.
    ///
    /// # Errors
    /// `Encryption` if the AEAD fails.
    pub fn encrypt(&self, envelope: &Envelope, sequence: u64) -> Result<[u8; ENCRYPTED_SESSION_TOKEN_BYTES]> {
        let nonce_prefix = rand::thread_rng().next_u64();

        let mut out = [0u8; ENCRYPTED_SESSION_TOKEN_BYTES];
        out[..8].copy_from_slice(&nonce_prefix.to_le_bytes());
        {
            let mut body = &mut out[8..8 + SESSION_TOKEN_BODY_BYTES];
            self.encode(&mut body);
        }
        let tag = envelope.seal_in_place(
            Direction::Downstream,
            nonce_prefix,
            &sequence.to_le_bytes(),
            &mut out[8..8 + SESSION_TOKEN_BODY_BYTES],
        )?;
        out[8 + SESSION_TOKEN_BODY_BYTES..].copy_from_slice(&tag);
        Ok(out)
    }

    /// Opens a sealed token labelled with `sequence`.
    ///
    /// # Errors
    /// `Decryption` on a wrong key, tampering, or a sequence label that
    /// does not match the one the token was sealed with.
    pub fn decrypt(
        envelope: &Envelope,
        sequence: u64,
        blob: &[u8; ENCRYPTED_SESSION_TOKEN_BYTES],
    ) -> Result<Self> {
        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&blob[..8]);
        let mut body = [0u8; SESSION_TOKEN_BODY_BYTES];
        body.copy_from_slice(&blob[8..8 + SESSION_TOKEN_BODY_BYTES]);
        let mut tag = [0u8; MAC_BYTES];
        tag.copy_from_slice(&blob[8 + SESSION_TOKEN_BODY_BYTES..]);

        envelope.open_in_place(
            Direction::Downstream,
            u64::from_le_bytes(prefix),
            &sequence.to_le_bytes(),
            &mut body,
            &tag,
        )?;
        Self::from_slice(&body)
    }

    /// Checks that the token belongs to `session_id` and is still live.
    ///
    /// # Errors
    /// `SessionMismatch` or `TokenExpired`.
    pub fn validate(&self, session_id: &SessionId, now: u64) -> Result<()> {
        if self.session_id != *session_id {
            return Err(CoreError::SessionMismatch);
        }
        if is_expired(self.expire_timestamp, now) {
            return Err(CoreError::expired(self.expire_timestamp, now));
        }
        Ok(())
    }

    /// Returns the renewed token.
    ///
    /// Renewal is only accepted inside the window before expiry: an expired
    /// token cannot be revived, and a token with more than the window left
    /// is refused as premature.
    ///
    /// # Errors
    /// `TokenExpired` or `RenewalTooEarly`.
    pub fn renew(&self, now: u64) -> Result<Self> {
        if is_expired(self.expire_timestamp, now) {
            return Err(CoreError::expired(self.expire_timestamp, now));
        }
        let remaining = self.expire_timestamp - now;
        if remaining > SESSION_TOKEN_RENEW_WINDOW_SECONDS {
            return Err(CoreError::RenewalTooEarly {
                remaining,
                window: SESSION_TOKEN_RENEW_WINDOW_SECONDS,
            });
        }
        Ok(Self {
            expire_timestamp: self.expire_timestamp + SESSION_TOKEN_EXTENSION_SECONDS,
            ..*self
        })
    }
}

impl Codec for SessionToken {
    fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.put_slice(self.session_id.as_bytes());
        buf.put_u64_le(self.expire_timestamp);
        buf.put_u32_le(self.envelope_up_kbps);
        buf.put_u32_le(self.envelope_down_kbps);
    }

    fn decode(reader: &mut Reader<'_>) -> Result<Self> {
        Ok(Self {
            session_id: SessionId::from_array(reader.read_array()?),
            expire_timestamp: reader.read_u64()?,
            envelope_up_kbps: reader.read_u32()?,
            envelope_down_kbps: reader.read_u32()?,
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

    fn envelopes() -> (Envelope, Envelope) {
        let auth = KeyPair::generate();
        let gateway = KeyPair::generate();
        (
            Envelope::new(auth.private_key(), &gateway.public_key(), Purpose::SessionToken).unwrap(),
            Envelope::new(gateway.private_key(), &auth.public_key(), Purpose::SessionToken).unwrap(),
        )
    }

    fn token(expire: u64) -> SessionToken {
        SessionToken {
            session_id: SessionId::random(),
            expire_timestamp: expire,
            envelope_up_kbps: 256,
            envelope_down_kbps: 1024,
        }
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let (at_auth, at_gateway) = envelopes();
        let original = token(1_000);

        let blob = original.encrypt(&at_auth, 3).unwrap();
        assert_eq!(blob.len(), 72);
        assert_eq!(SessionToken::decrypt(&at_gateway, 3, &blob).unwrap(), original);
    }

    #[test]
    fn test_sequence_is_bound() {
        let (at_auth, at_gateway) = envelopes();
        let blob = token(1_000).encrypt(&at_auth, 3).unwrap();
        assert!(matches!(
            SessionToken::decrypt(&at_gateway, 4, &blob),
            Err(CoreError::Decryption)
        ));
    }

    #[test]
    fn test_wrong_keys_fail_closed() {
        let (at_auth, _) = envelopes();
        let (_, other_gateway) = envelopes();
        let blob = token(1_000).encrypt(&at_auth, 0).unwrap();
        assert!(SessionToken::decrypt(&other_gateway, 0, &blob).is_err());
    }

    #[test]
    fn test_fresh_nonce_per_seal() {
        let (at_auth, _) = envelopes();
        let t = token(1_000);
        assert_ne!(t.encrypt(&at_auth, 0).unwrap(), t.encrypt(&at_auth, 0).unwrap());
    }

    #[test]
    fn test_validate() {
        let t = token(100);
        assert!(t.validate(&t.session_id, 100).is_ok());
        assert!(matches!(t.validate(&t.session_id, 101), Err(CoreError::TokenExpired { .. })));
        assert!(matches!(
            t.validate(&SessionId::random(), 50),
            Err(CoreError::SessionMismatch)
        ));
    }

    #[test]
    fn test_renew_window() {
        let t = token(100);
        // Too early: 11s remaining
        assert!(matches!(t.renew(89), Err(CoreError::RenewalTooEarly { remaining: 11, .. })));
        // Inside the window
        assert_eq!(t.renew(90).unwrap().expire_timestamp, 110);
        assert_eq!(t.renew(100).unwrap().expire_timestamp, 110);
        // Already expired
        assert!(matches!(t.renew(101), Err(CoreError::TokenExpired { .. })));
    }
}
