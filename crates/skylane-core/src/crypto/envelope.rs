// ============================================
// File: crates/skylane-core/src/crypto/envelope.rs
// ============================================
//! # Encryption Envelope
//!
//! ## Creation Reason
//! Packet regions and tokens are sealed with authenticated public-key
//! encryption: the sender's private key and the receiver's public key give a
//! shared key, and ChaCha20-Poly1305 provides confidentiality plus a tag.
//!
//! ## Main Functionality
//! - `Envelope`: a ready cipher for one (key pair, purpose)
//! - `Direction`: which way the packet travels; selects the nonce bit
//! - In-place detached sealing so packet bytes are never copied
//!
//! ## Nonce Construction
//! ```text
//! nonce[0..8]  = sequence (little-endian)
//! nonce[8]     = 0x01 for Downstream, 0x00 for Upstream
//! nonce[9..12] = 0
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - For a fixed envelope the same (direction, sequence) must never be
//!   sealed twice. Sequence counters refuse to wrap (see
//!   `reliability::SequenceCounter`)
//! - `open` failures are always reported as the bare `Decryption` error
//!   and callers drop the packet without replying
//!
//! ## Last Modified
//! v0.1.0 - Initial envelope implementation

use std::fmt;

use chacha20poly1305::{
    aead::{AeadInPlace, KeyInit},
    ChaCha20Poly1305, Nonce, Tag,
};

use super::kdf::derive_envelope_key;
use super::keys::{PrivateKey, PublicKey};
use super::{MAC_BYTES, NONCE_SIZE};
use crate::error::{CoreError, Result};

// ============================================
// Direction
// ============================================

/// Direction of travel between a client and the relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Client towards gateway.
    Upstream,
    /// Gateway towards client.
    Downstream,
}

impl Direction {
    const fn nonce_bit(self) -> u8 {
        match self {
            Self::Upstream => 0x00,
            Self::Downstream => 0x01,
        }
    }
}

// ============================================
// Purpose
// ============================================

/// What an envelope key is used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Purpose {
    /// Payload packet regions between client and gateway.
    Packet,
    /// Challenge tokens issued by a gateway.
    ChallengeToken,
    /// Session tokens between auth and gateway.
    SessionToken,
}

impl Purpose {
    /// HKDF info label.
    #[must_use]
    pub const fn label(self) -> &'static [u8] {
        match self {
            Self::Packet => b"skylane packet",
            Self::ChallengeToken => b"skylane challenge-token",
            Self::SessionToken => b"skylane session-token",
        }
    }
}

// ============================================
// Envelope
// ============================================

/// Authenticated cipher bound to one key pair and purpose.
///
/// # Example
/// ```
/// use skylane_core::crypto::{Direction, Envelope, KeyPair, Purpose};
///
/// let gateway = KeyPair::generate();
/// let client = KeyPair::generate();
///
/// let at_client = Envelope::new(client.private_key(), &gateway.public_key(), Purpose::Packet).unwrap();
/// let at_gateway = Envelope::new(gateway.private_key(), &client.public_key(), Purpose::Packet).unwrap();
///
/// let sealed = at_client.seal(Direction::Upstream, 7, b"header", b"hello").unwrap();
/// let opened = at_gateway.open(Direction::Upstream, 7, b"header", &sealed).unwrap();
/// assert_eq!(opened, b"hello");
/// ```
#[derive(Clone)]
pub struct Envelope {
    cipher: ChaCha20Poly1305,
}

impl Envelope {
    /// Derives the envelope for `(own private, peer public, purpose)`.
    ///
    /// # Errors
    /// `KeyDerivation` when the peer key is a low-order point (the shared
    /// secret would be all zeros) or HKDF fails.
    pub fn new(own: &PrivateKey, peer: &PublicKey, purpose: Purpose) -> Result<Self> {
        let shared = own.secret().diffie_hellman(&peer.to_dalek());
        if !shared.was_contributory() {
            return Err(CoreError::KeyDerivation {
                reason: "non-contributory peer public key".into(),
            });
        }
        let key = derive_envelope_key(shared.as_bytes(), purpose)?;
        let cipher = ChaCha20Poly1305::new_from_slice(key.as_bytes()).map_err(|_| {
            CoreError::KeyDerivation {
                reason: "invalid cipher key length".into(),
            }
        })?;
        Ok(Self { cipher })
    }

    /// Builds the sequence-derived nonce.
    #[must_use]
    pub fn nonce(direction: Direction, sequence: u64) -> [u8; NONCE_SIZE] {
        let mut nonce = [0u8; NONCE_SIZE];
        nonce[..8].copy_from_slice(&sequence.to_le_bytes());
        nonce[8] = direction.nonce_bit();
        nonce
    }

    /// Encrypts `buf` in place and returns the detached tag.
    ///
    /// # Errors
    /// `Encryption` if the AEAD refuses the input (oversized buffer).
    pub fn seal_in_place(
        &self,
        direction: Direction,
        sequence: u64,
        aad: &[u8],
        buf: &mut [u8],
    ) -> Result<[u8; MAC_BYTES]> {
        let nonce = Self::nonce(direction, sequence);
        let tag = self
            .cipher
            .encrypt_in_place_detached(Nonce::from_slice(&nonce), aad, buf)
            .map_err(|_| CoreError::encryption("ChaCha20-Poly1305 seal failed"))?;
        let mut out = [0u8; MAC_BYTES];
        out.copy_from_slice(tag.as_slice());
        Ok(out)
    }

    /// Verifies `tag` and decrypts `buf` in place.
    ///
    /// On failure `buf` contents are unspecified and must be discarded.
    ///
    /// # Errors
    /// `Decryption` on any authentication failure.
    pub fn open_in_place(
        &self,
        direction: Direction,
        sequence: u64,
        aad: &[u8],
        buf: &mut [u8],
        tag: &[u8; MAC_BYTES],
    ) -> Result<()> {
        let nonce = Self::nonce(direction, sequence);
        self.cipher
            .decrypt_in_place_detached(Nonce::from_slice(&nonce), aad, buf, Tag::from_slice(tag))
            .map_err(|_| CoreError::Decryption)
    }

    /// Seals `plaintext` into `ciphertext || tag`.
    ///
    /// # Errors
    /// See [`Envelope::seal_in_place`].
    pub fn seal(&self, direction: Direction, sequence: u64, aad: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(plaintext.len() + MAC_BYTES);
        out.extend_from_slice(plaintext);
        let tag = self.seal_in_place(direction, sequence, aad, &mut out)?;
        out.extend_from_slice(&tag);
        Ok(out)
    }

    /// Opens `ciphertext || tag`. No partial plaintext is ever returned.
    ///
    /// # Errors
    /// `Decryption` on authentication failure or when the input is shorter
    /// than a tag.
    pub fn open(&self, direction: Direction, sequence: u64, aad: &[u8], sealed: &[u8]) -> Result<Vec<u8>> {
        if sealed.len() < MAC_BYTES {
            return Err(CoreError::Decryption);
        }
        let split = sealed.len() - MAC_BYTES;
        let mut tag = [0u8; MAC_BYTES];
        tag.copy_from_slice(&sealed[split..]);
        let mut out = sealed[..split].to_vec();
        self.open_in_place(direction, sequence, aad, &mut out, &tag)?;
        Ok(out)
    }
}

impl fmt::Debug for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Envelope([REDACTED])")
    }
}

// ============================================
// Tests
// ============================================
