// ============================================
// File: crates/skylane-core/src/crypto/keys.rs
// ============================================
//! # Cryptographic Key Types
//!
//! ## Creation Reason
//! Keys are provisioned externally (configuration, connect tokens) as
//! base64 blobs. These types give them a checked, zeroizing home.
//!
//! ## Main Functionality
//! - `PrivateKey`: X25519 static secret, zeroed on drop
//! - `PublicKey`: X25519 public key, base64 text form and serde
//! - `KeyPair`: the two together
//!
//! ## ⚠️ Important Note for Next Developer
//! - Private keys should NEVER be logged; `Debug` is redacted
//! - A client's public key doubles as its `SessionId`
//!
//! ## Last Modified
//! v0.1.0 - Initial key type definitions

use std::fmt;
use std::str::FromStr;

use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret};

use skylane_common::{decode_base64_array, encode_base64, CommonError, SessionId};

use super::KEY_SIZE;

// ============================================
// PrivateKey
// ============================================

/// X25519 private key.
///
/// # Security
/// - Zeroed on drop (`StaticSecret` implements `ZeroizeOnDrop`)
/// - `Debug` never prints key material
#[derive(Clone)]
pub struct PrivateKey(StaticSecret);

impl PrivateKey {
    /// Generates a new random private key from the OS RNG.
    #[must_use]
    pub fn generate() -> Self {
        Self(StaticSecret::random_from_rng(OsRng))
    }

    /// Wraps raw key bytes.
    #[must_use]
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(StaticSecret::from(bytes))
    }

    /// Parses a base64 key.
    ///
    /// # Errors
    /// `CommonError` if the text is not base64 of exactly 32 bytes.
    pub fn from_base64(text: &str) -> Result<Self, CommonError> {
        decode_base64_array::<KEY_SIZE>("private key", text).map(Self::from_bytes)
    }

    /// Exports the raw bytes.
    ///
    /// # Security Warning
    /// The caller owns the copy and is responsible for clearing it.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; KEY_SIZE] {
        self.0.to_bytes()
    }

    /// Exports as base64.
    #[must_use]
    pub fn to_base64(&self) -> String {
        encode_base64(&self.0.to_bytes())
    }

    /// Derives the matching public key.
    #[must_use]
    pub fn public_key(&self) -> PublicKey {
        PublicKey(X25519PublicKey::from(&self.0).to_bytes())
    }

    pub(crate) fn secret(&self) -> &StaticSecret {
        &self.0
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PrivateKey([REDACTED])")
    }
}

// ============================================
// PublicKey
// ============================================

/// X25519 public key.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PublicKey([u8; KEY_SIZE]);

impl PublicKey {
    /// Wraps raw key bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Returns the raw key bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }

    /// The session id for a client holding this key.
    #[must_use]
    pub const fn session_id(&self) -> SessionId {
        SessionId::from_array(self.0)
    }

    pub(crate) fn to_dalek(self) -> X25519PublicKey {
        X25519PublicKey::from(self.0)
    }
}

impl From<SessionId> for PublicKey {
    fn from(id: SessionId) -> Self {
        Self(*id.as_bytes())
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "PublicKey({:02x}{:02x}{:02x}{:02x}...)",
            self.0[0], self.0[1], self.0[2], self.0[3]
        )
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", encode_base64(&self.0))
    }
}

impl FromStr for PublicKey {
    type Err = CommonError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        decode_base64_array::<KEY_SIZE>("public key", s).map(Self)
    }
}

impl Serialize for PublicKey {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for PublicKey {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// ============================================
// KeyPair
// ============================================

/// Private key plus its public half.
#[derive(Clone)]
pub struct KeyPair {
    private: PrivateKey,
    public: PublicKey,
}

impl KeyPair {
    /// Generates a fresh key pair.
    #[must_use]
    pub fn generate() -> Self {
        Self::from_private(PrivateKey::generate())
    }

    /// Builds the pair from a private key.
    #[must_use]
    pub fn from_private(private: PrivateKey) -> Self {
        let public = private.public_key();
        Self { private, public }
    }

    /// The private half.
    #[must_use]
    pub const fn private_key(&self) -> &PrivateKey {
        &self.private
    }

    /// The public half.
    #[must_use]
    pub const fn public_key(&self) -> PublicKey {
        self.public
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("public", &self.public)
            .finish_non_exhaustive()
    }
}

// ============================================
// Tests
// ============================================
