// ============================================
// File: crates/skylane-core/src/crypto/kdf.rs
// ============================================
//! # Key Derivation Functions
//!
//! ## Main Functionality
//! - `derive_envelope_key`: turns an X25519 shared secret into a
//!   ChaCha20-Poly1305 key for one `Purpose`
//! - `EnvelopeKey`: the derived key, zeroed on drop
//!
//! Separate purposes (packets, challenge tokens, session tokens) get
//! separate keys, so their nonce spaces never meet even when the same two
//! parties are involved.
//!
//! ## Last Modified
//! v0.1.0 - Initial KDF

use std::fmt;

use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::envelope::Purpose;
use super::{HKDF_SALT, KEY_SIZE};
use crate::error::{CoreError, Result};

// ============================================
// EnvelopeKey
// ============================================

/// Symmetric key for one envelope purpose.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct EnvelopeKey([u8; KEY_SIZE]);

impl EnvelopeKey {
    /// Returns the raw key bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl fmt::Debug for EnvelopeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EnvelopeKey([REDACTED])")
    }
}

// ============================================
// Key Derivation
// ============================================

/// Derives an envelope key from a 32-byte X25519 shared secret.
///
/// ```text
/// key = HKDF-SHA256(ikm: shared_secret, salt: "skylane-v1", info: purpose label)
/// ```
///
/// # Errors
/// `KeyDerivation` if HKDF expansion fails.
pub fn derive_envelope_key(shared_secret: &[u8; KEY_SIZE], purpose: Purpose) -> Result<EnvelopeKey> {
    let hk = Hkdf::<Sha256>::new(Some(HKDF_SALT), shared_secret);

    let mut key = [0u8; KEY_SIZE];
    hk.expand(purpose.label(), &mut key)
        .map_err(|_| CoreError::KeyDerivation {
            reason: "HKDF expansion failed".into(),
        })?;

    let derived = EnvelopeKey(key);
    key.zeroize();
    Ok(derived)
}

// ============================================
// Tests
// ============================================
