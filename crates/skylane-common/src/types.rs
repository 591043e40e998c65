// ============================================
// File: crates/skylane-common/src/types.rs
// ============================================
//! # Session Identity
//!
//! ## Creation Reason
//! A session is named by the client's long-lived X25519 public key, so one
//! key is one logical session across reconnects and gateway migrations.
//! Gateway and server key their session tables by it.
//!
//! ## ⚠️ Important Note for Next Developer
//! - Not a secret: it travels in clear in every packet prefix
//! - Headers and tokens hardcode the 32-byte width
//!
//! ## Last Modified
//! v0.1.0 - Initial implementation

use std::fmt;
use std::str::FromStr;

use rand::RngCore;

use crate::error::{decode_base64_array, encode_base64, CommonError};

/// Width of a session id on the wire.
pub const SESSION_ID_SIZE: usize = 32;

/// Client session identifier (the client public key).
///
/// # Example
/// ```
/// use skylane_common::SessionId;
///
/// let id = SessionId::from_array([7; 32]);
/// let parsed: SessionId = id.to_string().parse().unwrap();
/// assert_eq!(id, parsed);
/// ```
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId([u8; SESSION_ID_SIZE]);

impl SessionId {
    /// Wraps a public key's bytes.
    #[must_use]
    pub const fn from_array(bytes: [u8; SESSION_ID_SIZE]) -> Self {
        Self(bytes)
    }

    /// A random id that belongs to no key pair. Test fixtures only.
    #[must_use]
    pub fn random() -> Self {
        let mut bytes = [0u8; SESSION_ID_SIZE];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Raw bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; SESSION_ID_SIZE] {
        &self.0
    }
}

impl fmt::Debug for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionId({:02x}{:02x}{:02x}{:02x}..)", self.0[0], self.0[1], self.0[2], self.0[3])
    }
}

/// Base64, matching how keys are configured.
impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&encode_base64(&self.0))
    }
}

impl FromStr for SessionId {
    type Err = CommonError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        decode_base64_array("session id", s).map(Self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_ids_differ() {
        assert_ne!(SessionId::random(), SessionId::random());
    }

    #[test]
    fn test_text_form_is_base64() {
        let id = SessionId::from_array([0xff; SESSION_ID_SIZE]);
        assert!(id.to_string().starts_with("//////"));
        assert_eq!(id.to_string().parse::<SessionId>().unwrap(), id);
    }

    #[test]
    fn test_wrong_width_rejected() {
        let err = "AAAA".parse::<SessionId>().unwrap_err();
        assert!(matches!(err, CommonError::InvalidLength { expected: 32, actual: 3 }));
    }

    #[test]
    fn test_debug_shows_prefix_only() {
        let id = SessionId::from_array([0xab; SESSION_ID_SIZE]);
        assert_eq!(format!("{id:?}"), "SessionId(abababab..)");
    }
}
