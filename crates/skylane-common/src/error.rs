// ============================================
// File: crates/skylane-common/src/error.rs
// ============================================
//! # Common Error Types
//!
//! ## Creation Reason
//! Keys, magic values, tokens and session ids all reach the relay as base64
//! text. Decoding them is the one failure every crate shares; higher crates
//! wrap `CommonError` in their own enums via `#[from]`.
//!
//! ## Main Functionality
//! - `CommonError`: decoding and length failures
//! - `decode_base64_array` / `encode_base64`: the text form of fixed-size
//!   values
//!
//! ## ⚠️ Important Note for Next Developer
//! - Never include key material in error messages; name the field instead
//!
//! ## Last Modified
//! v0.1.0 - Initial error definitions

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use thiserror::Error;

/// Common result type.
pub type Result<T> = std::result::Result<T, CommonError>;

/// Errors shared across Skylane crates.
///
/// # Example
/// ```
/// use skylane_common::error::{decode_base64_array, CommonError};
///
/// let err = decode_base64_array::<8>("filter magic", "AAAA").unwrap_err();
/// assert!(matches!(err, CommonError::InvalidLength { expected: 8, actual: 3 }));
/// ```
#[derive(Error, Debug)]
pub enum CommonError {
    /// Decoded data has the wrong size.
    #[error("Invalid length: expected {expected}, got {actual}")]
    InvalidLength {
        /// Expected length in bytes
        expected: usize,
        /// Actual length received
        actual: usize,
    },

    /// Text could not be decoded.
    #[error("Decoding error: {context}: {details}")]
    Decoding {
        /// What was being decoded
        context: String,
        /// Error details
        details: String,
    },
}

impl CommonError {
    /// Creates an `InvalidLength` error.
    #[must_use]
    pub const fn invalid_length(expected: usize, actual: usize) -> Self {
        Self::InvalidLength { expected, actual }
    }

    /// Creates a `Decoding` error.
    pub fn decoding(context: impl Into<String>, details: impl Into<String>) -> Self {
        Self::Decoding {
            context: context.into(),
            details: details.into(),
        }
    }
}

// ============================================
// Base64 Helpers
// ============================================

/// Decodes standard base64 into a fixed-size array.
///
/// `field` names the value in the error, never its contents.
///
/// # Errors
/// `Decoding` on bad base64, `InvalidLength` when the decoded size differs.
pub fn decode_base64_array<const N: usize>(field: &str, text: &str) -> Result<[u8; N]> {
    let bytes = BASE64
        .decode(text.trim())
        .map_err(|e| CommonError::decoding(field, e.to_string()))?;
    <[u8; N]>::try_from(bytes.as_slice()).map_err(|_| CommonError::invalid_length(N, bytes.len()))
}

/// Encodes bytes as standard base64.
#[must_use]
pub fn encode_base64(bytes: &[u8]) -> String {
    BASE64.encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_names_field_not_value() {
        let err = decode_base64_array::<32>("keys.gateway_private_key", "c2VjcmV0!").unwrap_err();
        let text = err.to_string();
        assert!(text.contains("keys.gateway_private_key"));
        assert!(!text.contains("c2VjcmV0"));
    }

    #[test]
    fn test_base64_array_roundtrip() {
        let text = encode_base64(&[7u8; 8]);
        let decoded: [u8; 8] = decode_base64_array("magic", &text).unwrap();
        assert_eq!(decoded, [7u8; 8]);
    }

    #[test]
    fn test_surrounding_whitespace_ignored() {
        let text = format!("  {}\n", encode_base64(&[1u8; 4]));
        assert_eq!(decode_base64_array::<4>("magic", &text).unwrap(), [1u8; 4]);
    }

    #[test]
    fn test_base64_array_wrong_length() {
        let text = encode_base64(&[7u8; 4]);
        let err = decode_base64_array::<8>("magic", &text).unwrap_err();
        assert!(matches!(err, CommonError::InvalidLength { expected: 8, actual: 4 }));
    }
}
