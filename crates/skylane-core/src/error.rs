// ============================================
// File: crates/skylane-core/src/error.rs
// ============================================
//! # Core Error Types
//!
//! ## Creation Reason
//! Defines error types for the wire protocol engine: packet shape, the
//! obfuscation filter, the encryption envelope and the token system.
//!
//! ## Main Functionality
//! - `CoreError`: Primary error enum for core operations
//! - Classification helpers used by packet loops to pick a log level
//!
//! ## Error Categories
//! 1. **Shape Errors**: size, version, type, truncation
//! 2. **Filter Errors**: chonkle/pittle mismatch
//! 3. **Crypto Errors**: decryption (tag) failures, key derivation
//! 4. **Protocol Logic Errors**: expired or out-of-window tokens, id mismatch
//!
//! ## ⚠️ Important Note for Next Developer
//! - NEVER include key material in error messages
//! - Shape, filter, crypto and logic errors are drop paths: the packet
//!   is discarded and nothing is sent back to the peer
//!
//! ## Last Modified
//! v0.1.0 - Initial error definitions

use thiserror::Error;

use skylane_common::error::CommonError;

// ============================================
// Result Type Alias
// ============================================

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;

// ============================================
// CoreError
// ============================================

/// Core error types for the protocol engine.
#[derive(Error, Debug)]
pub enum CoreError {
    // ========================================
    // Shape Errors
    // ========================================

    /// Unknown packet type byte.
    #[error("Unknown packet type: 0x{0:02x}")]
    UnknownPacketType(u8),

    /// Protocol version mismatch.
    #[error("Unsupported protocol version: {got}, expected {expected}")]
    UnsupportedVersion {
        /// Version received
        got: u8,
        /// Version expected
        expected: u8,
    },

    /// Packet is malformed.
    #[error("Malformed packet: {reason}")]
    MalformedPacket {
        /// What's wrong with the packet
        reason: String,
    },

    /// Packet or field is truncated.
    #[error("Packet too short: expected at least {expected} bytes, got {actual}")]
    PacketTooShort {
        /// Minimum expected length
        expected: usize,
        /// Actual length available
        actual: usize,
    },

    /// Packet exceeds maximum allowed size.
    #[error("Packet too large: max {max} bytes, got {actual}")]
    PacketTooLarge {
        /// Maximum allowed size
        max: usize,
        /// Actual size
        actual: usize,
    },

    /// Unknown address tag in the tagged address encoding.
    #[error("Invalid address tag: {0}")]
    InvalidAddressTag(u8),

    // ========================================
    // Filter Errors
    // ========================================

    /// Obfuscation tags do not match the observed addressing.
    #[error("Packet filter rejected packet")]
    FilterRejected,

    // ========================================
    // Cryptographic Errors
    // ========================================

    /// Encryption operation failed.
    #[error("Encryption failed: {context}")]
    Encryption {
        /// What was being encrypted
        context: String,
    },

    /// Decryption operation failed (authentication failure).
    #[error("Decryption failed: authentication error")]
    Decryption,

    /// Key derivation failed.
    #[error("Key derivation failed: {reason}")]
    KeyDerivation {
        /// Why derivation failed
        reason: String,
    },

    /// The sequence counter would wrap and reuse a nonce.
    #[error("Sequence space exhausted for this key")]
    SequenceExhausted,

    // ========================================
    // Token Errors
    // ========================================

    /// Token lifetime has passed.
    #[error("Token expired at {expire}, now {now}")]
    TokenExpired {
        /// Expiry timestamp carried by the token
        expire: u64,
        /// Time of the check
        now: u64,
    },

    /// Session token renewal requested before the renewal window opened.
    #[error("Renewal too early: {remaining}s remaining, window is {window}s")]
    RenewalTooEarly {
        /// Seconds until expiry
        remaining: u64,
        /// Renewal window in seconds
        window: u64,
    },

    /// Token names a different session than the packet carrying it.
    #[error("Token session does not match packet session")]
    SessionMismatch,

    /// Challenge token was issued by another gateway.
    #[error("Challenge token issued by gateway {got}, expected {expected}")]
    GatewayMismatch {
        /// This gateway's id
        expected: u64,
        /// Id found in the token
        got: u64,
    },

    // ========================================
    // Wrapped Errors
    // ========================================

    /// Error from common crate.
    #[error(transparent)]
    Common(#[from] CommonError),
}

impl CoreError {
    // ========================================
    // Convenience Constructors
    // ========================================

    /// Creates a `MalformedPacket` error.
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedPacket {
            reason: reason.into(),
        }
    }

    /// Creates a `PacketTooShort` error.
    pub const fn too_short(expected: usize, actual: usize) -> Self {
        Self::PacketTooShort { expected, actual }
    }

    /// Creates an `Encryption` error.
    pub fn encryption(context: impl Into<String>) -> Self {
        Self::Encryption {
            context: context.into(),
        }
    }

    /// Creates a `TokenExpired` error.
    pub const fn expired(expire: u64, now: u64) -> Self {
        Self::TokenExpired { expire, now }
    }

    // ========================================
    // Error Classification
    // ========================================

    /// Returns `true` for malformed-shape errors.
    #[must_use]
    pub const fn is_shape_error(&self) -> bool {
        matches!(
            self,
            Self::UnknownPacketType(_)
                | Self::UnsupportedVersion { .. }
                | Self::MalformedPacket { .. }
                | Self::PacketTooShort { .. }
                | Self::PacketTooLarge { .. }
                | Self::InvalidAddressTag(_)
        )
    }

    /// Returns `true` if this is a cryptographic error.
    #[must_use]
    pub const fn is_crypto_error(&self) -> bool {
        matches!(
            self,
            Self::Encryption { .. }
                | Self::Decryption
                | Self::KeyDerivation { .. }
                | Self::SequenceExhausted
        )
    }

    /// Returns `true` for token and protocol-logic rejections.
    #[must_use]
    pub const fn is_token_error(&self) -> bool {
        matches!(
            self,
            Self::TokenExpired { .. }
                | Self::RenewalTooEarly { .. }
                | Self::SessionMismatch
                | Self::GatewayMismatch { .. }
        )
    }

    /// Returns `true` when the correct reaction is to silently drop the
    /// packet that caused the error.
    ///
    /// Everything caused by remote input is a drop. Local failures
    /// (encryption, key derivation, sequence exhaustion) are not.
    #[must_use]
    pub const fn is_drop(&self) -> bool {
        self.is_shape_error()
            || self.is_token_error()
            || matches!(self, Self::FilterRejected | Self::Decryption)
    }
}

// ============================================
// Tests
// ============================================
