// ============================================
// File: crates/skylane-relay/src/error.rs
// ============================================
//! # Relay Error Types
//!
//! ## Creation Reason
//! One error type for every relay role. Packet paths return it and the
//! worker loop decides from the variant whether to drop quietly, or to
//! abort the worker.
//!
//! ## Error Categories
//! 1. **Configuration / startup**: fatal before any packet is handled
//! 2. **Dropped**: protocol-logic rejections, logged at debug
//! 3. **Wrapped core / transport**: shape, filter and crypto drops
//! 4. **Invariant**: a state that cannot happen; aborts the worker
//!
//! ## ⚠️ Important Note for Next Developer
//! - Nothing in categories 2 and 3 may ever end a worker
//! - Never put key material in messages
//!
//! ## Last Modified
//! v0.1.0 - Initial relay errors

use thiserror::Error;

use skylane_common::error::CommonError;
use skylane_core::error::CoreError;
use skylane_transport::error::TransportError;

/// Result type for relay operations.
pub type Result<T> = std::result::Result<T, RelayError>;

/// Relay error types.
#[derive(Error, Debug)]
pub enum RelayError {
    // ========================================
    // Configuration Errors
    // ========================================

    /// Configuration file could not be read or parsed.
    #[error("Failed to load configuration from '{path}': {reason}")]
    ConfigLoad {
        /// File path or `<env>` / `<string>`
        path: String,
        /// Parser or I/O message
        reason: String,
    },

    /// A configuration value is present but unusable.
    #[error("Invalid configuration: {field} - {reason}")]
    ConfigInvalid {
        /// Dotted field name
        field: String,
        /// Why it's invalid
        reason: String,
    },

    /// A role needs a value that is not configured.
    #[error("Missing required configuration: {field}")]
    ConfigMissing {
        /// Dotted field name
        field: String,
    },

    /// A role could not start.
    #[error("Startup failed: {reason}")]
    StartupFailed {
        /// What went wrong
        reason: String,
    },

    // ========================================
    // Packet Path
    // ========================================

    /// Packet dropped by a protocol rule.
    #[error("Packet dropped: {reason}")]
    Dropped {
        /// Which rule fired
        reason: &'static str,
    },

    /// A state the relay relies on never occurring did occur.
    #[error("Invariant violated: {context}")]
    Invariant {
        /// What was violated
        context: String,
    },

    // ========================================
    // Lifecycle
    // ========================================

    /// The client's session token lapsed.
    #[error("Session token expired at {expire_timestamp}")]
    SessionExpired {
        /// Local clock value that passed
        expire_timestamp: u64,
    },

    // ========================================
    // Wrapped Errors
    // ========================================

    /// Error from common crate.
    #[error(transparent)]
    Common(#[from] CommonError),

    /// Error from the protocol engine.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Error from the transport.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl RelayError {
    // ========================================
    // Convenience Constructors
    // ========================================

    /// Creates a `ConfigLoad` error.
    pub fn config_load(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ConfigLoad {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Creates a `ConfigInvalid` error.
    pub fn config_invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ConfigInvalid {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Creates a `ConfigMissing` error.
    pub fn config_missing(field: impl Into<String>) -> Self {
        Self::ConfigMissing {
            field: field.into(),
        }
    }

    /// Creates a `StartupFailed` error.
    pub fn startup_failed(reason: impl Into<String>) -> Self {
        Self::StartupFailed {
            reason: reason.into(),
        }
    }

    /// Creates a `Dropped` error.
    #[must_use]
    pub const fn dropped(reason: &'static str) -> Self {
        Self::Dropped { reason }
    }

    /// Creates an `Invariant` error.
    pub fn invariant(context: impl Into<String>) -> Self {
        Self::Invariant {
            context: context.into(),
        }
    }

    // ========================================
    // Error Classification
    // ========================================

    /// Returns `true` for configuration errors.
    #[must_use]
    pub const fn is_config_error(&self) -> bool {
        matches!(
            self,
            Self::ConfigLoad { .. } | Self::ConfigInvalid { .. } | Self::ConfigMissing { .. }
        )
    }

    /// Returns `true` when the packet should be dropped and the loop
    /// continued.
    #[must_use]
    pub fn is_drop(&self) -> bool {
        match self {
            Self::Dropped { .. } => true,
            Self::Core(e) => e.is_drop(),
            Self::Transport(e) => e.is_transient(),
            _ => false,
        }
    }

    /// Returns `true` when the worker that hit this must stop.
    #[must_use]
    pub const fn is_invariant(&self) -> bool {
        matches!(self, Self::Invariant { .. })
    }

    /// Returns `true` for errors that should stop the process at startup.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        match self {
            Self::ConfigLoad { .. }
            | Self::ConfigInvalid { .. }
            | Self::ConfigMissing { .. }
            | Self::StartupFailed { .. } => true,
            Self::Transport(e) => e.is_setup_error(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RelayError::config_load("/etc/skylane.toml", "file not found");
        assert!(err.to_string().contains("/etc/skylane.toml"));
    }

    #[test]
    fn test_error_classification() {
        let config_err = RelayError::config_invalid("network.num_threads", "must be > 0");
        assert!(config_err.is_config_error());
        assert!(config_err.is_fatal());
        assert!(!config_err.is_drop());

        assert!(RelayError::dropped("replayed sequence").is_drop());
        assert!(RelayError::from(CoreError::Decryption).is_drop());
        assert!(RelayError::from(CoreError::FilterRejected).is_drop());

        let invariant = RelayError::invariant("downstream packet over size limit");
        assert!(invariant.is_invariant());
        assert!(!invariant.is_drop());
    }

    #[test]
    fn test_transport_error_classification() {
        let in_use = RelayError::from(TransportError::AddressInUse {
            addr: "127.0.0.1:40000".parse().unwrap(),
        });
        assert!(in_use.is_fatal());
        assert!(!in_use.is_drop());

        let refused = RelayError::from(TransportError::Receive {
            source: std::io::Error::from(std::io::ErrorKind::ConnectionRefused),
        });
        assert!(refused.is_drop());
        assert!(!refused.is_fatal());
    }
}
