// ============================================
// File: crates/skylane-transport/src/error.rs
// ============================================
//! # Transport Error Types
//!
//! ## Creation Reason
//! Socket failures split into two kinds with different handling: setup
//! failures stop a role before it serves anything, datagram failures are
//! logged and the worker keeps going.
//!
//! ## Main Functionality
//! - `TransportError`: every socket failure, carrying the `io::Error`
//! - `is_setup_error` / `is_transient`: the split above
//!
//! ## ⚠️ Important Note for Next Developer
//! - On Linux an ICMP port-unreachable surfaces on the next `recv` as
//!   `ConnectionRefused`; that is a `Receive` error and must stay transient
//!
//! ## Last Modified
//! v0.1.0 - Initial error definitions

use std::io;
use std::net::SocketAddr;

use thiserror::Error;

/// Result type for transport operations.
pub type Result<T> = std::result::Result<T, TransportError>;

/// Transport layer error types.
#[derive(Error, Debug)]
pub enum TransportError {
    /// Address text did not parse as `ip:port`.
    #[error("Invalid socket address: {text}")]
    InvalidAddress {
        /// The rejected text
        text: String,
    },

    /// Creating or converting the socket failed.
    #[error("Socket setup failed while {step}")]
    Socket {
        /// What was being done
        step: &'static str,
        /// Underlying error
        #[source]
        source: io::Error,
    },

    /// The kernel refused a socket option.
    #[error("Socket option {option} rejected")]
    SocketOption {
        /// Option name, e.g. `SO_RCVBUF`
        option: &'static str,
        /// Underlying error
        #[source]
        source: io::Error,
    },

    /// Another socket holds the address without `SO_REUSEPORT`.
    #[error("Address {addr} already in use")]
    AddressInUse {
        /// The contested address
        addr: SocketAddr,
    },

    /// `bind` failed for any other reason.
    #[error("Failed to bind {addr}")]
    Bind {
        /// Requested address
        addr: SocketAddr,
        /// Underlying error
        #[source]
        source: io::Error,
    },

    /// `send_to` failed.
    #[error("Failed to send to {dest}")]
    Send {
        /// Destination address
        dest: SocketAddr,
        /// Underlying error
        #[source]
        source: io::Error,
    },

    /// `recv_from` failed.
    #[error("Failed to receive")]
    Receive {
        /// Underlying error
        #[source]
        source: io::Error,
    },

    /// The socket was shut down locally.
    #[error("Socket is closed")]
    Closed,
}

impl TransportError {
    pub(crate) const fn socket(step: &'static str, source: io::Error) -> Self {
        Self::Socket { step, source }
    }

    pub(crate) const fn option(option: &'static str, source: io::Error) -> Self {
        Self::SocketOption { option, source }
    }

    pub(crate) fn bind(addr: SocketAddr, source: io::Error) -> Self {
        if source.kind() == io::ErrorKind::AddrInUse {
            Self::AddressInUse { addr }
        } else {
            Self::Bind { addr, source }
        }
    }

    /// `true` for failures that happen before a socket is usable.
    #[must_use]
    pub const fn is_setup_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidAddress { .. }
                | Self::Socket { .. }
                | Self::SocketOption { .. }
                | Self::AddressInUse { .. }
                | Self::Bind { .. }
        )
    }

    /// `true` for per-datagram failures a packet loop should ride out.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Send { .. } | Self::Receive { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn io_err(kind: io::ErrorKind) -> io::Error {
        io::Error::new(kind, "test")
    }

    #[test]
    fn test_addr_in_use_is_distinguished() {
        let addr: SocketAddr = "127.0.0.1:40000".parse().unwrap();
        let err = TransportError::bind(addr, io_err(io::ErrorKind::AddrInUse));
        assert!(matches!(err, TransportError::AddressInUse { .. }));
        assert!(err.to_string().contains("127.0.0.1:40000"));

        let err = TransportError::bind(addr, io_err(io::ErrorKind::PermissionDenied));
        assert!(matches!(err, TransportError::Bind { .. }));
        assert!(err.is_setup_error());
    }

    #[test]
    fn test_refused_receive_is_transient() {
        let err = TransportError::Receive {
            source: io_err(io::ErrorKind::ConnectionRefused),
        };
        assert!(err.is_transient());
        assert!(!err.is_setup_error());
    }

    #[test]
    fn test_closed_is_neither() {
        assert!(!TransportError::Closed.is_transient());
        assert!(!TransportError::Closed.is_setup_error());
    }

    #[test]
    fn test_option_error_names_option() {
        let err = TransportError::option("SO_RCVBUF", io_err(io::ErrorKind::PermissionDenied));
        assert!(err.is_setup_error());
        assert!(err.to_string().contains("SO_RCVBUF"));
    }
}
