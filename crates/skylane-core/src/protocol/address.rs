// ============================================
// File: crates/skylane-core/src/protocol/address.rs
// ============================================
//! # Tagged Network Address
//!
//! ## Creation Reason
//! The relay hop carries two endpoints per packet, and the connect token
//! carries the gateway endpoint. Both use a compact tagged encoding so an
//! IPv4 endpoint costs 7 bytes instead of a full IPv6-sized slot.
//!
//! ## Wire Format
//! ```text
//! none: [0]
//! v4:   [1][a b c d][port LE]
//! v6:   [2][16 address bytes][port LE]
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - IPv4-mapped IPv6 socket addresses are folded to `V4` on conversion so
//!   the obfuscation tags agree between dual-stack and v4-only peers
//!
//! ## Last Modified
//! v0.1.0 - Initial implementation

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use bytes::BufMut;

use crate::error::{CoreError, Result};
use crate::protocol::codec::{Codec, Reader};

/// Tag byte for an absent address.
pub const ADDRESS_NONE: u8 = 0;
/// Tag byte for an IPv4 address.
pub const ADDRESS_V4: u8 = 1;
/// Tag byte for an IPv6 address.
pub const ADDRESS_V6: u8 = 2;

/// Largest encoded address (IPv6).
pub const MAX_ADDRESS_BYTES: usize = 1 + 16 + 2;

/// A network endpoint, or the absence of one.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Address {
    /// No address.
    #[default]
    None,
    /// IPv4 address and port.
    V4 {
        /// Address octets
        ip: [u8; 4],
        /// Port
        port: u16,
    },
    /// IPv6 address and port.
    V6 {
        /// Address octets
        ip: [u8; 16],
        /// Port
        port: u16,
    },
}

impl Address {
    /// Raw address bytes (empty for `None`).
    #[must_use]
    pub fn ip_bytes(&self) -> &[u8] {
        match self {
            Self::None => &[],
            Self::V4 { ip, .. } => ip.as_slice(),
            Self::V6 { ip, .. } => ip.as_slice(),
        }
    }

    /// Port, or zero for `None`.
    #[must_use]
    pub const fn port(&self) -> u16 {
        match self {
            Self::None => 0,
            Self::V4 { port, .. } | Self::V6 { port, .. } => *port,
        }
    }

    /// Encoded size in bytes.
    #[must_use]
    pub const fn encoded_len(&self) -> usize {
        match self {
            Self::None => 1,
            Self::V4 { .. } => 1 + 4 + 2,
            Self::V6 { .. } => 1 + 16 + 2,
        }
    }

    /// Returns `true` for `Address::None`.
    #[must_use]
    pub const fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }

    /// Converts to a socket address, if there is one.
    #[must_use]
    pub fn to_socket_addr(&self) -> Option<SocketAddr> {
        match *self {
            Self::None => None,
            Self::V4 { ip, port } => Some(SocketAddr::new(IpAddr::V4(Ipv4Addr::from(ip)), port)),
            Self::V6 { ip, port } => Some(SocketAddr::new(IpAddr::V6(Ipv6Addr::from(ip)), port)),
        }
    }
}

impl From<SocketAddr> for Address {
    fn from(addr: SocketAddr) -> Self {
        match addr.ip().to_canonical() {
            IpAddr::V4(ip) => Self::V4 {
                ip: ip.octets(),
                port: addr.port(),
            },
            IpAddr::V6(ip) => Self::V6 {
                ip: ip.octets(),
                port: addr.port(),
            },
        }
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_socket_addr() {
            Some(addr) => write!(f, "{addr}"),
            None => write!(f, "none"),
        }
    }
}

impl Codec for Address {
    fn encode<B: BufMut>(&self, buf: &mut B) {
        match self {
            Self::None => buf.put_u8(ADDRESS_NONE),
            Self::V4 { ip, port } => {
                buf.put_u8(ADDRESS_V4);
                buf.put_slice(ip);
                buf.put_u16_le(*port);
            }
            Self::V6 { ip, port } => {
                buf.put_u8(ADDRESS_V6);
                buf.put_slice(ip);
                buf.put_u16_le(*port);
            }
        }
    }

    fn decode(reader: &mut Reader<'_>) -> Result<Self> {
        match reader.read_u8()? {
            ADDRESS_NONE => Ok(Self::None),
            ADDRESS_V4 => {
                let ip = reader.read_array()?;
                let port = reader.read_u16()?;
                Ok(Self::V4 { ip, port })
            }
            ADDRESS_V6 => {
                let ip = reader.read_array()?;
                let port = reader.read_u16()?;
                Ok(Self::V6 { ip, port })
            }
            tag => Err(CoreError::InvalidAddressTag(tag)),
        }
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_v4_layout() {
        let addr = Address::from("1.2.3.4:1000".parse::<SocketAddr>().unwrap());
        let bytes = addr.to_bytes();
        assert_eq!(&bytes[..], &[1, 1, 2, 3, 4, 0xe8, 0x03]);
        assert_eq!(bytes.len(), addr.encoded_len());
        assert_eq!(Address::from_slice(&bytes).unwrap(), addr);
    }

    #[test]
    fn test_v6_roundtrip() {
        let addr = Address::from("[2001:db8::1]:5000".parse::<SocketAddr>().unwrap());
        let bytes = addr.to_bytes();
        assert_eq!(bytes.len(), MAX_ADDRESS_BYTES);
        assert_eq!(Address::from_slice(&bytes).unwrap(), addr);
    }

    #[test]
    fn test_none_is_single_byte() {
        assert_eq!(&Address::None.to_bytes()[..], &[0]);
        assert!(Address::from_slice(&[0]).unwrap().is_none());
        assert_eq!(Address::None.to_socket_addr(), None);
    }

    #[test]
    fn test_mapped_v6_folds_to_v4() {
        let mapped: SocketAddr = "[::ffff:10.0.0.1]:40000".parse().unwrap();
        let addr = Address::from(mapped);
        assert_eq!(addr, Address::V4 { ip: [10, 0, 0, 1], port: 40000 });
    }

    #[test]
    fn test_bad_tag_and_truncation() {
        assert!(matches!(
            Address::from_slice(&[9]),
            Err(CoreError::InvalidAddressTag(9))
        ));
        assert!(matches!(
            Address::from_slice(&[1, 1, 2]),
            Err(CoreError::PacketTooShort { .. })
        ));
    }
}
