// ============================================
// File: crates/skylane-transport/src/udp.rs
// ============================================
//! # UDP Socket
//!
//! ## Creation Reason
//! Tokio's `UdpSocket::bind` cannot set `SO_REUSEPORT` or buffer sizes
//! before binding. The gateway and server run one socket per worker on the
//! same public port, so sockets are built with socket2 and then handed to
//! Tokio.
//!
//! ## Main Functionality
//! - `SocketOptions`: port sharing and kernel buffer requests
//! - `UdpTransport`: the `Transport` implementation
//!
//! ## ⚠️ Important Note for Next Developer
//! - With `reuse_port` the kernel hashes each flow to one socket; a client
//!   whose source port changes may land on a different worker
//! - Buffer sizes are requests; Linux doubles and clamps them to
//!   `net.core.rmem_max` / `wmem_max`
//! - Must be called inside a Tokio runtime
//!
//! ## Last Modified
//! v0.1.0 - Initial UDP transport implementation

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tracing::{debug, info, trace};

use crate::error::{Result, TransportError};
use crate::traits::Transport;

// ============================================
// SocketOptions
// ============================================

/// Settings applied between socket creation and `bind`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SocketOptions {
    /// Let several sockets bind the same address (unix only).
    pub reuse_port: bool,
    /// `SO_RCVBUF` request in bytes.
    pub recv_buffer: Option<usize>,
    /// `SO_SNDBUF` request in bytes.
    pub send_buffer: Option<usize>,
}

impl SocketOptions {
    /// Options for a public port served by several workers.
    #[must_use]
    pub const fn shared() -> Self {
        Self {
            reuse_port: true,
            recv_buffer: None,
            send_buffer: None,
        }
    }

    /// Requests kernel buffer sizes.
    #[must_use]
    pub const fn with_buffers(mut self, recv: usize, send: usize) -> Self {
        self.recv_buffer = Some(recv);
        self.send_buffer = Some(send);
        self
    }

    fn apply(self, socket: &Socket) -> Result<()> {
        if self.reuse_port {
            socket
                .set_reuse_address(true)
                .map_err(|e| TransportError::option("SO_REUSEADDR", e))?;
            #[cfg(all(unix, not(any(target_os = "solaris", target_os = "illumos"))))]
            socket
                .set_reuse_port(true)
                .map_err(|e| TransportError::option("SO_REUSEPORT", e))?;
        }
        if let Some(size) = self.recv_buffer {
            socket
                .set_recv_buffer_size(size)
                .map_err(|e| TransportError::option("SO_RCVBUF", e))?;
        }
        if let Some(size) = self.send_buffer {
            socket
                .set_send_buffer_size(size)
                .map_err(|e| TransportError::option("SO_SNDBUF", e))?;
        }
        Ok(())
    }
}

// ============================================
// UdpTransport
// ============================================

/// A Tokio UDP socket plus a closed flag.
///
/// # Example
/// ```ignore
/// use skylane_transport::{SocketOptions, UdpTransport};
///
/// let socket = UdpTransport::bind_with(
///     "10.0.0.5:40000".parse()?,
///     SocketOptions::shared().with_buffers(1 << 20, 1 << 20),
/// ).await?;
/// ```
pub struct UdpTransport {
    socket: UdpSocket,
    local_addr: SocketAddr,
    closed: AtomicBool,
}

impl UdpTransport {
    /// Parses `addr` and binds with default options.
    ///
    /// # Errors
    /// `InvalidAddress` when `addr` is not `ip:port`, otherwise see
    /// [`UdpTransport::bind_with`].
    pub async fn bind(addr: impl AsRef<str>) -> Result<Self> {
        let text = addr.as_ref();
        let addr = text.parse().map_err(|_| TransportError::InvalidAddress {
            text: text.to_string(),
        })?;
        Self::bind_with(addr, SocketOptions::default()).await
    }

    /// Creates, configures and binds a socket.
    ///
    /// # Errors
    /// Any setup error; see [`TransportError::is_setup_error`].
    pub async fn bind_with(addr: SocketAddr, options: SocketOptions) -> Result<Self> {
        let domain = if addr.is_ipv4() {
            Domain::IPV4
        } else {
            Domain::IPV6
        };
        let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))
            .map_err(|e| TransportError::socket("creating", e))?;
        options.apply(&socket)?;
        socket
            .set_nonblocking(true)
            .map_err(|e| TransportError::socket("setting non-blocking", e))?;
        socket
            .bind(&addr.into())
            .map_err(|e| TransportError::bind(addr, e))?;

        let socket = UdpSocket::from_std(socket.into())
            .map_err(|e| TransportError::socket("registering with Tokio", e))?;
        let local_addr = socket
            .local_addr()
            .map_err(|e| TransportError::socket("reading local address", e))?;

        info!(%local_addr, ?options, "UDP socket bound");

        Ok(Self {
            socket,
            local_addr,
            closed: AtomicBool::new(false),
        })
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            Err(TransportError::Closed)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Transport for UdpTransport {
    async fn recv(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr)> {
        self.ensure_open()?;
        let (len, from) = self
            .socket
            .recv_from(buf)
            .await
            .map_err(|source| TransportError::Receive { source })?;
        trace!(len, %from, "recv");
        Ok((len, from))
    }

    async fn send(&self, buf: &[u8], dest: &SocketAddr) -> Result<usize> {
        self.ensure_open()?;
        let len = self
            .socket
            .send_to(buf, dest)
            .await
            .map_err(|source| TransportError::Send { dest: *dest, source })?;
        trace!(len, to = %dest, "send");
        Ok(len)
    }

    fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.local_addr)
    }

    async fn shutdown(&self) -> Result<()> {
        if !self.closed.swap(true, Ordering::AcqRel) {
            debug!(local_addr = %self.local_addr, "UDP socket closed");
        }
        Ok(())
    }

    fn is_active(&self) -> bool {
        !self.closed.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for UdpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UdpTransport")
            .field("local_addr", &self.local_addr)
            .field("active", &self.is_active())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_port_zero_reports_real_port() {
        let socket = UdpTransport::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        assert_eq!(addr.ip(), std::net::Ipv4Addr::LOCALHOST);
        assert_ne!(addr.port(), 0);
    }

    #[tokio::test]
    async fn test_datagram_carries_sender() {
        let a = UdpTransport::bind("127.0.0.1:0").await.unwrap();
        let b = UdpTransport::bind("127.0.0.1:0").await.unwrap();

        b.send(b"ping", &a.local_addr().unwrap()).await.unwrap();

        let mut buf = [0u8; 64];
        let (len, from) = a.recv(&mut buf).await.unwrap();
        assert_eq!(&buf[..len], b"ping");
        assert_eq!(from, b.local_addr().unwrap());
    }

    #[tokio::test]
    async fn test_closed_socket_refuses_io() {
        let socket = UdpTransport::bind("127.0.0.1:0").await.unwrap();
        socket.shutdown().await.unwrap();
        assert!(!socket.is_active());

        let dest = socket.local_addr().unwrap();
        assert!(matches!(socket.send(b"x", &dest).await, Err(TransportError::Closed)));
        let mut buf = [0u8; 8];
        assert!(matches!(socket.recv(&mut buf).await, Err(TransportError::Closed)));
    }

    #[tokio::test]
    async fn test_hostname_rejected() {
        let result = UdpTransport::bind("localhost:40000").await;
        assert!(matches!(result, Err(TransportError::InvalidAddress { .. })));
    }

    #[tokio::test]
    async fn test_exclusive_bind_conflicts() {
        let first = UdpTransport::bind("127.0.0.1:0").await.unwrap();
        let addr = first.local_addr().unwrap();
        let second = UdpTransport::bind_with(addr, SocketOptions::default()).await;
        assert!(second.unwrap_err().is_setup_error());
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_shared_port_binds_twice() {
        let options = SocketOptions::shared().with_buffers(1 << 16, 1 << 16);
        let first = UdpTransport::bind_with("127.0.0.1:0".parse().unwrap(), options)
            .await
            .unwrap();
        let addr = first.local_addr().unwrap();
        let second = UdpTransport::bind_with(addr, options).await.unwrap();
        assert_eq!(second.local_addr().unwrap(), addr);
    }
}
