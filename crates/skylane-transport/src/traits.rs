// ============================================
// File: crates/skylane-transport/src/traits.rs
// ============================================
//! # Datagram Socket Trait
//!
//! Worker loops in `skylane-relay` receive and send through `Transport`.
//! Every relay hop is one datagram in, at most one datagram out, so the
//! trait stays at that granularity: no streams, no framing.

use std::net::SocketAddr;

use async_trait::async_trait;

use crate::error::Result;

/// A bound datagram socket that can be closed from another task.
///
/// # Example
/// ```ignore
/// async fn reflect<T: Transport>(socket: &T) -> Result<()> {
///     let mut buf = [0u8; 2048];
///     while socket.is_active() {
///         let (len, from) = socket.recv(&mut buf).await?;
///         socket.send(&buf[..len], &from).await?;
///     }
///     Ok(())
/// }
/// ```
#[async_trait]
pub trait Transport: Send + Sync {
    /// Waits for one datagram, returning its length and sender.
    ///
    /// Datagrams longer than `buf` are truncated by the kernel.
    ///
    /// # Errors
    /// `Closed` after [`Transport::shutdown`], `Receive` on socket errors.
    async fn recv(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr)>;

    /// Sends one datagram.
    ///
    /// # Errors
    /// `Closed` after [`Transport::shutdown`], `Send` on socket errors.
    async fn send(&self, buf: &[u8], dest: &SocketAddr) -> Result<usize>;

    /// The address the socket is bound to, with the real port when the
    /// requested port was 0.
    ///
    /// # Errors
    /// Implementation specific; `UdpTransport` never fails.
    fn local_addr(&self) -> Result<SocketAddr>;

    /// Marks the socket closed. A `recv` already waiting is not woken;
    /// owners race it against their shutdown signal.
    ///
    /// # Errors
    /// Implementation specific; `UdpTransport` never fails.
    async fn shutdown(&self) -> Result<()>;

    /// `false` once shut down.
    fn is_active(&self) -> bool;
}
