// ============================================
// File: crates/skylane-relay/src/handlers/mod.rs
// ============================================
//! # Packet Handlers
//!
//! ## Creation Reason
//! Per-packet logic for the gateway and server, kept free of I/O so it can
//! be driven by the worker loops and by tests alike.
//!
//! ## Main Functionality
//!
//! ### Submodules
//! - [`gateway`]: client ↔ gateway ↔ server translation
//! - [`server`]: session reliability and echo
//!
//! ## Handler Architecture
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                   Worker loop (I/O)                  │
//! │   recv ──► handler.handle_*(&mut buf, src, now)      │
//! │                     │                                │
//! │                     ▼                                │
//! │          Ok(Some(Outbound)) ──► send on `route`      │
//! │          Ok(None)           ──► choked, nothing sent │
//! │          Err(drop)          ──► debug, continue      │
//! │          Err(invariant)     ──► error, worker stops  │
//! └──────────────────────────────────────────────────────┘
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - Handlers are the critical path: no allocation per packet beyond the
//!   reused output buffer
//!
//! ## Last Modified
//! v0.1.0 - Gateway and server handlers

use std::net::SocketAddr;

pub mod gateway;
pub mod server;

pub use gateway::{GatewayContext, GatewayHandler};
pub use server::{ServerContext, ServerHandler};

/// Which of the worker's sockets a response leaves on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// The public, client-facing socket.
    Public,
    /// The gateway worker's server-facing socket.
    Internal,
}

/// A datagram ready to send, borrowed from the handler's output buffer.
#[derive(Debug)]
pub struct Outbound<'a> {
    /// Destination
    pub dest: SocketAddr,
    /// Socket to send on
    pub route: Route,
    /// Encoded packet
    pub bytes: &'a [u8],
}
