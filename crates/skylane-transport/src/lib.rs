// ============================================
// File: crates/skylane-transport/src/lib.rs
// ============================================
//! # Skylane Transport - Datagram Sockets
//!
//! ## Creation Reason
//! Keeps socket construction out of the relay roles. Gateway, server and
//! client workers all take a [`UdpTransport`] through the [`Transport`]
//! trait and never touch socket2 directly.
//!
//! ## Main Functionality
//! - [`traits`]: the `Transport` trait
//! - [`udp`]: socket2-built UDP sockets with port sharing and buffer sizes
//! - [`error`]: setup vs. per-datagram failures
//!
//! ## Platform Support
//! | Platform | UDP | SO_REUSEPORT |
//! |----------|-----|--------------|
//! | Linux    | ✅  | ✅           |
//! | macOS    | ✅  | ✅ (no flow hashing) |
//! | Windows  | ✅  | ❌ (one worker per address) |
//!
//! ## ⚠️ Important Note for Next Developer
//! - This crate knows nothing about packets; keep protocol code in
//!   `skylane-core`
//!
//! ## Last Modified
//! v0.1.0 - Initial transport layer implementation

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod traits;
pub mod udp;

pub use error::{Result, TransportError};
pub use traits::Transport;
pub use udp::{SocketOptions, UdpTransport};
