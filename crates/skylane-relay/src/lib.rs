// ============================================
// File: crates/skylane-relay/src/lib.rs
// ============================================
//! # Skylane Relay
//!
//! ## Creation Reason
//! The roles of the Skylane UDP relay: a client connects through a public
//! gateway to a backend server, authorized by tokens minted by an auth
//! authority. Protocol mechanics live in `skylane-core`; this crate wires
//! them to sockets, tasks and configuration.
//!
//! ## Main Functionality
//!
//! ### Modules
//! - [`config`]: sectioned configuration, TOML plus environment overlay
//! - [`services`]: session table and auth authority
//! - [`handlers`]: per-packet gateway and server logic (no I/O)
//! - [`runtime`]: worker loops for gateway and server
//! - [`client`]: client state machine and tasks
//! - [`error`]: relay error types
//!
//! ## Architecture Overview
//! ```text
//! ┌────────┐  sealed payload  ┌───────────────────┐  relay packet  ┌────────┐
//! │ Client │ ───────────────► │ Gateway           │ ─────────────► │ Server │
//! │        │ ◄─────────────── │ public │ internal │ ◄───────────── │        │
//! └────────┘  payload/challenge└───────────────────┘                └────────┘
//!      ▲
//!      │ connect token / renewals
//! ┌────────────┐
//! │ Authority  │
//! └────────────┘
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - Every address the roles use is embedded in packet tags; NAT between
//!   roles breaks filtering
//! - Configuration changes require restart (no hot-reload)
//!
//! ## Last Modified
//! v0.1.0 - Initial relay roles

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod client;
pub mod config;
pub mod error;
pub mod handlers;
pub mod runtime;
pub mod services;

// Re-export primary types
pub use client::{Client, ClientStats, ConnectionState};
pub use config::RelayConfig;
pub use error::{RelayError, Result};
pub use runtime::{Gateway, Server};
pub use services::{Authority, Terms, TokenRefresher};
