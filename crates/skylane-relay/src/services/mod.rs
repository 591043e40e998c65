// ============================================
// File: crates/skylane-relay/src/services/mod.rs
// ============================================
//! # Services Module
//!
//! ## Creation Reason
//! State and authorities that the packet handlers build on.
//!
//! ## Main Functionality
//! - [`session`]: double-buffered session table
//! - [`auth`]: connect-token minting and session-token renewal
//!
//! ## Last Modified
//! v0.1.0 - Initial services

pub mod auth;
pub mod session;

pub use auth::{Authority, SessionTokenBlob, Terms, TokenRefresher};
pub use session::SessionTable;
