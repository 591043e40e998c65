// ============================================
// File: crates/skylane-core/src/token/mod.rs
// ============================================
//! # Token System
//!
//! ## Creation Reason
//! Three tokens move authority between the roles:
//!
//! | Token | Minted by | Readable by | Carried in |
//! |-------|-----------|-------------|------------|
//! | Connect | auth | client | out of band (base64) |
//! | Session | auth | auth, gateway | every upstream/downstream packet |
//! | Challenge | gateway | gateway, client | challenge packets, then upstream |
//!
//! ## Main Functionality
//! - [`session`]: session id + lease, renewal rules
//! - [`challenge`]: gateway-issued rehandshake proof
//! - [`connect`]: the client's bootstrap capability
//!
//! ## ⚠️ Important Note for Next Developer
//! - The lifetimes below are protocol constants; auth, gateway and client
//!   must agree on them
//! - Expiry checks go through `skylane_common::time::is_expired`
//!
//! ## Last Modified
//! v0.1.0 - Initial token system

pub mod challenge;
pub mod connect;
pub mod session;

pub use challenge::{ChallengeToken, ENCRYPTED_CHALLENGE_TOKEN_BYTES};
pub use connect::{ConnectToken, CONNECT_TOKEN_BYTES};
pub use session::{SessionToken, ENCRYPTED_SESSION_TOKEN_BYTES};

// ============================================
// Lifetimes
// ============================================

/// Connect token lifetime.
pub const CONNECT_TOKEN_EXPIRE_SECONDS: u64 = 30;

/// Initial session token lifetime.
pub const SESSION_TOKEN_EXPIRE_SECONDS: u64 = 30;

/// Renewal is accepted only while at most this much lifetime remains.
pub const SESSION_TOKEN_RENEW_WINDOW_SECONDS: u64 = 10;

/// Lifetime added by each renewal.
pub const SESSION_TOKEN_EXTENSION_SECONDS: u64 = 10;

/// Challenge token lifetime.
pub const CHALLENGE_TOKEN_EXPIRE_SECONDS: u64 = 2;
