// ============================================
// File: crates/skylane-common/src/lib.rs
// ============================================
//! # Skylane Common
//!
//! ## Creation Reason
//! The gateway, server, client and auth roles must agree on two things
//! before any packet is parsed: who a client is and what time it is. Both
//! live here so the protocol crate and the runtime share one definition.
//!
//! ## Main Functionality
//! - [`types`]: `SessionId`, the client's long-lived public key
//! - [`time`]: Unix timestamps and the lock-free `AtomicInstant`
//! - [`error`]: base64 decoding shared by keys, tokens and magic values
//!
//! ## Crate Graph
//! ```text
//! skylane-relay ──► skylane-core ──► skylane-common
//!       │
//!       └─────────► skylane-transport
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - Token expiry everywhere goes through `time::is_expired`; do not
//!   compare timestamps by hand
//!
//! ## Last Modified
//! v0.1.0 - Initial implementation

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod time;
pub mod types;

// Re-export commonly used items at crate root
pub use error::{decode_base64_array, encode_base64, CommonError, Result};
pub use types::{SessionId, SESSION_ID_SIZE};
