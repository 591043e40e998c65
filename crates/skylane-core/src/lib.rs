// ============================================
// File: crates/skylane-core/src/lib.rs
// ============================================
//! # Skylane Core - Protocol Engine
//!
//! ## Creation Reason
//! Holds everything about the relay protocol that does not touch a socket:
//! packet layouts, the obfuscation filter, the cryptographic envelope,
//! tokens, the reliability window and bandwidth accounting. Keeping it
//! I/O-free makes every rule testable in isolation.
//!
//! ## Main Functionality
//!
//! ### Protocol Module ([`protocol`])
//! - Address encoding, chonkle / pittle filter, packet layouts
//!
//! ### Crypto Module ([`crypto`])
//! - X25519 keys, HKDF-SHA256 purposes, ChaCha20-Poly1305 envelope
//!
//! ### Token Module ([`token`])
//! - Connect, session and challenge tokens
//!
//! ### [`reliability`] and [`bandwidth`]
//! - Sequence/ack bookkeeping and per-session envelope limits
//!
//! ## Crate Graph
//! ```text
//! skylane-relay ──► skylane-core ──► skylane-common
//!       │            (you are here)
//!       └─────────► skylane-transport
//! ```
//!
//! ## Security Guarantees
//! - **Confidentiality**: ChaCha20-Poly1305 on the client hop
//! - **Integrity**: header fields are bound as associated data
//! - **Replay Protection**: sequence windows drop duplicates
//!
//! ## ⚠️ Important Note for Next Developer
//! - NEVER implement custom crypto primitives
//! - Nonces come from sequences; a sequence must never be reused per key
//!
//! ## Last Modified
//! v0.1.0 - Initial implementation

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod bandwidth;
pub mod crypto;
pub mod error;
pub mod protocol;
pub mod reliability;
pub mod token;

// Re-export commonly used items
pub use bandwidth::BandwidthLimiter;
pub use crypto::{Direction, Envelope, KeyPair, PrivateKey, PublicKey, Purpose};
pub use error::{CoreError, Result};
pub use protocol::{Address, PacketFilter, PacketType, PayloadHeader};
pub use reliability::{ReceiveOutcome, Reliability};
pub use token::{ChallengeToken, ConnectToken, SessionToken};
