// ============================================
// File: crates/skylane-core/src/crypto/mod.rs
// ============================================
//! # Cryptography Module
//!
//! ## Creation Reason
//! Centralizes the relay's cryptographic envelope on audited RustCrypto
//! implementations.
//!
//! ## Main Functionality
//!
//! ### Submodules
//! - [`keys`]: X25519 `PrivateKey` / `PublicKey` / `KeyPair`
//! - [`kdf`]: HKDF-SHA256 derivation of per-purpose envelope keys
//! - [`envelope`]: ChaCha20-Poly1305 sealing with sequence-derived nonces
//!
//! ## Cryptographic Design
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  sender private ─┐                                          │
//! │                  ├─► X25519 ─► HKDF-SHA256(purpose) ─► key  │
//! │  peer public ────┘                                          │
//! │                                                             │
//! │  key + nonce(sequence, direction) ─► ChaCha20-Poly1305      │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! The pair of roles is symmetric: gateway(private) with client(public)
//! derives the same key as client(private) with gateway(public). A
//! direction bit in the nonce keeps the two streams apart.
//!
//! ## ⚠️ Important Note for Next Developer
//! - ALL implementations use RustCrypto (audited)
//! - NEVER roll your own crypto
//! - A (key, nonce) pair must never be used twice; see `envelope`
//!
//! ## Last Modified
//! v0.1.0 - Initial crypto implementation

pub mod envelope;
pub mod kdf;
pub mod keys;

// Re-export primary types at module level
pub use envelope::{Direction, Envelope, Purpose};
pub use keys::{KeyPair, PrivateKey, PublicKey};

// ============================================
// Constants
// ============================================

/// Size of X25519 keys in bytes.
pub const KEY_SIZE: usize = 32;

/// Size of ChaCha20-Poly1305 nonce in bytes.
pub const NONCE_SIZE: usize = 12;

/// Size of Poly1305 authentication tag in bytes.
pub const MAC_BYTES: usize = 16;

/// HKDF salt for envelope key derivation.
pub const HKDF_SALT: &[u8] = b"skylane-v1";
