// ============================================
// File: crates/skylane-core/src/protocol/mod.rs
// ============================================
//! # Protocol Module
//!
//! ## Creation Reason
//! Defines the wire protocol of the relay: addresses, the obfuscation
//! filter, the payload header and the three packet layouts.
//!
//! ## Main Functionality
//!
//! ### Submodules
//! - [`codec`]: bounds-checked reader and the `Codec` trait
//! - [`address`]: tagged endpoint encoding
//! - [`filter`]: chonkle / pittle obfuscation tags
//! - [`messages`]: packet types, constants, `PayloadHeader`
//! - [`packet`]: client hop, challenge and relay hop packets
//!
//! ## Protocol Overview
//! ```text
//! ┌────────┐  payload (sealed)  ┌─────────┐  payload (clear) ┌────────┐
//! │ Client │ ─────────────────► │ Gateway │ ───────────────► │ Server │
//! │        │ ◄───────────────── │         │ ◄─────────────── │        │
//! └────────┘  payload/challenge └─────────┘  payload         └────────┘
//! ```
//!
//! ## Wire Format Principles
//! - Little-endian byte order for multi-byte integers
//! - Every packet starts with version, type and chonkle, ends with pittle
//! - No padding or alignment requirements
//!
//! ## ⚠️ Important Note for Next Developer
//! - ANY layout change requires a `PROTOCOL_VERSION` bump
//! - The filter vectors in `filter` tests must never change
//!
//! ## Last Modified
//! v0.1.0 - Initial protocol definitions

pub mod address;
pub mod codec;
pub mod filter;
pub mod messages;
pub mod packet;

// Re-export primary types
pub use address::Address;
pub use codec::{Codec, Reader};
pub use filter::PacketFilter;
pub use messages::{PacketType, PayloadHeader, MAX_PACKET_BYTES, PROTOCOL_VERSION};
pub use packet::{
    packet_type, ChallengePacket, ClientPacket, ClientPacketPrefix, RelayPacket,
    CHALLENGE_PACKET_BYTES, CLIENT_PACKET_OVERHEAD, MAX_CLIENT_PAYLOAD_BYTES,
};
