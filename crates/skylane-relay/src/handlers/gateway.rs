// ============================================
// File: crates/skylane-relay/src/handlers/gateway.rs
// ============================================
//! # Gateway Packet Handler
//!
//! ## Creation Reason
//! The gateway terminates client encryption and forwards payloads to the
//! server in the clear, then seals the server's responses for the client.
//! This module is the per-packet logic only; sockets live in the runtime.
//!
//! ## Main Functionality
//! - `GatewayContext`: immutable state shared by all workers
//! - `GatewayHandler`: one per worker, owns that worker's session table
//!
//! ## Packet Processing
//!
//! ### Client → Server
//! ```text
//! 1. Filter tags (client address → public address)
//! 2. Open session token, check it names this session and is live
//! 3. Open payload region (Upstream)
//! 4. Session lookup / creation, replay check
//! 5. Adopt newer session token
//! 6. Address or gateway changed? Valid challenge attached migrates the
//!    session, otherwise answer with a Challenge and drop the payload
//! 7. Forward as relay packet (internal address → server)
//! ```
//!
//! ### Server → Client
//! ```text
//! 1. Filter tags (server → internal address)
//! 2. Session lookup, downstream dedup
//! 3. Bandwidth check (down kbps of the session token)
//! 4. Seal (Downstream) with the freshest session token attached
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - The downstream nonce is the server's sequence; the dedup window is
//!   what stops a reseeded server session from reusing one
//! - Nothing here may await; the worker loop is the only suspension point
//!
//! ## Last Modified
//! v0.1.0 - Initial gateway handler

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use tracing::{debug, info, trace};

use skylane_common::time::unix_timestamp_nanos;
use skylane_common::SessionId;
use skylane_core::bandwidth::{kbps_to_bits_per_second, wire_bits, BandwidthLimiter};
use skylane_core::crypto::{Direction, Envelope, KeyPair, PublicKey, Purpose};
use skylane_core::protocol::messages::FLAG_CHALLENGE_TOKEN;
use skylane_core::protocol::{
    packet_type, Address, ChallengePacket, ClientPacket, ClientPacketPrefix, PacketFilter, PacketType,
    RelayPacket, MAX_PACKET_BYTES,
};
use skylane_core::reliability::ReceiveWindow;
use skylane_core::token::{
    ChallengeToken, SessionToken, CHALLENGE_TOKEN_EXPIRE_SECONDS, ENCRYPTED_CHALLENGE_TOKEN_BYTES,
};
use skylane_core::CoreError;

use super::{Outbound, Route};
use crate::config::RelayConfig;
use crate::error::{RelayError, Result};
use crate::services::{SessionTable, SessionTokenBlob};

// ============================================
// GatewayContext
// ============================================

/// Gateway state shared by every worker.
pub struct GatewayContext {
    gateway_id: u64,
    keys: KeyPair,
    session_token_envelope: Envelope,
    filter: PacketFilter,
    public_address: Address,
    server_address: SocketAddr,
    server_tag: Address,
    rotation: Duration,
    challenge_sequence: AtomicU64,
}

impl GatewayContext {
    /// Creates the context.
    ///
    /// # Errors
    /// `Core(KeyDerivation)` if the auth public key is unusable.
    pub fn new(
        gateway_id: u64,
        keys: KeyPair,
        auth_public_key: &PublicKey,
        filter: PacketFilter,
        public_address: SocketAddr,
        server_address: SocketAddr,
        rotation: Duration,
    ) -> Result<Self> {
        let session_token_envelope = Envelope::new(keys.private_key(), auth_public_key, Purpose::SessionToken)?;
        Ok(Self {
            gateway_id,
            keys,
            session_token_envelope,
            filter,
            public_address: Address::from(public_address),
            server_address,
            server_tag: Address::from(server_address),
            rotation,
            challenge_sequence: AtomicU64::new(unix_timestamp_nanos()),
        })
    }

    /// Creates the context from configuration.
    ///
    /// # Errors
    /// Configuration errors for missing or malformed keys and magic.
    pub fn from_config(config: &RelayConfig) -> Result<Self> {
        Self::new(
            config.gateway.gateway_id,
            config.gateway_keys()?,
            &config.auth_public_key()?,
            config.filter()?,
            config.network.gateway_address,
            config.network.server_address,
            Duration::from_secs(config.gateway.session_rotation_seconds),
        )
    }

    /// This gateway's id.
    #[must_use]
    pub const fn gateway_id(&self) -> u64 {
        self.gateway_id
    }

    /// Where relay packets are sent.
    #[must_use]
    pub const fn server_address(&self) -> SocketAddr {
        self.server_address
    }

    fn next_challenge_sequence(&self) -> u64 {
        self.challenge_sequence.fetch_add(1, Ordering::Relaxed)
    }

    fn challenge_envelope(&self, session_id: &SessionId) -> Result<Envelope> {
        Ok(Envelope::new(
            self.keys.private_key(),
            &PublicKey::from(*session_id),
            Purpose::ChallengeToken,
        )?)
    }

    fn verify_challenge(
        &self,
        session_id: &SessionId,
        blob: &[u8; ENCRYPTED_CHALLENGE_TOKEN_BYTES],
        now: u64,
    ) -> Result<()> {
        let envelope = self.challenge_envelope(session_id)?;
        let (_, token) = ChallengeToken::decrypt(&envelope, blob)?;
        token.validate(self.gateway_id, now)?;
        Ok(())
    }
}

impl std::fmt::Debug for GatewayContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayContext")
            .field("gateway_id", &self.gateway_id)
            .field("public_address", &self.public_address)
            .field("server_address", &self.server_address)
            .finish_non_exhaustive()
    }
}

// ============================================
// GatewaySession
// ============================================

struct GatewaySession {
    client_address: SocketAddr,
    envelope: Envelope,
    upstream: ReceiveWindow,
    downstream: ReceiveWindow,
    limiter: BandwidthLimiter,
    session_token: SessionTokenBlob,
    session_token_sequence: u64,
}

impl GatewaySession {
    fn new(client_address: SocketAddr, envelope: Envelope, token: &SessionToken, prefix: &ClientPacketPrefix) -> Self {
        Self {
            client_address,
            envelope,
            upstream: ReceiveWindow::new(prefix.sequence),
            downstream: ReceiveWindow::new(0),
            limiter: BandwidthLimiter::from_kbps(token.envelope_down_kbps),
            session_token: prefix.session_token,
            session_token_sequence: prefix.session_token_sequence,
        }
    }
}

// ============================================
// GatewayHandler
// ============================================

/// Per-worker gateway packet logic.
pub struct GatewayHandler {
    ctx: Arc<GatewayContext>,
    internal_address: Address,
    sessions: SessionTable<GatewaySession>,
    out: BytesMut,
}

impl GatewayHandler {
    /// Creates a handler whose server-facing socket is `internal_address`.
    #[must_use]
    pub fn new(ctx: Arc<GatewayContext>, internal_address: SocketAddr) -> Self {
        let sessions = SessionTable::new(ctx.rotation);
        Self {
            ctx,
            internal_address: Address::from(internal_address),
            sessions,
            out: BytesMut::with_capacity(MAX_PACKET_BYTES),
        }
    }

    /// Live sessions on this worker.
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Handles a datagram from a client. `data` is decrypted in place.
    ///
    /// # Errors
    /// Drop errors for anything the packet got wrong; `Invariant` if the
    /// session table misbehaves.
    pub fn handle_client(&mut self, data: &mut [u8], src: SocketAddr, now: u64) -> Result<Option<Outbound<'_>>> {
        let Self {
            ctx,
            internal_address,
            sessions,
            out,
        } = self;
        sessions.maybe_rotate();

        let from = Address::from(src);
        if !ctx.filter.accepts(data, &from, &ctx.public_address) {
            return Err(CoreError::FilterRejected.into());
        }
        if packet_type(data)? != PacketType::Payload {
            return Err(RelayError::dropped("challenge packet sent to gateway"));
        }

        let prefix = ClientPacket::peek(data)?;
        let session_id = prefix.session_id;
        let token = SessionToken::decrypt(
            &ctx.session_token_envelope,
            prefix.session_token_sequence,
            &prefix.session_token,
        )?;
        token.validate(&session_id, now)?;

        let envelope = match sessions.peek(&session_id) {
            Some(session) => session.envelope.clone(),
            None => Envelope::new(ctx.keys.private_key(), &PublicKey::from(session_id), Purpose::Packet)?,
        };
        let packet = ClientPacket::open(data, &envelope, Direction::Upstream)?;

        if !sessions.contains(&session_id) {
            sessions.insert(session_id, GatewaySession::new(src, envelope, &token, &prefix));
            info!(session_id = %session_id, client = %src, "Gateway session created");
        }
        let session = sessions
            .get_mut(&session_id)
            .ok_or_else(|| RelayError::invariant("gateway session missing after insert"))?;

        if !session.upstream.receive(prefix.sequence).is_fresh() {
            return Err(RelayError::dropped("replayed or stale upstream sequence"));
        }

        if prefix.session_token_sequence > session.session_token_sequence {
            session.session_token = prefix.session_token;
            session.session_token_sequence = prefix.session_token_sequence;
            session
                .limiter
                .set_bits_per_second(kbps_to_bits_per_second(token.envelope_down_kbps));
            debug!(
                session_id = %session_id,
                sequence = prefix.session_token_sequence,
                "Adopted renewed session token"
            );
        }

        let foreign_gateway = packet.header.gateway_id != 0 && packet.header.gateway_id != ctx.gateway_id;
        let needs_challenge = session.client_address != src || foreign_gateway;
        let proven = packet
            .challenge_token
            .as_ref()
            .is_some_and(|blob| ctx.verify_challenge(&session_id, blob, now).is_ok());

        if proven {
            if session.client_address != src {
                info!(
                    session_id = %session_id,
                    from = %session.client_address,
                    to = %src,
                    "Session migrated after challenge"
                );
                session.client_address = src;
            }
        } else if needs_challenge {
            let sequence = ctx.next_challenge_sequence();
            let challenge = ChallengeToken {
                gateway_id: ctx.gateway_id,
                expire_timestamp: now + CHALLENGE_TOKEN_EXPIRE_SECONDS,
            };
            let blob = challenge.encrypt(&ctx.challenge_envelope(&session_id)?, sequence)?;
            ChallengePacket {
                session_id,
                challenge_token: blob,
            }
            .write(out, &ctx.filter, &ctx.public_address, &from)?;

            debug!(session_id = %session_id, client = %src, sequence, "Issued challenge");
            return Ok(Some(Outbound {
                dest: src,
                route: Route::Public,
                bytes: &out[..],
            }));
        }

        let mut header = packet.header;
        header.gateway_id = ctx.gateway_id;
        header.flags &= !FLAG_CHALLENGE_TOKEN;
        RelayPacket {
            gateway_address: *internal_address,
            client_address: from,
            session_id,
            sequence: prefix.sequence,
            header,
            payload: packet.payload,
        }
        .write(out, &ctx.filter, internal_address, &ctx.server_tag)?;

        trace!(session_id = %session_id, sequence = prefix.sequence, "Forwarded upstream");
        Ok(Some(Outbound {
            dest: ctx.server_address,
            route: Route::Internal,
            bytes: &out[..],
        }))
    }

    /// Handles a relay packet from the server.
    ///
    /// Returns `Ok(None)` when the session's downstream budget is spent.
    ///
    /// # Errors
    /// Drop errors for unknown sessions, duplicates and bad packets.
    pub fn handle_server(&mut self, data: &[u8], src: SocketAddr, now: u64) -> Result<Option<Outbound<'_>>> {
        let Self {
            ctx,
            internal_address,
            sessions,
            out,
        } = self;

        if !ctx.filter.accepts(data, &Address::from(src), internal_address) {
            return Err(CoreError::FilterRejected.into());
        }
        let packet = RelayPacket::decode(data)?;
        let session = sessions
            .get_mut(&packet.session_id)
            .ok_or(RelayError::dropped("response for unknown session"))?;

        if !session.downstream.receive(packet.sequence).is_fresh() {
            return Err(RelayError::dropped("replayed or stale downstream sequence"));
        }

        let mut header = packet.header;
        header.gateway_id = ctx.gateway_id;
        let reply = ClientPacket {
            prefix: ClientPacketPrefix {
                session_token: session.session_token,
                session_token_sequence: session.session_token_sequence,
                session_id: packet.session_id,
                sequence: packet.sequence,
            },
            header,
            challenge_token: None,
            payload: packet.payload,
        };

        if !session.limiter.try_consume(wire_bits(reply.encoded_len()), now) {
            trace!(session_id = %packet.session_id, "Downstream choked");
            return Ok(None);
        }

        let client = Address::from(session.client_address);
        reply.write(
            out,
            &session.envelope,
            Direction::Downstream,
            &ctx.filter,
            &ctx.public_address,
            &client,
        )?;

        Ok(Some(Outbound {
            dest: session.client_address,
            route: Route::Public,
            bytes: &out[..],
        }))
    }
}

impl std::fmt::Debug for GatewayHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayHandler")
            .field("internal_address", &self.internal_address)
            .field("sessions", &self.sessions.len())
            .finish_non_exhaustive()
    }
}

// ============================================
// Tests
// ============================================
