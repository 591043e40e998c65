// ============================================
// File: crates/skylane-relay/src/handlers/server.rs
// ============================================
//! # Server Packet Handler
//!
//! ## Creation Reason
//! The server end of the relay: one reliability state per client session,
//! fed by relay packets from gateways. Responses echo the payload back
//! through the gateway worker that sent it.
//!
//! ## Main Functionality
//! - `ServerContext`: immutable state shared by all workers
//! - `ServerHandler`: one per worker, owns that worker's session table
//!
//! ## ⚠️ Important Note for Next Developer
//! - A new session is seeded from the first packet: sending continues
//!   after the client's `ack`, receiving starts at its sequence
//! - An evicted and reseeded session may resend sequences the gateway has
//!   already seen; the gateway drops those
//!
//! ## Last Modified
//! v0.1.0 - Initial server handler

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use tracing::{debug, trace};

use skylane_core::bandwidth::{wire_bits, BandwidthLimiter};
use skylane_core::protocol::{Address, PacketFilter, PayloadHeader, RelayPacket, MAX_PACKET_BYTES};
use skylane_core::{CoreError, Reliability};

use super::{Outbound, Route};
use crate::config::RelayConfig;
use crate::error::{RelayError, Result};
use crate::services::SessionTable;

// ============================================
// ServerContext
// ============================================

/// Server state shared by every worker.
#[derive(Debug)]
pub struct ServerContext {
    server_id: u64,
    filter: PacketFilter,
    address: Address,
    bandwidth_kbps: u32,
    rotation: Duration,
}

impl ServerContext {
    /// Creates the context. `address` must be the address gateways send to.
    #[must_use]
    pub fn new(
        server_id: u64,
        filter: PacketFilter,
        address: SocketAddr,
        bandwidth_kbps: u32,
        rotation: Duration,
    ) -> Self {
        Self {
            server_id,
            filter,
            address: Address::from(address),
            bandwidth_kbps,
            rotation,
        }
    }

    /// Creates the context from configuration.
    ///
    /// # Errors
    /// `ConfigInvalid` for a malformed filter magic.
    pub fn from_config(config: &RelayConfig) -> Result<Self> {
        Ok(Self::new(
            config.server.server_id,
            config.filter()?,
            config.network.server_address,
            config.server.bandwidth_kbps,
            Duration::from_secs(config.server.session_rotation_seconds),
        ))
    }
}

// ============================================
// ServerSession
// ============================================

struct ServerSession {
    reliability: Reliability,
    limiter: BandwidthLimiter,
}

// ============================================
// ServerHandler
// ============================================

/// Per-worker server packet logic.
pub struct ServerHandler {
    ctx: Arc<ServerContext>,
    sessions: SessionTable<ServerSession>,
    out: BytesMut,
    acked_payloads: u64,
}

impl ServerHandler {
    /// Creates a handler.
    #[must_use]
    pub fn new(ctx: Arc<ServerContext>) -> Self {
        let sessions = SessionTable::new(ctx.rotation);
        Self {
            ctx,
            sessions,
            out: BytesMut::with_capacity(MAX_PACKET_BYTES),
            acked_payloads: 0,
        }
    }

    /// Live sessions on this worker.
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Payloads the clients have confirmed so far.
    #[must_use]
    pub const fn acked_payloads(&self) -> u64 {
        self.acked_payloads
    }

    /// Handles a relay packet from a gateway.
    ///
    /// Returns `Ok(None)` when the session's budget for this second is
    /// spent.
    ///
    /// # Errors
    /// Drop errors for bad or duplicate packets; `Core(SequenceExhausted)`
    /// when a session has used up its sequence space.
    pub fn handle(&mut self, data: &[u8], src: SocketAddr, now: u64) -> Result<Option<Outbound<'_>>> {
        let Self {
            ctx,
            sessions,
            out,
            acked_payloads,
        } = self;
        sessions.maybe_rotate();

        if !ctx.filter.accepts(data, &Address::from(src), &ctx.address) {
            return Err(CoreError::FilterRejected.into());
        }
        let packet = RelayPacket::decode(data)?;
        let dest = packet
            .gateway_address
            .to_socket_addr()
            .ok_or(RelayError::dropped("relay packet without gateway address"))?;

        let session_id = packet.session_id;
        let session = sessions.get_or_insert_with(session_id, || {
            debug!(session_id = %session_id, gateway = %dest, "Server session created");
            ServerSession {
                reliability: Reliability::seeded(packet.header.ack, packet.sequence),
                limiter: BandwidthLimiter::from_kbps(ctx.bandwidth_kbps),
            }
        });

        if !session.reliability.receive(packet.sequence).is_fresh() {
            return Err(RelayError::dropped("replayed or stale sequence"));
        }
        for (sequence, payload_id) in session
            .reliability
            .process_acks(packet.header.ack, &packet.header.ack_bits)
        {
            trace!(session_id = %session_id, sequence, ?payload_id, "Delivered");
            if payload_id.is_some() {
                *acked_payloads += 1;
            }
        }

        let reply_len = packet.encoded_len();
        if !session.limiter.try_consume(wire_bits(reply_len), now) {
            trace!(session_id = %session_id, "Response choked");
            return Ok(None);
        }

        let payload_id = packet
            .payload
            .get(..8)
            .and_then(|b| <[u8; 8]>::try_from(b).ok())
            .map(u64::from_le_bytes);
        let sequence = session.reliability.next_send(payload_id)?;
        let (ack, ack_bits) = session.reliability.ack_fields();

        RelayPacket {
            gateway_address: packet.gateway_address,
            client_address: packet.client_address,
            session_id,
            sequence,
            header: PayloadHeader {
                ack,
                ack_bits,
                gateway_id: packet.header.gateway_id,
                server_id: ctx.server_id,
                inner_type: packet.header.inner_type,
                flags: 0,
            },
            payload: packet.payload,
        }
        .write(out, &ctx.filter, &ctx.address, &packet.gateway_address)?;

        Ok(Some(Outbound {
            dest,
            route: Route::Public,
            bytes: &out[..],
        }))
    }
}

impl std::fmt::Debug for ServerHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerHandler")
            .field("sessions", &self.sessions.len())
            .field("acked_payloads", &self.acked_payloads)
            .finish_non_exhaustive()
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;
    use skylane_common::SessionId;
    use skylane_core::reliability::ReceiveWindow;

    const NOW: u64 = 1_700_000_000;
    const MAGIC: [u8; 8] = [1, 2, 3, 4, 5, 6, 7, 8];

    fn addr(text: &str) -> SocketAddr {
        text.parse().unwrap()
    }

    fn server(kbps: u32) -> ServerHandler {
        let ctx = ServerContext::new(
            9,
            PacketFilter::new(MAGIC),
            addr("10.0.0.2:30000"),
            kbps,
            Duration::from_secs(60),
        );
        ServerHandler::new(Arc::new(ctx))
    }

    fn from_gateway(sequence: u64, ack: u64, ack_bits: [u8; 32], payload: &[u8]) -> Vec<u8> {
        let packet = RelayPacket {
            gateway_address: Address::from(addr("10.0.0.1:45000")),
            client_address: Address::from(addr("192.168.1.10:50000")),
            session_id: SessionId::from_array([4; 32]),
            sequence,
            header: PayloadHeader {
                ack,
                ack_bits,
                gateway_id: 7,
                ..PayloadHeader::default()
            },
            payload,
        };
        let mut out = BytesMut::new();
        packet
            .write(
                &mut out,
                &PacketFilter::new(MAGIC),
                &Address::from(addr("10.0.0.1:45000")),
                &Address::from(addr("10.0.0.2:30000")),
            )
            .unwrap();
        out.to_vec()
    }

    #[test]
    fn test_echo_creates_session() {
        let mut handler = server(1024);
        let data = from_gateway(5, 0, [0; 32], &42u64.to_le_bytes());

        let out = handler.handle(&data, addr("10.0.0.1:45000"), NOW).unwrap().unwrap();
        assert_eq!(out.dest, addr("10.0.0.1:45000"));
        let reply = RelayPacket::decode(out.bytes).unwrap();
        assert_eq!(reply.sequence, 1);
        assert_eq!(reply.header.ack, 5);
        assert_eq!(reply.header.server_id, 9);
        assert_eq!(reply.header.gateway_id, 7);
        assert_eq!(reply.payload, &42u64.to_le_bytes());
        assert_eq!(handler.session_count(), 1);
    }

    #[test]
    fn test_duplicate_dropped() {
        let mut handler = server(1024);
        let data = from_gateway(5, 0, [0; 32], b"12345678");
        handler.handle(&data, addr("10.0.0.1:45000"), NOW).unwrap();
        let err = handler.handle(&data, addr("10.0.0.1:45000"), NOW).unwrap_err();
        assert!(err.is_drop());
    }

    #[test]
    fn test_acks_map_to_payload_ids() {
        let mut handler = server(1024);
        let first = from_gateway(1, 0, [0; 32], &7u64.to_le_bytes());
        let out = handler.handle(&first, addr("10.0.0.1:45000"), NOW).unwrap().unwrap();
        let sent = RelayPacket::decode(out.bytes).unwrap().sequence;

        // The client acknowledges the reply.
        let mut window = ReceiveWindow::new(0);
        window.receive(sent);
        let second = from_gateway(2, window.sequence(), window.ack_bits(), &8u64.to_le_bytes());
        handler.handle(&second, addr("10.0.0.1:45000"), NOW).unwrap();
        assert_eq!(handler.acked_payloads(), 1);
    }

    #[test]
    fn test_bandwidth_choke() {
        // 1 kbps covers no packet of this size
        let mut handler = server(1);
        let data = from_gateway(1, 0, [0; 32], &[0u8; 200]);
        assert!(handler.handle(&data, addr("10.0.0.1:45000"), NOW).unwrap().is_none());
    }

    #[test]
    fn test_wrong_source_rejected() {
        let mut handler = server(1024);
        let data = from_gateway(1, 0, [0; 32], b"12345678");
        let err = handler.handle(&data, addr("10.0.0.1:45001"), NOW).unwrap_err();
        assert!(matches!(err, RelayError::Core(CoreError::FilterRejected)));
    }
}
