// ============================================
// File: crates/skylane-relay/src/client/mod.rs
// ============================================
//! # Relay Client
//!
//! ## Creation Reason
//! A traffic-generating client: it connects through a gateway with a
//! connect token, sends one payload per tick and tracks what the server
//! acknowledges.
//!
//! ## Main Functionality
//! - `Client`: binds, runs the tasks below, stops on Ctrl+C, on
//!   [`Client::shutdown`] or when its session token lapses
//! - [`state`]: the synchronous connection state machine
//!
//! ## Task Layout
//! ```text
//! ┌────────────┐   tick   ┌─────────────────────────────┐
//! │ send task  │ ───────► │ RwLock<ClientSession>       │
//! └────────────┘          │  state, reliability, tokens │
//! ┌────────────┐  bounded │  gateway / server ids       │
//! │ recv task  │ ──mpsc─► │                             │
//! └────────────┘  ┌─────► └─────────────────────────────┘
//!   state task ───┘  refresh task (optional) ──┘
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - The mpsc queue is the only backpressure point; a full queue stalls
//!   the receive task on purpose
//! - Queued datagrams are abandoned on shutdown
//!
//! ## Last Modified
//! v0.1.0 - Initial client

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use parking_lot::RwLock;
use tokio::sync::{broadcast, mpsc};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace, warn};

use skylane_common::time::{unix_timestamp, AtomicInstant};
use skylane_common::SessionId;
use skylane_core::bandwidth::wire_bits;
use skylane_core::crypto::{Direction, Envelope, Purpose};
use skylane_core::protocol::{
    packet_type, Address, ChallengePacket, ClientPacket, ClientPacketPrefix, PacketFilter, PacketType,
    CLIENT_PACKET_OVERHEAD, MAX_PACKET_BYTES,
};
use skylane_core::token::{ChallengeToken, ConnectToken, ENCRYPTED_CHALLENGE_TOKEN_BYTES};
use skylane_core::CoreError;
use skylane_transport::{SocketOptions, Transport, UdpTransport};

use crate::config::RelayConfig;
use crate::error::{RelayError, Result};
use crate::runtime::{join_workers, wait_for_shutdown, RECV_BUFFER_BYTES};
use crate::services::TokenRefresher;

pub mod state;

pub use state::{ClientSession, ConnectionState};

/// Bytes at the start of every payload that carry its id.
pub const PAYLOAD_ID_BYTES: usize = 8;

const REFRESH_INTERVAL: Duration = Duration::from_secs(1);

// ============================================
// ClientStats
// ============================================

/// Counters updated by the client tasks.
#[derive(Debug, Default)]
pub struct ClientStats {
    /// Payload packets sent
    pub sent: AtomicU64,
    /// Payload packets received and accepted
    pub received: AtomicU64,
    /// Sends skipped for lack of upstream budget
    pub choked: AtomicU64,
    /// Challenges accepted
    pub challenges: AtomicU64,
    /// Payload ids the server confirmed
    pub delivered: AtomicU64,
    /// Last accepted payload
    pub last_received: AtomicInstant,
}

impl ClientStats {
    fn bump(counter: &AtomicU64, by: u64) {
        counter.fetch_add(by, Ordering::Relaxed);
    }

    /// Reads a counter.
    #[must_use]
    pub fn get(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }
}

// ============================================
// Client
// ============================================

/// The client role.
pub struct Client {
    token: ConnectToken,
    filter: PacketFilter,
    bind_address: SocketAddr,
    payload_bytes: usize,
    queue_capacity: usize,
    session: Arc<RwLock<ClientSession>>,
    stats: Arc<ClientStats>,
    refresher: Option<Arc<dyn TokenRefresher>>,
    lapsed: Arc<AtomicBool>,
    shutdown_tx: broadcast::Sender<()>,
}

impl Client {
    /// Creates a client.
    ///
    /// # Errors
    /// - `Core(TokenExpired)` if the connect token is already expired
    /// - `ConfigInvalid` if `payload_bytes` cannot hold a payload id or
    ///   does not fit in a packet
    pub fn new(
        token: ConnectToken,
        filter: PacketFilter,
        bind_address: SocketAddr,
        payload_bytes: usize,
        queue_capacity: usize,
    ) -> Result<Self> {
        let now = unix_timestamp();
        if token.is_expired(now) {
            return Err(CoreError::expired(token.expire_timestamp, now).into());
        }
        if payload_bytes < PAYLOAD_ID_BYTES
            || CLIENT_PACKET_OVERHEAD + ENCRYPTED_CHALLENGE_TOKEN_BYTES + payload_bytes > MAX_PACKET_BYTES
        {
            return Err(RelayError::config_invalid("client.payload_bytes", "out of range"));
        }

        let session = Arc::new(RwLock::new(ClientSession::new(&token)));
        let (shutdown_tx, _) = broadcast::channel(1);
        Ok(Self {
            token,
            filter,
            bind_address,
            payload_bytes,
            queue_capacity: queue_capacity.max(1),
            session,
            stats: Arc::new(ClientStats::default()),
            refresher: None,
            lapsed: Arc::new(AtomicBool::new(false)),
            shutdown_tx,
        })
    }

    /// Creates a client from configuration.
    ///
    /// # Errors
    /// Configuration errors, or see [`Client::new`].
    pub fn from_config(config: &RelayConfig) -> Result<Self> {
        Self::new(
            config.connect_token()?,
            config.filter()?,
            config.network.client_address,
            config.client.payload_bytes,
            config.client.queue_capacity,
        )
    }

    /// Renews the session token through `refresher` before it lapses.
    #[must_use]
    pub fn with_refresher(mut self, refresher: Arc<dyn TokenRefresher>) -> Self {
        self.refresher = Some(refresher);
        self
    }

    /// The session id (client public key).
    #[must_use]
    pub fn session_id(&self) -> SessionId {
        self.token.client_keys.public_key().session_id()
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.session.read().state()
    }

    /// Shared counters.
    #[must_use]
    pub fn stats(&self) -> &ClientStats {
        &self.stats
    }

    /// `true` if the client stopped because its session token lapsed.
    #[must_use]
    pub fn session_lapsed(&self) -> bool {
        self.lapsed.load(Ordering::Acquire)
    }

    /// Triggers shutdown programmatically.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Runs until Ctrl+C, [`Client::shutdown`] or session-token lapse.
    ///
    /// # Errors
    /// `StartupFailed` if the socket cannot be bound; `Core(KeyDerivation)`
    /// if the connect token's keys are unusable.
    pub async fn run(&self) -> Result<()> {
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        let gateway = self
            .token
            .gateway_address
            .to_socket_addr()
            .ok_or_else(|| RelayError::config_invalid("connect_token", "no gateway address"))?;
        let socket = UdpTransport::bind_with(self.bind_address, SocketOptions::default())
            .await
            .map_err(|e| RelayError::startup_failed(format!("client socket: {e}")))?;
        let local = socket.local_addr()?;

        let keys = &self.token.client_keys;
        let link = Arc::new(Link {
            socket,
            filter: self.filter,
            local: Address::from(local),
            gateway,
            gateway_tag: self.token.gateway_address,
            session_id: self.session_id(),
            envelope: Envelope::new(keys.private_key(), &self.token.gateway_public_key, Purpose::Packet)?,
            challenge_envelope: Envelope::new(
                keys.private_key(),
                &self.token.gateway_public_key,
                Purpose::ChallengeToken,
            )?,
            session: Arc::clone(&self.session),
            stats: Arc::clone(&self.stats),
            lapsed: Arc::clone(&self.lapsed),
            shutdown_tx: self.shutdown_tx.clone(),
        });

        let (queue_tx, queue_rx) = mpsc::channel(self.queue_capacity);
        let mut tasks = vec![
            (
                0,
                tokio::spawn(send_loop(
                    Arc::clone(&link),
                    self.token.packets_per_second,
                    self.payload_bytes,
                    self.shutdown_tx.subscribe(),
                )),
            ),
            (
                1,
                tokio::spawn(receive_loop(Arc::clone(&link), queue_tx, self.shutdown_tx.subscribe())),
            ),
            (
                2,
                tokio::spawn(state_loop(Arc::clone(&link), queue_rx, self.shutdown_tx.subscribe())),
            ),
        ];
        if let Some(refresher) = &self.refresher {
            tasks.push((
                3,
                tokio::spawn(refresh_loop(
                    Arc::clone(&link),
                    Arc::clone(refresher),
                    self.shutdown_tx.subscribe(),
                )),
            ));
        }

        info!(
            local = %local,
            gateway = %gateway,
            session_id = %link.session_id,
            user_id = self.token.user_id,
            packets_per_second = self.token.packets_per_second,
            "Client started"
        );

        wait_for_shutdown(&mut shutdown_rx).await;
        let _ = self.shutdown_tx.send(());
        if let Err(e) = link.socket.shutdown().await {
            warn!(error = %e, "Socket shutdown error");
        }
        join_workers("client", tasks).await;

        info!(
            sent = ClientStats::get(&self.stats.sent),
            received = ClientStats::get(&self.stats.received),
            delivered = ClientStats::get(&self.stats.delivered),
            "Client stopped"
        );
        Ok(())
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("session_id", &self.session_id())
            .field("gateway", &self.token.gateway_address)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

// ============================================
// Link (state shared by the tasks)
// ============================================

struct Link {
    socket: UdpTransport,
    filter: PacketFilter,
    local: Address,
    gateway: SocketAddr,
    gateway_tag: Address,
    session_id: SessionId,
    envelope: Envelope,
    challenge_envelope: Envelope,
    session: Arc<RwLock<ClientSession>>,
    stats: Arc<ClientStats>,
    lapsed: Arc<AtomicBool>,
    shutdown_tx: broadcast::Sender<()>,
}

impl Link {
    /// Builds the next payload packet into `out`; `false` when choked.
    fn build_packet(&self, out: &mut BytesMut, payload: &mut [u8], payload_id: u64, now: u64) -> Result<bool> {
        payload[..PAYLOAD_ID_BYTES].copy_from_slice(&payload_id.to_le_bytes());

        let fields = {
            let mut session = self.session.write();
            if session.session_token_lapsed(now) {
                return Err(RelayError::SessionExpired {
                    expire_timestamp: session.session_token_expire(),
                });
            }
            let challenge = if session.has_challenge() {
                ENCRYPTED_CHALLENGE_TOKEN_BYTES
            } else {
                0
            };
            let len = CLIENT_PACKET_OVERHEAD + challenge + payload.len();
            if !session.try_consume(wire_bits(len), now) {
                return Ok(false);
            }
            session.prepare_send(payload_id)?
        };

        ClientPacket {
            prefix: ClientPacketPrefix {
                session_token: fields.session_token,
                session_token_sequence: fields.session_token_sequence,
                session_id: self.session_id,
                sequence: fields.sequence,
            },
            header: fields.header,
            challenge_token: fields.challenge_token,
            payload,
        }
        .write(
            out,
            &self.envelope,
            Direction::Upstream,
            &self.filter,
            &self.local,
            &self.gateway_tag,
        )?;
        Ok(true)
    }

    /// Applies one datagram from the gateway.
    fn process(&self, data: &mut [u8]) -> Result<()> {
        match packet_type(data)? {
            PacketType::Challenge => {
                let packet = ChallengePacket::decode(data)?;
                if packet.session_id != self.session_id {
                    return Err(RelayError::dropped("challenge for another session"));
                }
                let (sequence, token) = ChallengeToken::decrypt(&self.challenge_envelope, &packet.challenge_token)?;
                if !self.session.write().on_challenge(sequence, packet.challenge_token) {
                    return Err(RelayError::dropped("challenge not newer than the held one"));
                }
                ClientStats::bump(&self.stats.challenges, 1);
                debug!(sequence, gateway_id = token.gateway_id, "Accepted challenge");
                Ok(())
            }
            PacketType::Payload => {
                let packet = ClientPacket::open(data, &self.envelope, Direction::Downstream)?;
                if packet.prefix.session_id != self.session_id {
                    return Err(RelayError::dropped("payload for another session"));
                }
                let delivered = self
                    .session
                    .write()
                    .on_payload(&packet)
                    .ok_or(RelayError::dropped("replayed or stale downstream sequence"))?;

                ClientStats::bump(&self.stats.received, 1);
                ClientStats::bump(&self.stats.delivered, delivered.len() as u64);
                self.stats.last_received.touch();
                for payload_id in delivered {
                    trace!(payload_id, "Delivered");
                }
                Ok(())
            }
        }
    }
}

// ============================================
// Tasks
// ============================================

async fn send_loop(
    link: Arc<Link>,
    packets_per_second: u32,
    payload_bytes: usize,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let period = Duration::from_secs(1) / packets_per_second.max(1);
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut payload = vec![0u8; payload_bytes];
    let mut out = BytesMut::with_capacity(MAX_PACKET_BYTES);
    let mut payload_id = 0u64;

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = ticker.tick() => {}
        }

        match link.build_packet(&mut out, &mut payload, payload_id, unix_timestamp()) {
            Ok(true) => {
                payload_id += 1;
                match link.socket.send(&out, &link.gateway).await {
                    Ok(_) => ClientStats::bump(&link.stats.sent, 1),
                    Err(e) => debug!(error = %e, "Send failed"),
                }
            }
            Ok(false) => {
                ClientStats::bump(&link.stats.choked, 1);
                trace!("Upstream choked");
            }
            Err(RelayError::SessionExpired { expire_timestamp }) => {
                warn!(expire_timestamp, "Session token lapsed; shutting down");
                link.lapsed.store(true, Ordering::Release);
                let _ = link.shutdown_tx.send(());
                break;
            }
            Err(e) => {
                warn!(error = %e, "Failed to build packet; shutting down");
                let _ = link.shutdown_tx.send(());
                break;
            }
        }
    }
}

async fn receive_loop(link: Arc<Link>, queue: mpsc::Sender<Vec<u8>>, mut shutdown_rx: broadcast::Receiver<()>) {
    let mut buf = vec![0u8; RECV_BUFFER_BYTES];

    loop {
        let (len, from) = tokio::select! {
            _ = shutdown_rx.recv() => break,
            received = link.socket.recv(&mut buf) => match received {
                Ok(received) => received,
                Err(e) => {
                    if !link.socket.is_active() {
                        break;
                    }
                    warn!(error = %e, "Receive failed");
                    continue;
                }
            },
        };

        let data = &buf[..len];
        if from != link.gateway || !link.filter.accepts(data, &Address::from(from), &link.local) {
            trace!(%from, len, "Filtered datagram");
            continue;
        }

        tokio::select! {
            _ = shutdown_rx.recv() => break,
            queued = queue.send(data.to_vec()) => {
                if queued.is_err() {
                    break;
                }
            }
        }
    }
}

async fn state_loop(link: Arc<Link>, mut queue: mpsc::Receiver<Vec<u8>>, mut shutdown_rx: broadcast::Receiver<()>) {
    loop {
        let mut datagram = tokio::select! {
            _ = shutdown_rx.recv() => break,
            datagram = queue.recv() => match datagram {
                Some(datagram) => datagram,
                None => break,
            },
        };

        if let Err(e) = link.process(&mut datagram) {
            if e.is_drop() {
                debug!(error = %e, "Packet dropped");
            } else {
                warn!(error = %e, "Packet processing failed");
            }
        }
    }
}

async fn refresh_loop(
    link: Arc<Link>,
    refresher: Arc<dyn TokenRefresher>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(REFRESH_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = ticker.tick() => {}
        }

        let (blob, sequence) = {
            let session = link.session.read();
            if !session.needs_refresh(unix_timestamp()) {
                continue;
            }
            (*session.session_token(), session.session_token_sequence())
        };

        match refresher.refresh(&blob, sequence).await {
            Ok((renewed, next)) => {
                if link.session.write().adopt_session_token(renewed, next) {
                    info!(sequence = next, "Session token renewed");
                }
            }
            Err(e) => debug!(error = %e, "Session token refresh failed"),
        }
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::{Authority, Terms};
    use skylane_core::crypto::KeyPair;
    use skylane_core::protocol::filter::MAGIC_BYTES;

    const TERMS: Terms = Terms {
        up_kbps: 256,
        down_kbps: 1024,
        packets_per_second: 10,
    };

    fn connect_token(now: u64) -> ConnectToken {
        let authority = Authority::new(
            KeyPair::generate().private_key(),
            KeyPair::generate().public_key(),
            Address::from("127.0.0.1:40000".parse::<SocketAddr>().unwrap()),
        )
        .unwrap();
        authority.issue_connect_token(1, TERMS, now).unwrap()
    }

    fn client(token: ConnectToken, payload_bytes: usize) -> Result<Client> {
        Client::new(
            token,
            PacketFilter::new([1; MAGIC_BYTES]),
            "127.0.0.1:0".parse().unwrap(),
            payload_bytes,
            16,
        )
    }

    #[test]
    fn test_expired_connect_token_refused() {
        let err = client(connect_token(unix_timestamp() - 120), 100).unwrap_err();
        assert!(matches!(err, RelayError::Core(CoreError::TokenExpired { .. })));
    }

    #[test]
    fn test_payload_size_bounds() {
        let now = unix_timestamp();
        assert!(client(connect_token(now), PAYLOAD_ID_BYTES - 1).unwrap_err().is_config_error());
        assert!(client(connect_token(now), MAX_PACKET_BYTES).unwrap_err().is_config_error());
        assert!(client(connect_token(now), PAYLOAD_ID_BYTES).is_ok());
    }

    #[test]
    fn test_new_client_is_handshaking() {
        let token = connect_token(unix_timestamp());
        let session_id = token.client_keys.public_key().session_id();
        let client = client(token, 100).unwrap();
        assert_eq!(client.state(), ConnectionState::Handshaking);
        assert_eq!(client.session_id(), session_id);
        assert!(!client.session_lapsed());
        assert_eq!(ClientStats::get(&client.stats().sent), 0);
    }
}
