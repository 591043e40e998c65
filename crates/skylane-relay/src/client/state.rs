// ============================================
// File: crates/skylane-relay/src/client/state.rs
// ============================================
//! # Client Connection State
//!
//! ## Creation Reason
//! Everything the client's tasks mutate, gathered in one synchronous type
//! so the transitions can be tested without sockets.
//!
//! ## State Machine
//! ```text
//!                 challenge                 payload
//! Handshaking ──────────────► Challenged ─────────────► Connected
//!      │                          ▲                         │
//!      │ payload                  │    newer challenge      │
//!      └──────────────────────────┼─────────────────────────┤
//!                                 └─────────────────────────┘
//! ```
//!
//! ## Session-Token Clock
//! The client cannot open its session token. It tracks expiry locally:
//! the clock starts at the connect token's session-token expiry and moves
//! forward by the renewal extension for every sequence step it adopts.
//!
//! ## ⚠️ Important Note for Next Developer
//! - Callers hold the lock only around these calls, never across I/O
//!
//! ## Last Modified
//! v0.1.0 - Initial client state machine

use tracing::{debug, info};

use skylane_common::time::is_expired;

use skylane_core::bandwidth::BandwidthLimiter;
use skylane_core::protocol::{ClientPacket, PayloadHeader};
use skylane_core::reliability::Reliability;
use skylane_core::token::{
    ConnectToken, ENCRYPTED_CHALLENGE_TOKEN_BYTES, SESSION_TOKEN_EXTENSION_SECONDS,
    SESSION_TOKEN_RENEW_WINDOW_SECONDS,
};

use crate::error::Result;
use crate::services::SessionTokenBlob;

/// A sealed challenge token.
pub type ChallengeTokenBlob = [u8; ENCRYPTED_CHALLENGE_TOKEN_BYTES];

/// Where the client stands with its gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No challenge held and no payload received yet.
    Handshaking,
    /// Holding a challenge that no payload has confirmed yet.
    Challenged,
    /// A payload arrived after the last challenge.
    Connected,
}

/// Per-packet fields for the next upstream send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingFields {
    /// Upstream sequence (also the nonce)
    pub sequence: u64,
    /// Reliability header
    pub header: PayloadHeader,
    /// Challenge being answered
    pub challenge_token: Option<ChallengeTokenBlob>,
    /// Session token to present
    pub session_token: SessionTokenBlob,
    /// Its sequence
    pub session_token_sequence: u64,
}

/// Mutable client state shared by the send, state and refresh tasks.
#[derive(Debug)]
pub struct ClientSession {
    state: ConnectionState,
    reliability: Reliability,
    challenge: Option<(u64, ChallengeTokenBlob)>,
    last_challenge_sequence: Option<u64>,
    gateway_id: u64,
    server_id: u64,
    session_token: SessionTokenBlob,
    session_token_sequence: u64,
    session_token_expire: u64,
    limiter: BandwidthLimiter,
}

impl ClientSession {
    /// Starts a session from a connect token.
    #[must_use]
    pub fn new(token: &ConnectToken) -> Self {
        Self {
            state: ConnectionState::Handshaking,
            reliability: Reliability::new(),
            challenge: None,
            last_challenge_sequence: None,
            gateway_id: 0,
            server_id: 0,
            session_token: token.session_token,
            session_token_sequence: 0,
            session_token_expire: token.session_token_expire_timestamp,
            limiter: BandwidthLimiter::from_kbps(token.envelope_up_kbps),
        }
    }

    // ========================================
    // Accessors
    // ========================================

    /// Current connection state.
    #[must_use]
    pub const fn state(&self) -> ConnectionState {
        self.state
    }

    /// Gateway id learned from responses (0 until known).
    #[must_use]
    pub const fn gateway_id(&self) -> u64 {
        self.gateway_id
    }

    /// Server id learned from responses (0 until known).
    #[must_use]
    pub const fn server_id(&self) -> u64 {
        self.server_id
    }

    /// The held session token.
    #[must_use]
    pub const fn session_token(&self) -> &SessionTokenBlob {
        &self.session_token
    }

    /// Its sequence.
    #[must_use]
    pub const fn session_token_sequence(&self) -> u64 {
        self.session_token_sequence
    }

    /// Local estimate of the session token's expiry.
    #[must_use]
    pub const fn session_token_expire(&self) -> u64 {
        self.session_token_expire
    }

    /// Sequence of the held challenge, if any.
    #[must_use]
    pub fn challenge_sequence(&self) -> Option<u64> {
        self.challenge.map(|(sequence, _)| sequence)
    }

    // ========================================
    // Session Token
    // ========================================

    /// `true` once the local session-token clock has run out.
    #[must_use]
    pub const fn session_token_lapsed(&self, now: u64) -> bool {
        is_expired(self.session_token_expire, now)
    }

    /// `true` while the token is live and inside the renewal window.
    #[must_use]
    pub const fn needs_refresh(&self, now: u64) -> bool {
        !self.session_token_lapsed(now)
            && self.session_token_expire - now <= SESSION_TOKEN_RENEW_WINDOW_SECONDS
    }

    /// Adopts `blob` if its sequence is newer. Returns whether it did.
    pub fn adopt_session_token(&mut self, blob: SessionTokenBlob, sequence: u64) -> bool {
        if sequence <= self.session_token_sequence {
            return false;
        }
        let steps = sequence - self.session_token_sequence;
        self.session_token_expire = self
            .session_token_expire
            .saturating_add(steps.saturating_mul(SESSION_TOKEN_EXTENSION_SECONDS));
        self.session_token = blob;
        self.session_token_sequence = sequence;
        debug!(
            sequence,
            expire = self.session_token_expire,
            "Adopted session token"
        );
        true
    }

    // ========================================
    // Inbound
    // ========================================

    /// Applies a verified challenge. Returns `false` when it is not newer
    /// than every challenge accepted so far, answered or not.
    pub fn on_challenge(&mut self, sequence: u64, blob: ChallengeTokenBlob) -> bool {
        if self.last_challenge_sequence.is_some_and(|last| sequence <= last) {
            return false;
        }
        self.last_challenge_sequence = Some(sequence);
        self.challenge = Some((sequence, blob));
        match self.state {
            ConnectionState::Connected => {
                info!(sequence, "Gateway challenged a connected session; reconnecting");
            }
            ConnectionState::Handshaking => debug!(sequence, "Challenge received"),
            ConnectionState::Challenged => debug!(sequence, "Challenge replaced"),
        }
        self.state = ConnectionState::Challenged;
        true
    }

    /// Applies a decrypted downstream payload.
    ///
    /// Returns the payload ids newly confirmed by the packet's acks, or
    /// `None` when the packet is a duplicate or stale.
    pub fn on_payload(&mut self, packet: &ClientPacket<'_>) -> Option<Vec<u64>> {
        if !self.reliability.receive(packet.prefix.sequence).is_fresh() {
            return None;
        }

        let delivered = self
            .reliability
            .process_acks(packet.header.ack, &packet.header.ack_bits)
            .into_iter()
            .filter_map(|(_, payload_id)| payload_id)
            .collect();

        self.adopt_session_token(packet.prefix.session_token, packet.prefix.session_token_sequence);
        if packet.header.gateway_id != 0 {
            self.gateway_id = packet.header.gateway_id;
        }
        if packet.header.server_id != 0 {
            self.server_id = packet.header.server_id;
        }

        // Answered; `last_challenge_sequence` stays to reject replays
        self.challenge = None;
        if self.state != ConnectionState::Connected {
            info!(
                gateway_id = self.gateway_id,
                server_id = self.server_id,
                "Connected"
            );
            self.state = ConnectionState::Connected;
        }
        Some(delivered)
    }

    // ========================================
    // Outbound
    // ========================================

    /// Spends upstream budget for a packet of `bits` on the wire.
    pub fn try_consume(&mut self, bits: u64, now: u64) -> bool {
        self.limiter.try_consume(bits, now)
    }

    /// Whether the next packet will carry a challenge token.
    #[must_use]
    pub const fn has_challenge(&self) -> bool {
        self.challenge.is_some()
    }

    /// Takes a sequence for `payload_id` and fills in everything else the
    /// next upstream packet carries.
    ///
    /// # Errors
    /// `Core(SequenceExhausted)` when the sequence space is used up.
    pub fn prepare_send(&mut self, payload_id: u64) -> Result<OutgoingFields> {
        let sequence = self.reliability.next_send(Some(payload_id))?;
        let (ack, ack_bits) = self.reliability.ack_fields();
        let challenge_token = self.challenge.map(|(_, blob)| blob);
        let gateway_id = if challenge_token.is_some() { 0 } else { self.gateway_id };

        Ok(OutgoingFields {
            sequence,
            header: PayloadHeader {
                ack,
                ack_bits,
                gateway_id,
                server_id: self.server_id,
                ..PayloadHeader::default()
            },
            challenge_token,
            session_token: self.session_token,
            session_token_sequence: self.session_token_sequence,
        })
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;
    use skylane_core::crypto::KeyPair;
    use skylane_core::protocol::{Address, ClientPacketPrefix};
    use skylane_core::token::ENCRYPTED_SESSION_TOKEN_BYTES;

    const NOW: u64 = 1_700_000_000;

    fn connect_token() -> ConnectToken {
        let keys = KeyPair::generate();
        ConnectToken {
            user_id: 7,
            expire_timestamp: NOW + 30,
            envelope_up_kbps: 256,
            envelope_down_kbps: 1024,
            packets_per_second: 10,
            gateway_address: Address::from("127.0.0.1:40000".parse::<std::net::SocketAddr>().unwrap()),
            gateway_public_key: KeyPair::generate().public_key(),
            session_token_expire_timestamp: NOW + 30,
            session_token: [0u8; ENCRYPTED_SESSION_TOKEN_BYTES],
            client_keys: keys,
        }
    }

    fn downstream(sequence: u64, token_sequence: u64, header: PayloadHeader) -> ClientPacket<'static> {
        ClientPacket {
            prefix: ClientPacketPrefix {
                session_token: [token_sequence as u8; ENCRYPTED_SESSION_TOKEN_BYTES],
                session_token_sequence: token_sequence,
                session_id: KeyPair::generate().public_key().session_id(),
                sequence,
            },
            header,
            challenge_token: None,
            payload: &[],
        }
    }

    fn header(gateway_id: u64, server_id: u64) -> PayloadHeader {
        PayloadHeader {
            gateway_id,
            server_id,
            ..PayloadHeader::default()
        }
    }

    #[test]
    fn test_handshaking_to_connected_without_challenge() {
        let mut session = ClientSession::new(&connect_token());
        assert_eq!(session.state(), ConnectionState::Handshaking);

        let delivered = session.on_payload(&downstream(1, 0, header(3, 9))).unwrap();
        assert!(delivered.is_empty());
        assert_eq!(session.state(), ConnectionState::Connected);
        assert_eq!(session.gateway_id(), 3);
        assert_eq!(session.server_id(), 9);
    }

    #[test]
    fn test_challenge_requires_greater_sequence() {
        let mut session = ClientSession::new(&connect_token());
        assert!(session.on_challenge(10, [1; ENCRYPTED_CHALLENGE_TOKEN_BYTES]));
        assert_eq!(session.state(), ConnectionState::Challenged);

        assert!(!session.on_challenge(10, [2; ENCRYPTED_CHALLENGE_TOKEN_BYTES]));
        assert!(!session.on_challenge(9, [2; ENCRYPTED_CHALLENGE_TOKEN_BYTES]));
        assert_eq!(session.challenge_sequence(), Some(10));

        assert!(session.on_challenge(11, [2; ENCRYPTED_CHALLENGE_TOKEN_BYTES]));
        assert_eq!(session.challenge_sequence(), Some(11));
    }

    #[test]
    fn test_connected_session_forced_back_to_challenged() {
        let mut session = ClientSession::new(&connect_token());
        session.on_payload(&downstream(1, 0, header(3, 9))).unwrap();
        assert_eq!(session.state(), ConnectionState::Connected);

        assert!(session.on_challenge(5, [1; ENCRYPTED_CHALLENGE_TOKEN_BYTES]));
        assert_eq!(session.state(), ConnectionState::Challenged);

        // The next send answers the challenge instead of naming a gateway
        let fields = session.prepare_send(0).unwrap();
        assert!(fields.challenge_token.is_some());
        assert_eq!(fields.header.gateway_id, 0);

        session.on_payload(&downstream(2, 0, header(3, 9))).unwrap();
        assert_eq!(session.state(), ConnectionState::Connected);
        assert!(!session.has_challenge());
        assert_eq!(session.prepare_send(1).unwrap().header.gateway_id, 3);
    }

    #[test]
    fn test_answered_challenge_not_accepted_again() {
        let mut session = ClientSession::new(&connect_token());
        assert!(session.on_challenge(10, [1; ENCRYPTED_CHALLENGE_TOKEN_BYTES]));
        session.on_payload(&downstream(1, 0, header(3, 9))).unwrap();
        assert_eq!(session.state(), ConnectionState::Connected);
        assert_eq!(session.challenge_sequence(), None);

        // A duplicated challenge packet arriving late
        assert!(!session.on_challenge(10, [1; ENCRYPTED_CHALLENGE_TOKEN_BYTES]));
        assert!(!session.on_challenge(7, [1; ENCRYPTED_CHALLENGE_TOKEN_BYTES]));
        assert_eq!(session.state(), ConnectionState::Connected);
        assert!(!session.has_challenge());

        assert!(session.on_challenge(11, [2; ENCRYPTED_CHALLENGE_TOKEN_BYTES]));
        assert_eq!(session.state(), ConnectionState::Challenged);
    }

    #[test]
    fn test_duplicate_payload_ignored() {
        let mut session = ClientSession::new(&connect_token());
        assert!(session.on_payload(&downstream(4, 0, header(1, 1))).is_some());
        assert!(session.on_payload(&downstream(4, 0, header(1, 1))).is_none());
    }

    #[test]
    fn test_acks_report_payload_ids() {
        let mut session = ClientSession::new(&connect_token());
        let first = session.prepare_send(100).unwrap();
        let second = session.prepare_send(101).unwrap();
        assert_eq!((first.sequence, second.sequence), (0, 1));

        let mut ack_header = header(1, 1);
        ack_header.ack = 1;
        ack_header.ack_bits[0] = 0b11;
        let mut delivered = session.on_payload(&downstream(1, 0, ack_header)).unwrap();
        delivered.sort_unstable();
        assert_eq!(delivered, vec![100, 101]);

        // Reported once
        let again = session.on_payload(&downstream(2, 0, ack_header)).unwrap();
        assert!(again.is_empty());
    }

    #[test]
    fn test_session_token_clock() {
        let mut session = ClientSession::new(&connect_token());
        assert!(!session.session_token_lapsed(NOW));
        assert!(!session.needs_refresh(NOW));
        assert!(session.needs_refresh(NOW + 25));
        assert!(session.needs_refresh(NOW + 30));
        assert!(!session.session_token_lapsed(NOW + 30));
        assert!(session.session_token_lapsed(NOW + 31));

        assert!(session.adopt_session_token([9; ENCRYPTED_SESSION_TOKEN_BYTES], 2));
        assert_eq!(session.session_token_expire(), NOW + 30 + 2 * SESSION_TOKEN_EXTENSION_SECONDS);
        assert!(!session.adopt_session_token([8; ENCRYPTED_SESSION_TOKEN_BYTES], 2));
        assert_eq!(session.session_token_sequence(), 2);
    }

    #[test]
    fn test_payload_adopts_newer_session_token() {
        let mut session = ClientSession::new(&connect_token());
        session.on_payload(&downstream(1, 1, header(1, 1))).unwrap();
        assert_eq!(session.session_token_sequence(), 1);
        assert_eq!(session.prepare_send(0).unwrap().session_token_sequence, 1);
    }
}
