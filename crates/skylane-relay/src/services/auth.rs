// ============================================
// File: crates/skylane-relay/src/services/auth.rs
// ============================================
//! # Auth Authority
//!
//! ## Creation Reason
//! Connect tokens and session-token renewals are minted by the holder of
//! the auth private key. The HTTP surface around this lives elsewhere; this
//! is the part that touches keys and timestamps.
//!
//! ## Main Functionality
//! - `Authority`: mints connect tokens, renews session tokens
//! - `TokenRefresher`: the client's seam to the renewal exchange
//!
//! ## Renewal Rules
//! A session token is renewed only while it is live and inside the renewal
//! window before expiry. Each renewal adds a fixed extension and bumps the
//! token sequence, which is also the label the blob is sealed under.
//!
//! ## Last Modified
//! v0.1.0 - In-process authority

use async_trait::async_trait;
use tracing::debug;

use skylane_common::time::unix_timestamp;
use skylane_core::crypto::{Envelope, KeyPair, PrivateKey, PublicKey, Purpose};
use skylane_core::protocol::Address;
use skylane_core::token::{
    ConnectToken, SessionToken, CONNECT_TOKEN_EXPIRE_SECONDS, ENCRYPTED_SESSION_TOKEN_BYTES,
    SESSION_TOKEN_EXPIRE_SECONDS,
};
use skylane_core::CoreError;

use crate::config::RelayConfig;
use crate::error::Result;

/// A sealed session token.
pub type SessionTokenBlob = [u8; ENCRYPTED_SESSION_TOKEN_BYTES];

// ============================================
// Envelope Terms
// ============================================

/// Bandwidth and rate terms written into a connect token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Terms {
    /// Upstream cap
    pub up_kbps: u32,
    /// Downstream cap
    pub down_kbps: u32,
    /// Client send rate
    pub packets_per_second: u32,
}

// ============================================
// Authority
// ============================================

/// Token issuer holding the auth private key.
pub struct Authority {
    gateway_public_key: PublicKey,
    gateway_address: Address,
    session_envelope: Envelope,
}

impl Authority {
    /// Creates an authority for one gateway.
    ///
    /// # Errors
    /// `Core(KeyDerivation)` if the gateway key is unusable.
    pub fn new(auth_private_key: &PrivateKey, gateway_public_key: PublicKey, gateway_address: Address) -> Result<Self> {
        let session_envelope = Envelope::new(auth_private_key, &gateway_public_key, Purpose::SessionToken)?;
        Ok(Self {
            gateway_public_key,
            gateway_address,
            session_envelope,
        })
    }

    /// Creates an authority from configuration.
    ///
    /// # Errors
    /// Configuration errors for missing or malformed keys.
    pub fn from_config(config: &RelayConfig) -> Result<Self> {
        Self::new(
            &config.auth_private_key()?,
            config.gateway_public_key()?,
            Address::from(config.network.gateway_address),
        )
    }

    /// Mints a connect token with a fresh client key pair.
    ///
    /// # Errors
    /// `Core(Encryption)` if sealing the session token fails.
    pub fn issue_connect_token(&self, user_id: u64, terms: Terms, now: u64) -> Result<ConnectToken> {
        let client_keys = KeyPair::generate();
        let session = SessionToken {
            session_id: client_keys.public_key().session_id(),
            expire_timestamp: now + SESSION_TOKEN_EXPIRE_SECONDS,
            envelope_up_kbps: terms.up_kbps,
            envelope_down_kbps: terms.down_kbps,
        };
        let session_token = session.encrypt(&self.session_envelope, 0)?;

        debug!(user_id, session_id = %session.session_id, "Issued connect token");

        Ok(ConnectToken {
            user_id,
            expire_timestamp: now + CONNECT_TOKEN_EXPIRE_SECONDS,
            envelope_up_kbps: terms.up_kbps,
            envelope_down_kbps: terms.down_kbps,
            packets_per_second: terms.packets_per_second,
            gateway_address: self.gateway_address,
            gateway_public_key: self.gateway_public_key,
            client_keys,
            session_token_expire_timestamp: session.expire_timestamp,
            session_token,
        })
    }

    /// Renews a session token sealed under `sequence`.
    ///
    /// Returns the new blob and its sequence.
    ///
    /// # Errors
    /// - `Core(Decryption)`: wrong keys, tampering or wrong sequence
    /// - `Core(TokenExpired)`: the lease already ran out
    /// - `Core(RenewalTooEarly)`: outside the renewal window
    pub fn renew_session_token(
        &self,
        blob: &SessionTokenBlob,
        sequence: u64,
        now: u64,
    ) -> Result<(SessionTokenBlob, u64)> {
        let token = SessionToken::decrypt(&self.session_envelope, sequence, blob)?;
        let renewed = token.renew(now)?;
        let next = sequence.checked_add(1).ok_or(CoreError::SequenceExhausted)?;
        let sealed = renewed.encrypt(&self.session_envelope, next)?;

        debug!(
            session_id = %renewed.session_id,
            sequence = next,
            expire = renewed.expire_timestamp,
            "Renewed session token"
        );
        Ok((sealed, next))
    }
}

impl std::fmt::Debug for Authority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Authority")
            .field("gateway_public_key", &self.gateway_public_key)
            .field("gateway_address", &self.gateway_address)
            .finish_non_exhaustive()
    }
}

// ============================================
// TokenRefresher
// ============================================

/// Renewal exchange as seen from a client.
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    /// Exchanges a session token for a renewed one.
    ///
    /// # Errors
    /// Any renewal failure; the client keeps its current token.
    async fn refresh(&self, blob: &SessionTokenBlob, sequence: u64) -> Result<(SessionTokenBlob, u64)>;
}

#[async_trait]
impl TokenRefresher for Authority {
    async fn refresh(&self, blob: &SessionTokenBlob, sequence: u64) -> Result<(SessionTokenBlob, u64)> {
        self.renew_session_token(blob, sequence, unix_timestamp())
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RelayError;
    use skylane_core::token::{SESSION_TOKEN_EXTENSION_SECONDS, SESSION_TOKEN_RENEW_WINDOW_SECONDS};

    const NOW: u64 = 1_700_000_000;

    struct Fixture {
        gateway: KeyPair,
        auth: KeyPair,
        authority: Authority,
    }

    fn fixture() -> Fixture {
        let gateway = KeyPair::generate();
        let auth = KeyPair::generate();
        let authority = Authority::new(
            auth.private_key(),
            gateway.public_key(),
            Address::V4 { ip: [127, 0, 0, 1], port: 40000 },
        )
        .unwrap();
        Fixture { gateway, auth, authority }
    }

    fn terms() -> Terms {
        Terms {
            up_kbps: 128,
            down_kbps: 512,
            packets_per_second: 20,
        }
    }

    #[test]
    fn test_connect_token_readable_by_gateway() {
        let f = fixture();
        let token = f.authority.issue_connect_token(7, terms(), NOW).unwrap();
        assert_eq!(token.expire_timestamp, NOW + CONNECT_TOKEN_EXPIRE_SECONDS);
        assert_eq!(token.gateway_public_key, f.gateway.public_key());

        let at_gateway = Envelope::new(f.gateway.private_key(), &f.auth.public_key(), Purpose::SessionToken).unwrap();
        let session = SessionToken::decrypt(&at_gateway, 0, &token.session_token).unwrap();
        assert_eq!(session.session_id, token.client_keys.public_key().session_id());
        assert_eq!(session.envelope_down_kbps, 512);
        assert_eq!(session.expire_timestamp, token.session_token_expire_timestamp);
    }

    #[test]
    fn test_renewal_inside_window() {
        let f = fixture();
        let token = f.authority.issue_connect_token(7, terms(), NOW).unwrap();
        let at = token.session_token_expire_timestamp - SESSION_TOKEN_RENEW_WINDOW_SECONDS;

        let (blob, sequence) = f.authority.renew_session_token(&token.session_token, 0, at).unwrap();
        assert_eq!(sequence, 1);

        let at_gateway = Envelope::new(f.gateway.private_key(), &f.auth.public_key(), Purpose::SessionToken).unwrap();
        let renewed = SessionToken::decrypt(&at_gateway, 1, &blob).unwrap();
        assert_eq!(
            renewed.expire_timestamp,
            token.session_token_expire_timestamp + SESSION_TOKEN_EXTENSION_SECONDS
        );
    }

    #[test]
    fn test_renewal_too_early_or_too_late() {
        let f = fixture();
        let token = f.authority.issue_connect_token(7, terms(), NOW).unwrap();

        let early = f.authority.renew_session_token(&token.session_token, 0, NOW).unwrap_err();
        assert!(matches!(early, RelayError::Core(CoreError::RenewalTooEarly { .. })));

        let late = f
            .authority
            .renew_session_token(&token.session_token, 0, token.session_token_expire_timestamp + 1)
            .unwrap_err();
        assert!(matches!(late, RelayError::Core(CoreError::TokenExpired { .. })));
    }

    #[test]
    fn test_renewal_with_wrong_sequence_fails_closed() {
        let f = fixture();
        let token = f.authority.issue_connect_token(7, terms(), NOW).unwrap();
        let at = token.session_token_expire_timestamp - 1;
        let err = f.authority.renew_session_token(&token.session_token, 5, at).unwrap_err();
        assert!(matches!(err, RelayError::Core(CoreError::Decryption)));
    }

    #[test]
    fn test_foreign_authority_cannot_renew() {
        let f = fixture();
        let other = fixture();
        let token = f.authority.issue_connect_token(7, terms(), NOW).unwrap();
        let at = token.session_token_expire_timestamp - 1;
        assert!(other.authority.renew_session_token(&token.session_token, 0, at).is_err());
    }
}
