// ============================================
// File: crates/skylane-relay/src/config.rs
// ============================================
//! # Relay Configuration
//!
//! ## Creation Reason
//! All roles (gateway, server, client, auth) read one configuration
//! struct, built once at startup and passed down by reference. There is no
//! ambient global state.
//!
//! ## Main Functionality
//! - `RelayConfig`: sectioned configuration with defaults
//! - TOML file loading, then an environment-variable overlay
//! - Validation and typed accessors for keys, filter magic and tokens
//!
//! ## Configuration Sections
//! - `network`: role addresses, worker count, socket buffers
//! - `filter`: obfuscation magic
//! - `keys`: gateway and auth key material (base64)
//! - `gateway` / `server`: ids, rotation interval, server bandwidth
//! - `client`: connect token, payload size, receive queue depth
//! - `auth`: envelope handed out in new connect tokens
//! - `logging`: log level
//!
//! ## Example Configuration
//! ```toml
//! [network]
//! gateway_address = "127.0.0.1:40000"
//! server_address = "127.0.0.1:30000"
//! num_threads = 4
//!
//! [filter]
//! magic = "AQIDBAUGBwg="
//!
//! [gateway]
//! gateway_id = 7
//! session_rotation_seconds = 60
//! ```
//!
//! ## Environment Overlay
//! | Variable | Field |
//! |----------|-------|
//! | `GATEWAY_ADDRESS` | `network.gateway_address` |
//! | `GATEWAY_INTERNAL_ADDRESS` | `network.gateway_internal_address` |
//! | `SERVER_ADDRESS` | `network.server_address` |
//! | `CLIENT_ADDRESS` | `network.client_address` |
//! | `NUM_THREADS` | `network.num_threads` |
//! | `READ_BUFFER` / `WRITE_BUFFER` | `network.read_buffer` / `write_buffer` |
//! | `FILTER_MAGIC` | `filter.magic` |
//! | `GATEWAY_PUBLIC_KEY` / `GATEWAY_PRIVATE_KEY` | `keys.gateway_*` |
//! | `AUTH_PUBLIC_KEY` / `AUTH_PRIVATE_KEY` | `keys.auth_*` |
//! | `GATEWAY_ID` / `SERVER_ID` | `gateway.gateway_id` / `server.server_id` |
//! | `SESSION_ROTATION_SECONDS` | both rotation intervals |
//! | `SERVER_BANDWIDTH_KBPS` | `server.bandwidth_kbps` |
//! | `CONNECT_TOKEN` | `client.connect_token` |
//! | `PAYLOAD_BYTES` | `client.payload_bytes` |
//! | `LOG_LEVEL` | `logging.level` |
//!
//! ## ⚠️ Important Note for Next Developer
//! - A malformed value is fatal at startup; never fall back silently
//! - All config changes require a restart
//!
//! ## Last Modified
//! v0.1.0 - Initial configuration implementation

use std::net::SocketAddr;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::info;

use skylane_common::decode_base64_array;
use skylane_core::crypto::{KeyPair, PrivateKey, PublicKey};
use skylane_core::protocol::filter::MAGIC_BYTES;
use skylane_core::protocol::packet::MAX_CLIENT_PAYLOAD_BYTES;
use skylane_core::protocol::PacketFilter;
use skylane_core::token::ConnectToken;

use crate::error::{RelayError, Result};

// ============================================
// RelayConfig
// ============================================

/// Main relay configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Addresses and socket settings.
    #[serde(default)]
    pub network: NetworkConfig,

    /// Obfuscation filter settings.
    #[serde(default)]
    pub filter: FilterConfig,

    /// Key material.
    #[serde(default)]
    pub keys: KeysConfig,

    /// Gateway role settings.
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Server role settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Client role settings.
    #[serde(default)]
    pub client: ClientConfig,

    /// Auth role settings.
    #[serde(default)]
    pub auth: AuthConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl RelayConfig {
    /// Loads a TOML file, applies the process environment and validates.
    ///
    /// # Errors
    /// `ConfigLoad` if the file cannot be read or parsed, `ConfigInvalid`
    /// for bad values.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let path_str = path.display().to_string();

        info!(path = %path_str, "Loading configuration");

        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| RelayError::config_load(&path_str, e.to_string()))?;
        let mut config: Self =
            toml::from_str(&content).map_err(|e| RelayError::config_load(&path_str, e.to_string()))?;

        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults overlaid by the process environment.
    ///
    /// # Errors
    /// `ConfigInvalid` for malformed variables.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Parses TOML without touching the environment (useful for testing).
    ///
    /// # Errors
    /// `ConfigLoad` or `ConfigInvalid`.
    pub fn from_str(content: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| RelayError::config_load("<string>", e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Overlays variables from the process environment.
    ///
    /// # Errors
    /// `ConfigInvalid` for malformed variables.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_env_with(|name| std::env::var(name).ok())
    }

    /// Overlays variables read through `lookup`.
    ///
    /// # Errors
    /// `ConfigInvalid` naming the first malformed variable.
    pub fn apply_env_with(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        let net = &mut self.network;
        overlay(&lookup, "GATEWAY_ADDRESS", &mut net.gateway_address)?;
        overlay(&lookup, "GATEWAY_INTERNAL_ADDRESS", &mut net.gateway_internal_address)?;
        overlay(&lookup, "SERVER_ADDRESS", &mut net.server_address)?;
        overlay(&lookup, "CLIENT_ADDRESS", &mut net.client_address)?;
        overlay(&lookup, "NUM_THREADS", &mut net.num_threads)?;
        overlay(&lookup, "READ_BUFFER", &mut net.read_buffer)?;
        overlay(&lookup, "WRITE_BUFFER", &mut net.write_buffer)?;

        overlay(&lookup, "FILTER_MAGIC", &mut self.filter.magic)?;

        overlay_opt(&lookup, "GATEWAY_PUBLIC_KEY", &mut self.keys.gateway_public_key);
        overlay_opt(&lookup, "GATEWAY_PRIVATE_KEY", &mut self.keys.gateway_private_key);
        overlay_opt(&lookup, "AUTH_PUBLIC_KEY", &mut self.keys.auth_public_key);
        overlay_opt(&lookup, "AUTH_PRIVATE_KEY", &mut self.keys.auth_private_key);

        overlay(&lookup, "GATEWAY_ID", &mut self.gateway.gateway_id)?;
        overlay(&lookup, "SERVER_ID", &mut self.server.server_id)?;
        overlay(&lookup, "SESSION_ROTATION_SECONDS", &mut self.gateway.session_rotation_seconds)?;
        overlay(&lookup, "SESSION_ROTATION_SECONDS", &mut self.server.session_rotation_seconds)?;
        overlay(&lookup, "SERVER_BANDWIDTH_KBPS", &mut self.server.bandwidth_kbps)?;

        overlay_opt(&lookup, "CONNECT_TOKEN", &mut self.client.connect_token);
        overlay(&lookup, "PAYLOAD_BYTES", &mut self.client.payload_bytes)?;

        overlay(&lookup, "LOG_LEVEL", &mut self.logging.level)?;
        Ok(())
    }

    /// Validates the configuration.
    ///
    /// # Errors
    /// `ConfigInvalid` naming the offending field.
    pub fn validate(&self) -> Result<()> {
        self.network.validate()?;
        self.filter()?;
        self.gateway.validate()?;
        self.server.validate()?;
        self.client.validate()?;
        Ok(())
    }

    /// Serializes configuration to a TOML string.
    #[must_use]
    pub fn to_toml(&self) -> String {
        toml::to_string_pretty(self).unwrap_or_default()
    }

    // ========================================
    // Typed Accessors
    // ========================================

    /// The packet filter built from `filter.magic`.
    ///
    /// # Errors
    /// `ConfigInvalid` if the magic is not base64 of 8 bytes.
    pub fn filter(&self) -> Result<PacketFilter> {
        decode_base64_array::<MAGIC_BYTES>("filter magic", &self.filter.magic)
            .map(PacketFilter::new)
            .map_err(|e| RelayError::config_invalid("filter.magic", e.to_string()))
    }

    /// The gateway key pair. Fails when a configured public key does not
    /// match the private key.
    ///
    /// # Errors
    /// `ConfigMissing` or `ConfigInvalid`.
    pub fn gateway_keys(&self) -> Result<KeyPair> {
        let private = parse_private(&self.keys.gateway_private_key, "keys.gateway_private_key")?;
        let keys = KeyPair::from_private(private);
        if let Some(text) = &self.keys.gateway_public_key {
            let public = parse_public(text, "keys.gateway_public_key")?;
            if public != keys.public_key() {
                return Err(RelayError::config_invalid(
                    "keys.gateway_public_key",
                    "does not match gateway_private_key",
                ));
            }
        }
        Ok(keys)
    }

    /// The gateway public key, configured or derived.
    ///
    /// # Errors
    /// `ConfigMissing` or `ConfigInvalid`.
    pub fn gateway_public_key(&self) -> Result<PublicKey> {
        match &self.keys.gateway_public_key {
            Some(text) => parse_public(text, "keys.gateway_public_key"),
            None => self.gateway_keys().map(|k| k.public_key()),
        }
    }

    /// The auth private key.
    ///
    /// # Errors
    /// `ConfigMissing` or `ConfigInvalid`.
    pub fn auth_private_key(&self) -> Result<PrivateKey> {
        parse_private(&self.keys.auth_private_key, "keys.auth_private_key")
    }

    /// The auth public key, configured or derived.
    ///
    /// # Errors
    /// `ConfigMissing` or `ConfigInvalid`.
    pub fn auth_public_key(&self) -> Result<PublicKey> {
        match &self.keys.auth_public_key {
            Some(text) => parse_public(text, "keys.auth_public_key"),
            None => self.auth_private_key().map(|k| k.public_key()),
        }
    }

    /// The client's connect token.
    ///
    /// # Errors
    /// `ConfigMissing` or `ConfigInvalid`.
    pub fn connect_token(&self) -> Result<ConnectToken> {
        let text = self
            .client
            .connect_token
            .as_deref()
            .ok_or_else(|| RelayError::config_missing("client.connect_token"))?;
        ConnectToken::from_base64(text)
            .map_err(|e| RelayError::config_invalid("client.connect_token", e.to_string()))
    }
}

fn overlay<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str, field: &mut T) -> Result<()>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    if let Some(raw) = lookup(name) {
        *field = raw
            .trim()
            .parse()
            .map_err(|e: T::Err| RelayError::config_invalid(name, e.to_string()))?;
    }
    Ok(())
}

fn overlay_opt(lookup: &impl Fn(&str) -> Option<String>, name: &str, field: &mut Option<String>) {
    if let Some(raw) = lookup(name) {
        let raw = raw.trim();
        if !raw.is_empty() {
            *field = Some(raw.to_string());
        }
    }
}

fn parse_private(text: &Option<String>, field: &str) -> Result<PrivateKey> {
    let text = text.as_deref().ok_or_else(|| RelayError::config_missing(field))?;
    PrivateKey::from_base64(text).map_err(|e| RelayError::config_invalid(field, e.to_string()))
}

fn parse_public(text: &str, field: &str) -> Result<PublicKey> {
    text.parse()
        .map_err(|e: skylane_common::CommonError| RelayError::config_invalid(field, e.to_string()))
}

// ============================================
// NetworkConfig
// ============================================

/// Network configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Public gateway address; also the address clients tag packets for.
    /// Must be a concrete IP.
    #[serde(default = "default_gateway_address")]
    pub gateway_address: SocketAddr,

    /// Bind address for each gateway worker's server-facing socket. Port 0
    /// gives every worker its own port. Must be a concrete IP.
    #[serde(default = "default_internal_address")]
    pub gateway_internal_address: SocketAddr,

    /// Server address. Must be a concrete IP.
    #[serde(default = "default_server_address")]
    pub server_address: SocketAddr,

    /// Client bind address. Must be a concrete IP.
    #[serde(default = "default_client_address")]
    pub client_address: SocketAddr,

    /// Worker count for gateway and server.
    #[serde(default = "default_num_threads")]
    pub num_threads: usize,

    /// `SO_RCVBUF` in bytes.
    #[serde(default = "default_buffer")]
    pub read_buffer: usize,

    /// `SO_SNDBUF` in bytes.
    #[serde(default = "default_buffer")]
    pub write_buffer: usize,
}

fn default_gateway_address() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 40000))
}

fn default_internal_address() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 0))
}

fn default_server_address() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 30000))
}

fn default_client_address() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 0))
}

const fn default_num_threads() -> usize {
    4
}

const fn default_buffer() -> usize {
    2 * 1024 * 1024
}

impl NetworkConfig {
    fn validate(&self) -> Result<()> {
        if self.num_threads == 0 {
            return Err(RelayError::config_invalid("network.num_threads", "must be greater than 0"));
        }
        if self.read_buffer == 0 || self.write_buffer == 0 {
            return Err(RelayError::config_invalid("network.read_buffer", "buffers cannot be 0"));
        }
        if self.num_threads > 1 && self.gateway_internal_address.port() != 0 {
            return Err(RelayError::config_invalid(
                "network.gateway_internal_address",
                "port must be 0 when more than one worker runs",
            ));
        }
        for (field, addr) in [
            ("network.gateway_address", self.gateway_address),
            ("network.gateway_internal_address", self.gateway_internal_address),
            ("network.server_address", self.server_address),
            ("network.client_address", self.client_address),
        ] {
            if addr.ip().is_unspecified() {
                return Err(RelayError::config_invalid(
                    field,
                    "must be a concrete IP; it is embedded in packet tags",
                ));
            }
        }
        Ok(())
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            gateway_address: default_gateway_address(),
            gateway_internal_address: default_internal_address(),
            server_address: default_server_address(),
            client_address: default_client_address(),
            num_threads: default_num_threads(),
            read_buffer: default_buffer(),
            write_buffer: default_buffer(),
        }
    }
}

// ============================================
// FilterConfig
// ============================================

/// Obfuscation filter section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterConfig {
    /// Base64 of the 8-byte magic shared by all three roles.
    #[serde(default = "default_magic")]
    pub magic: String,
}

fn default_magic() -> String {
    "AQIDBAUGBwg=".to_string()
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            magic: default_magic(),
        }
    }
}

// ============================================
// KeysConfig
// ============================================

/// Key material section (base64, 32 bytes each).
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct KeysConfig {
    /// Gateway public key.
    #[serde(default)]
    pub gateway_public_key: Option<String>,
    /// Gateway private key.
    #[serde(default)]
    pub gateway_private_key: Option<String>,
    /// Auth public key.
    #[serde(default)]
    pub auth_public_key: Option<String>,
    /// Auth private key.
    #[serde(default)]
    pub auth_private_key: Option<String>,
}

impl std::fmt::Debug for KeysConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeysConfig")
            .field("gateway_public_key", &self.gateway_public_key)
            .field("auth_public_key", &self.auth_public_key)
            .finish_non_exhaustive()
    }
}

// ============================================
// Role Sections
// ============================================

/// Gateway role section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Identifier stamped into forwarded packets and challenges.
    #[serde(default = "default_id")]
    pub gateway_id: u64,

    /// Session table generation length.
    #[serde(default = "default_rotation")]
    pub session_rotation_seconds: u64,
}

const fn default_id() -> u64 {
    1
}

const fn default_rotation() -> u64 {
    60
}

impl GatewayConfig {
    fn validate(&self) -> Result<()> {
        if self.gateway_id == 0 {
            return Err(RelayError::config_invalid("gateway.gateway_id", "0 means unassigned"));
        }
        if self.session_rotation_seconds == 0 {
            return Err(RelayError::config_invalid(
                "gateway.session_rotation_seconds",
                "must be greater than 0",
            ));
        }
        Ok(())
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            gateway_id: default_id(),
            session_rotation_seconds: default_rotation(),
        }
    }
}

/// Server role section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Identifier stamped into responses.
    #[serde(default = "default_id")]
    pub server_id: u64,

    /// Session table generation length.
    #[serde(default = "default_rotation")]
    pub session_rotation_seconds: u64,

    /// Per-session downstream cap.
    #[serde(default = "default_server_kbps")]
    pub bandwidth_kbps: u32,
}

const fn default_server_kbps() -> u32 {
    1024
}

impl ServerConfig {
    fn validate(&self) -> Result<()> {
        if self.session_rotation_seconds == 0 {
            return Err(RelayError::config_invalid(
                "server.session_rotation_seconds",
                "must be greater than 0",
            ));
        }
        Ok(())
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            server_id: default_id(),
            session_rotation_seconds: default_rotation(),
            bandwidth_kbps: default_server_kbps(),
        }
    }
}

/// Client role section.
#[derive(Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Base64 connect token.
    #[serde(default)]
    pub connect_token: Option<String>,

    /// Application payload size; the first 8 bytes carry the payload id.
    #[serde(default = "default_payload_bytes")]
    pub payload_bytes: usize,

    /// Depth of the queue between the receive and state tasks.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

const fn default_payload_bytes() -> usize {
    100
}

const fn default_queue_capacity() -> usize {
    1024
}

impl ClientConfig {
    fn validate(&self) -> Result<()> {
        if self.payload_bytes < 8 || self.payload_bytes > MAX_CLIENT_PAYLOAD_BYTES {
            return Err(RelayError::config_invalid(
                "client.payload_bytes",
                format!("must be between 8 and {MAX_CLIENT_PAYLOAD_BYTES}"),
            ));
        }
        if self.queue_capacity == 0 {
            return Err(RelayError::config_invalid("client.queue_capacity", "must be greater than 0"));
        }
        Ok(())
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_token: None,
            payload_bytes: default_payload_bytes(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("connect_token", &self.connect_token.as_ref().map(|_| "[REDACTED]"))
            .field("payload_bytes", &self.payload_bytes)
            .field("queue_capacity", &self.queue_capacity)
            .finish()
    }
}

/// Auth role section: the envelope put into new connect tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Upstream cap.
    #[serde(default = "default_up_kbps")]
    pub envelope_up_kbps: u32,
    /// Downstream cap.
    #[serde(default = "default_down_kbps")]
    pub envelope_down_kbps: u32,
    /// Client send rate.
    #[serde(default = "default_packets_per_second")]
    pub packets_per_second: u32,
}

const fn default_up_kbps() -> u32 {
    256
}

const fn default_down_kbps() -> u32 {
    1024
}

const fn default_packets_per_second() -> u32 {
    10
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            envelope_up_kbps: default_up_kbps(),
            envelope_down_kbps: default_down_kbps(),
            packets_per_second: default_packets_per_second(),
        }
    }
}

// ============================================
// LoggingConfig
// ============================================

/// Logging configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

// ============================================
// Tests
// ============================================
