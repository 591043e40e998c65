// ============================================
// File: crates/skylane-relay/src/main.rs
// ============================================
//! # Skylane Entry Point
//!
//! ## Creation Reason
//! One binary for every role, selected by subcommand.
//!
//! ## Usage
//! ```bash
//! # Keys for the gateway and the auth authority
//! skylane keygen
//!
//! # Backend and gateway
//! skylane --config relay.toml server
//! skylane --config relay.toml gateway
//!
//! # Mint a token, then connect with it
//! CONNECT_TOKEN=$(skylane --config relay.toml connect-token --user-id 7) \
//!     skylane --config relay.toml client --refresh
//! ```
//!
//! Without `--config` every role starts from defaults overlaid by the
//! environment (`GATEWAY_ADDRESS`, `GATEWAY_PRIVATE_KEY`, ...).
//!
//! ## ⚠️ Important Note for Next Developer
//! - `connect-token` prints ONLY the token on stdout so it can be captured
//! - Logging goes to stderr for the same reason
//!
//! ## Last Modified
//! v0.1.0 - Initial CLI

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use skylane_common::time::unix_timestamp;
use skylane_core::crypto::KeyPair;
use skylane_relay::{Authority, Client, Gateway, RelayConfig, Server, Terms};

// ============================================
// CLI Definition
// ============================================

/// Skylane UDP relay
#[derive(Parser, Debug)]
#[command(name = "skylane")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to a TOML configuration file (environment variables still apply)
    #[arg(short, long, global = true, env = "SKYLANE_CONFIG")]
    config: Option<PathBuf>,

    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the public gateway
    Gateway,

    /// Run the backend server
    Server,

    /// Run a client with the configured connect token
    Client {
        /// Renew the session token in-process with the auth private key
        #[arg(long)]
        refresh: bool,
    },

    /// Generate an X25519 key pair
    Keygen,

    /// Mint a connect token with the auth private key
    ConnectToken {
        /// Account the session belongs to
        #[arg(long, default_value_t = 1)]
        user_id: u64,
    },

    /// Validate the configuration and print it
    Validate,
}

// ============================================
// Main
// ============================================

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if matches!(cli.command, Commands::Keygen) {
        cmd_keygen();
        return;
    }

    // Configuration decides the log level, so it is loaded first
    let config = match load_config(cli.config).await {
        Ok(config) => config,
        Err(e) => {
            eprintln!("❌ {e:#}");
            std::process::exit(1);
        }
    };
    init_logging(&config.logging.level);

    let result = match cli.command {
        Commands::Gateway => cmd_gateway(config).await,
        Commands::Server => cmd_server(config).await,
        Commands::Client { refresh } => cmd_client(&config, refresh).await,
        Commands::ConnectToken { user_id } => cmd_connect_token(&config, user_id),
        Commands::Validate => {
            cmd_validate(&config);
            Ok(())
        }
        Commands::Keygen => Ok(()),
    };

    if let Err(e) = result {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

// ============================================
// Commands
// ============================================

async fn cmd_gateway(config: RelayConfig) -> anyhow::Result<()> {
    let gateway = Gateway::new(config).context("gateway configuration")?;
    gateway.run().await?;
    Ok(())
}

async fn cmd_server(config: RelayConfig) -> anyhow::Result<()> {
    let server = Server::new(config).context("server configuration")?;
    server.run().await?;
    Ok(())
}

async fn cmd_client(config: &RelayConfig, refresh: bool) -> anyhow::Result<()> {
    let mut client = Client::from_config(config).context("client configuration")?;
    if refresh {
        let authority = Authority::from_config(config).context("refresh needs the auth keys")?;
        client = client.with_refresher(Arc::new(authority));
    }

    client.run().await?;
    if client.session_lapsed() {
        anyhow::bail!("session token lapsed");
    }
    Ok(())
}

fn cmd_keygen() {
    let keys = KeyPair::generate();
    println!("private_key = \"{}\"", keys.private_key().to_base64());
    println!("public_key  = \"{}\"", keys.public_key());
}

fn cmd_connect_token(config: &RelayConfig, user_id: u64) -> anyhow::Result<()> {
    let authority = Authority::from_config(config).context("connect tokens need the auth keys")?;

    let terms = Terms {
        up_kbps: config.auth.envelope_up_kbps,
        down_kbps: config.auth.envelope_down_kbps,
        packets_per_second: config.auth.packets_per_second,
    };
    let token = authority.issue_connect_token(user_id, terms, unix_timestamp())?;
    info!(user_id, "Connect token issued");
    println!("{}", token.to_base64());
    Ok(())
}

fn cmd_validate(config: &RelayConfig) {
    println!("✅ Configuration is valid");
    println!();
    print!("{}", config.to_toml());
}

// ============================================
// Helper Functions
// ============================================

/// Initializes the tracing subscriber; `RUST_LOG` wins over `level`.
fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
        .with(filter)
        .try_init()
        .ok();
}

async fn load_config(path: Option<PathBuf>) -> anyhow::Result<RelayConfig> {
    let config = match path {
        Some(path) => RelayConfig::load(&path)
            .await
            .with_context(|| format!("loading {}", path.display()))?,
        None => RelayConfig::from_env().context("configuration from environment")?,
    };
    Ok(config)
}
