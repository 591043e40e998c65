// ============================================
// File: crates/skylane-relay/src/runtime/server.rs
// ============================================
//! # Server Runtime
//!
//! ## Creation Reason
//! Runs the server role: N workers sharing the server address through
//! `SO_REUSEPORT`, each with its own `ServerHandler`.
//!
//! ## Last Modified
//! v0.1.0 - Initial server runtime

use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use skylane_common::time::unix_timestamp;
use skylane_transport::{SocketOptions, Transport, UdpTransport};

use super::{deliver, join_workers, wait_for_shutdown, RECV_BUFFER_BYTES};
use crate::config::RelayConfig;
use crate::error::{RelayError, Result};
use crate::handlers::{ServerContext, ServerHandler};

/// The server role.
pub struct Server {
    config: RelayConfig,
    ctx: Arc<ServerContext>,
    shutdown_tx: broadcast::Sender<()>,
}

impl Server {
    /// Creates the server from configuration.
    ///
    /// # Errors
    /// Configuration errors.
    pub fn new(config: RelayConfig) -> Result<Self> {
        let ctx = Arc::new(ServerContext::from_config(&config)?);
        let (shutdown_tx, _) = broadcast::channel(1);
        Ok(Self {
            config,
            ctx,
            shutdown_tx,
        })
    }

    /// Runs until Ctrl+C or [`Server::shutdown`].
    ///
    /// # Errors
    /// `StartupFailed` if a socket cannot be bound.
    pub async fn run(&self) -> Result<()> {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let tasks = self.spawn_workers().await?;

        info!(
            address = %self.config.network.server_address,
            workers = tasks.len(),
            server_id = self.config.server.server_id,
            "Server started"
        );

        wait_for_shutdown(&mut shutdown_rx).await;
        let _ = self.shutdown_tx.send(());
        join_workers("server", tasks).await;

        info!("Server shutdown complete");
        Ok(())
    }

    /// Triggers shutdown programmatically.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    async fn spawn_workers(&self) -> Result<Vec<(usize, JoinHandle<()>)>> {
        let net = &self.config.network;
        let options = SocketOptions::shared().with_buffers(net.read_buffer, net.write_buffer);

        let mut tasks = Vec::with_capacity(net.num_threads);
        for worker in 0..net.num_threads {
            let socket = UdpTransport::bind_with(net.server_address, options)
                .await
                .map_err(|e| RelayError::startup_failed(format!("server socket {worker}: {e}")))?;
            let handler = ServerHandler::new(Arc::clone(&self.ctx));
            let shutdown_rx = self.shutdown_tx.subscribe();
            tasks.push((worker, tokio::spawn(run_worker(worker, socket, handler, shutdown_rx))));
        }
        Ok(tasks)
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("address", &self.config.network.server_address)
            .field("workers", &self.config.network.num_threads)
            .finish()
    }
}

async fn run_worker(
    worker: usize,
    socket: UdpTransport,
    mut handler: ServerHandler,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let mut buf = vec![0u8; RECV_BUFFER_BYTES];

    loop {
        let delivered = tokio::select! {
            _ = shutdown_rx.recv() => break,
            received = socket.recv(&mut buf) => match received {
                Ok((len, from)) => {
                    let outcome = handler.handle(&buf[..len], from, unix_timestamp());
                    deliver(worker, outcome, &socket, None).await
                }
                Err(e) => {
                    if !socket.is_active() {
                        break;
                    }
                    warn!(worker, error = %e, "Receive failed");
                    Ok(())
                }
            },
        };
        if let Err(e) = delivered {
            error!(worker, error = %e, "Server worker aborting");
            break;
        }
    }

    if let Err(e) = socket.shutdown().await {
        warn!(worker, error = %e, "Socket shutdown error");
    }
    debug!(worker, sessions = handler.session_count(), "Server worker exiting");
}
