// ============================================
// File: crates/skylane-relay/src/runtime/gateway.rs
// ============================================
//! # Gateway Runtime
//!
//! ## Creation Reason
//! Runs the gateway role. Each worker binds the shared public address and
//! a private internal socket; the internal address travels in every relay
//! packet so the server's reply returns to the worker holding the session.
//!
//! ## ⚠️ Important Note for Next Developer
//! - The internal port must be 0 with more than one worker (enforced by
//!   config validation)
//!
//! ## Last Modified
//! v0.1.0 - Initial gateway runtime

use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use skylane_common::time::unix_timestamp;
use skylane_transport::{SocketOptions, Transport, UdpTransport};

use super::{deliver, join_workers, wait_for_shutdown, RECV_BUFFER_BYTES};
use crate::config::RelayConfig;
use crate::error::{RelayError, Result};
use crate::handlers::{GatewayContext, GatewayHandler};

/// The gateway role.
pub struct Gateway {
    config: RelayConfig,
    ctx: Arc<GatewayContext>,
    shutdown_tx: broadcast::Sender<()>,
}

impl Gateway {
    /// Creates the gateway from configuration.
    ///
    /// # Errors
    /// Configuration errors for keys, magic or addresses.
    pub fn new(config: RelayConfig) -> Result<Self> {
        let ctx = Arc::new(GatewayContext::from_config(&config)?);
        let (shutdown_tx, _) = broadcast::channel(1);
        Ok(Self {
            config,
            ctx,
            shutdown_tx,
        })
    }

    /// Runs until Ctrl+C or [`Gateway::shutdown`].
    ///
    /// # Errors
    /// `StartupFailed` if a socket cannot be bound.
    pub async fn run(&self) -> Result<()> {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let tasks = self.spawn_workers().await?;

        info!(
            address = %self.config.network.gateway_address,
            server = %self.ctx.server_address(),
            workers = tasks.len(),
            gateway_id = self.ctx.gateway_id(),
            "Gateway started"
        );

        wait_for_shutdown(&mut shutdown_rx).await;
        let _ = self.shutdown_tx.send(());
        join_workers("gateway", tasks).await;

        info!("Gateway shutdown complete");
        Ok(())
    }

    /// Triggers shutdown programmatically.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    async fn spawn_workers(&self) -> Result<Vec<(usize, JoinHandle<()>)>> {
        let net = &self.config.network;
        let public_options = SocketOptions::shared().with_buffers(net.read_buffer, net.write_buffer);
        let internal_options = SocketOptions::default().with_buffers(net.read_buffer, net.write_buffer);

        let mut tasks = Vec::with_capacity(net.num_threads);
        for worker in 0..net.num_threads {
            let public = UdpTransport::bind_with(net.gateway_address, public_options)
                .await
                .map_err(|e| RelayError::startup_failed(format!("gateway public socket {worker}: {e}")))?;
            let internal = UdpTransport::bind_with(net.gateway_internal_address, internal_options)
                .await
                .map_err(|e| RelayError::startup_failed(format!("gateway internal socket {worker}: {e}")))?;

            let internal_address = internal.local_addr()?;
            debug!(worker, internal = %internal_address, "Gateway worker bound");

            let handler = GatewayHandler::new(Arc::clone(&self.ctx), internal_address);
            let shutdown_rx = self.shutdown_tx.subscribe();
            tasks.push((
                worker,
                tokio::spawn(run_worker(worker, public, internal, handler, shutdown_rx)),
            ));
        }
        Ok(tasks)
    }
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("ctx", &self.ctx)
            .field("workers", &self.config.network.num_threads)
            .finish()
    }
}

async fn run_worker(
    worker: usize,
    public: UdpTransport,
    internal: UdpTransport,
    mut handler: GatewayHandler,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let mut client_buf = vec![0u8; RECV_BUFFER_BYTES];
    let mut server_buf = vec![0u8; RECV_BUFFER_BYTES];

    loop {
        let delivered = tokio::select! {
            _ = shutdown_rx.recv() => break,
            received = public.recv(&mut client_buf) => match received {
                Ok((len, from)) => {
                    let outcome = handler.handle_client(&mut client_buf[..len], from, unix_timestamp());
                    deliver(worker, outcome, &public, Some(&internal)).await
                }
                Err(e) => {
                    if !public.is_active() {
                        break;
                    }
                    warn!(worker, error = %e, "Public receive failed");
                    Ok(())
                }
            },
            received = internal.recv(&mut server_buf) => match received {
                Ok((len, from)) => {
                    let outcome = handler.handle_server(&server_buf[..len], from, unix_timestamp());
                    deliver(worker, outcome, &public, Some(&internal)).await
                }
                Err(e) => {
                    if !internal.is_active() {
                        break;
                    }
                    warn!(worker, error = %e, "Internal receive failed");
                    Ok(())
                }
            },
        };
        if let Err(e) = delivered {
            error!(worker, error = %e, "Gateway worker aborting");
            break;
        }
    }

    for socket in [&public, &internal] {
        if let Err(e) = socket.shutdown().await {
            warn!(worker, error = %e, "Socket shutdown error");
        }
    }
    debug!(worker, sessions = handler.session_count(), "Gateway worker exiting");
}
