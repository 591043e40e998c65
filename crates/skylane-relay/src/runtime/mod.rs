// ============================================
// File: crates/skylane-relay/src/runtime/mod.rs
// ============================================
//! # Worker Runtimes
//!
//! ## Creation Reason
//! Socket ownership and task lifecycle for the gateway and server roles.
//! The packet logic itself lives in `handlers`; this module moves bytes
//! between sockets and handlers and decides what an error means.
//!
//! ## Main Functionality
//! - [`gateway`]: `Gateway`, N workers with a public and an internal socket
//! - [`server`]: `Server`, N workers on one shared address
//! - Outcome dispatch shared by both
//!
//! ## Worker Model
//! ```text
//! ┌──────────────┐  ┌──────────────┐       ┌──────────────┐
//! │  worker 0    │  │  worker 1    │  ...  │  worker N-1  │
//! │ own sockets  │  │ own sockets  │       │ own sockets  │
//! │ own sessions │  │ own sessions │       │ own sessions │
//! └──────────────┘  └──────────────┘       └──────────────┘
//!        ▲ SO_REUSEPORT: the kernel pins a flow to one worker
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - Workers never share session state; do not add locks here
//! - Only an invariant violation ends a worker early
//!
//! ## Last Modified
//! v0.1.0 - Initial worker runtimes

use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use skylane_transport::{Transport, UdpTransport};

use crate::error::{RelayError, Result};
use crate::handlers::{Outbound, Route};

pub mod gateway;
pub mod server;

pub use gateway::Gateway;
pub use server::Server;

/// Receive buffer size; larger than any valid packet so oversized
/// datagrams reach the filter whole and are rejected there.
pub const RECV_BUFFER_BYTES: usize = 2048;

/// How long shutdown waits for each worker.
const JOIN_TIMEOUT: Duration = Duration::from_secs(5);

// ============================================
// Outcome Dispatch
// ============================================

/// Sends a handler's output and classifies its errors.
///
/// # Errors
/// Only `Invariant`; the worker must stop.
pub(crate) async fn deliver(
    worker: usize,
    outcome: Result<Option<Outbound<'_>>>,
    public: &UdpTransport,
    internal: Option<&UdpTransport>,
) -> Result<()> {
    match outcome {
        Ok(Some(out)) => {
            let socket = match out.route {
                Route::Public => public,
                Route::Internal => {
                    internal.ok_or_else(|| RelayError::invariant("internal route on a worker without one"))?
                }
            };
            if let Err(e) = socket.send(out.bytes, &out.dest).await {
                debug!(worker, dest = %out.dest, error = %e, "Send failed");
            }
            Ok(())
        }
        Ok(None) => Ok(()),
        Err(e) if e.is_invariant() => Err(e),
        Err(e) if e.is_drop() => {
            debug!(worker, error = %e, "Packet dropped");
            Ok(())
        }
        Err(e) => {
            warn!(worker, error = %e, "Packet processing failed");
            Ok(())
        }
    }
}

// ============================================
// Lifecycle Helpers
// ============================================

/// Waits for Ctrl+C or a programmatic shutdown.
pub(crate) async fn wait_for_shutdown(shutdown_rx: &mut broadcast::Receiver<()>) {
    tokio::select! {
        signal = tokio::signal::ctrl_c() => match signal {
            Ok(()) => info!("Received shutdown signal"),
            Err(e) => error!(error = %e, "Failed to listen for Ctrl+C; shutting down"),
        },
        _ = shutdown_rx.recv() => info!("Shutdown requested"),
    }
}

/// Joins worker tasks, giving each a bounded grace period.
pub(crate) async fn join_workers(role: &str, tasks: Vec<(usize, JoinHandle<()>)>) {
    for (worker, task) in tasks {
        match tokio::time::timeout(JOIN_TIMEOUT, task).await {
            Ok(Ok(())) => debug!(role, worker, "Worker completed"),
            Ok(Err(e)) => warn!(role, worker, error = %e, "Worker failed"),
            Err(_) => warn!(role, worker, "Worker timed out during shutdown"),
        }
    }
}
