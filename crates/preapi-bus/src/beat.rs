//! Periodic liveness and status reporting for one endpoint.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::transport::Transport;
use crate::wire;

/// Publish `host` on `channel` every `interval` until cancelled.
pub fn spawn_beat_loop(
    transport: Arc<dyn Transport>,
    channel: String,
    host: String,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    match transport.publish(&channel, wire::encode_beat(&host)).await {
                        Ok(()) => debug!(endpoint = transport.endpoint(), "beat sent"),
                        Err(e) => warn!(endpoint = transport.endpoint(), error = %e, "beat failed"),
                    }
                }
            }
        }
    })
}

/// Log the endpoint's connection status every `interval` until cancelled.
pub fn spawn_status_loop(
    transport: Arc<dyn Transport>,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // first tick fires immediately; skip it so the first line is a real sample
        let _ = ticker.tick().await;
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    info!(
                        endpoint = transport.endpoint(),
                        connected = transport.is_connected(),
                        "ingress endpoint status"
                    );
                }
            }
        }
    })
}
