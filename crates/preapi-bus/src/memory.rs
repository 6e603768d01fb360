//! In-process pub/sub bus.
//!
//! A [`MemoryBus`] plays the part of a shared Redis: several simulated
//! instances each hold their own [`MemoryTransport`] handle onto the same bus
//! and see each other's publications.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

use crate::errors::{BusError, Result};
use crate::transport::{Subscription, Transport};

const CHANNEL_CAPACITY: usize = 1024;

/// Shared in-memory bus.
#[derive(Default)]
pub struct MemoryBus {
    channels: DashMap<String, broadcast::Sender<Bytes>>,
}

impl MemoryBus {
    /// Create an empty bus.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// A transport handle onto this bus named `endpoint`.
    pub fn transport(self: &Arc<Self>, endpoint: &str) -> Arc<MemoryTransport> {
        Arc::new(MemoryTransport {
            bus: Arc::clone(self),
            endpoint: endpoint.to_owned(),
            connected: AtomicBool::new(true),
        })
    }

    /// Number of live subscribers on `channel`.
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.channels
            .get(channel)
            .map_or(0, |tx| tx.receiver_count())
    }

    /// End every open subscription on `channel`, as a dropped Redis
    /// connection would.
    pub fn drop_subscriptions(&self, channel: &str) {
        let _ = self.channels.remove(channel);
    }

    fn sender(&self, channel: &str) -> broadcast::Sender<Bytes> {
        self.channels
            .entry(channel.to_owned())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone()
    }
}

/// One instance's handle onto a [`MemoryBus`].
pub struct MemoryTransport {
    bus: Arc<MemoryBus>,
    endpoint: String,
    connected: AtomicBool,
}

impl MemoryTransport {
    /// Simulate losing (or regaining) the connection. While disconnected,
    /// publishing and subscribing fail.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::Relaxed);
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    async fn publish(&self, channel: &str, payload: Bytes) -> Result<()> {
        if !self.is_connected() {
            return Err(BusError::publish(channel, "transport disconnected"));
        }
        // No subscribers is not an error, same as Redis PUBLISH returning 0.
        let _ = self.bus.sender(channel).send(payload);
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<Subscription> {
        if !self.is_connected() {
            return Err(BusError::Subscribe {
                endpoint: self.endpoint.clone(),
                channel: channel.to_owned(),
                reason: "transport disconnected".into(),
            });
        }
        let rx = self.bus.sender(channel).subscribe();
        let stream = futures::stream::unfold(rx, |mut rx| async move {
            loop {
                match rx.recv().await {
                    Ok(payload) => return Some((payload, rx)),
                    Err(RecvError::Lagged(_)) => {}
                    Err(RecvError::Closed) => return None,
                }
            }
        });
        Ok(Box::pin(stream))
    }
}
