//! The pub/sub seam.
//!
//! Both the cross-instance bus and the fast-track ingress endpoints speak
//! plain publish/subscribe over named channels. [`Transport`] abstracts the
//! backend so production runs on Redis and tests run on [`crate::MemoryBus`].

use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;

use crate::errors::Result;

/// Stream of raw payloads received on one channel.
pub type Subscription = Pin<Box<dyn Stream<Item = Bytes> + Send>>;

/// A connected pub/sub endpoint.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Human-readable endpoint identity for logs.
    fn endpoint(&self) -> &str;

    /// Whether the last operation against the endpoint succeeded.
    fn is_connected(&self) -> bool;

    /// Publish `payload` on `channel`.
    async fn publish(&self, channel: &str, payload: Bytes) -> Result<()>;

    /// Subscribe to `channel`. The stream ends when the subscription drops.
    async fn subscribe(&self, channel: &str) -> Result<Subscription>;
}
