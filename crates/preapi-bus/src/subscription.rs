//! Subscriptions that survive the endpoint going away.
//!
//! A [`ResilientSubscription`] owns one channel on one transport. When the
//! underlying stream ends or a subscribe attempt fails, it backs off with
//! [`RetryConfig::delay_for`] and subscribes again, until cancelled. Channels
//! that are currently unsubscribed are counted in a shared [`SubscriptionHealth`]
//! so callers can report degraded operation.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use bytes::Bytes;
use futures::StreamExt;
use preapi_core::retry::RetryConfig;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::errors::Result;
use crate::transport::{Subscription, Transport};

/// Number of channels in a group that are currently not subscribed.
#[derive(Debug, Default)]
pub struct SubscriptionHealth {
    down: AtomicUsize,
}

impl SubscriptionHealth {
    /// Create a tracker with every channel up.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Channels waiting to be (re)subscribed.
    pub fn down(&self) -> usize {
        self.down.load(Ordering::Relaxed)
    }

    /// Whether every tracked channel is subscribed.
    pub fn all_up(&self) -> bool {
        self.down() == 0
    }

    fn mark_down(&self) {
        let _ = self.down.fetch_add(1, Ordering::Relaxed);
    }

    fn mark_up(&self) {
        let _ = self.down.fetch_sub(1, Ordering::Relaxed);
    }
}

/// One channel, resubscribed whenever it drops.
pub struct ResilientSubscription {
    transport: Arc<dyn Transport>,
    channel: String,
    retry: RetryConfig,
    health: Arc<SubscriptionHealth>,
    current: Option<Subscription>,
    attempt: u32,
}

impl ResilientSubscription {
    /// Track `channel` on `transport`. Nothing is subscribed until
    /// [`Self::try_subscribe`] or [`Self::next`] runs; until then the channel
    /// counts as down in `health`.
    pub fn new(
        transport: Arc<dyn Transport>,
        channel: impl Into<String>,
        retry: RetryConfig,
        health: Arc<SubscriptionHealth>,
    ) -> Self {
        health.mark_down();
        Self {
            transport,
            channel: channel.into(),
            retry,
            health,
            current: None,
            attempt: 0,
        }
    }

    /// Channel this subscription follows.
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Endpoint this subscription follows.
    pub fn endpoint(&self) -> &str {
        self.transport.endpoint()
    }

    /// Whether a live stream is held right now.
    pub fn is_subscribed(&self) -> bool {
        self.current.is_some()
    }

    /// Make one subscribe attempt if not already subscribed.
    pub async fn try_subscribe(&mut self) -> Result<()> {
        if self.current.is_some() {
            return Ok(());
        }
        let subscription = self.transport.subscribe(&self.channel).await?;
        self.current = Some(subscription);
        self.health.mark_up();
        info!(endpoint = self.endpoint(), channel = %self.channel, "subscribed");
        Ok(())
    }

    /// Next payload on the channel, resubscribing as often as needed.
    ///
    /// Returns `None` only once `cancel` fires.
    pub async fn next(&mut self, cancel: &CancellationToken) -> Option<Bytes> {
        loop {
            if let Some(subscription) = self.current.as_mut() {
                let next = tokio::select! {
                    () = cancel.cancelled() => return None,
                    next = subscription.next() => next,
                };
                if let Some(payload) = next {
                    self.attempt = 0;
                    return Some(payload);
                }
                warn!(endpoint = self.endpoint(), channel = %self.channel, "subscription ended");
                self.current = None;
                self.health.mark_down();
                self.backoff(cancel).await?;
            } else if let Err(e) = self.try_subscribe().await {
                warn!(
                    endpoint = self.endpoint(),
                    channel = %self.channel,
                    attempt = self.attempt,
                    error = %e,
                    "resubscribe failed"
                );
                self.backoff(cancel).await?;
            }
        }
    }

    async fn backoff(&mut self, cancel: &CancellationToken) -> Option<()> {
        let delay = self.retry.delay_for(self.attempt);
        self.attempt = self.attempt.saturating_add(1);
        tokio::select! {
            () = cancel.cancelled() => None,
            () = tokio::time::sleep(delay) => Some(()),
        }
    }
}

impl Drop for ResilientSubscription {
    fn drop(&mut self) {
        if self.current.is_none() {
            self.health.mark_up();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::memory::MemoryBus;

    fn quick_retry() -> RetryConfig {
        RetryConfig {
            max_retries: 0,
            base_delay_ms: 100,
            max_delay_ms: 1000,
            jitter_factor: 0.0,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn resubscribes_after_stream_ends() {
        let bus = MemoryBus::new();
        let transport = bus.transport("a");
        let health = SubscriptionHealth::new();
        let mut sub = ResilientSubscription::new(
            transport.clone() as Arc<dyn Transport>,
            "ch",
            quick_retry(),
            Arc::clone(&health),
        );
        assert_eq!(health.down(), 1);
        sub.try_subscribe().await.unwrap();
        assert!(health.all_up());

        bus.drop_subscriptions("ch");
        let cancel = CancellationToken::new();
        let reader = tokio::spawn(async move {
            let payload = sub.next(&cancel).await;
            (payload, sub)
        });

        // wait until the reader has noticed the drop and resubscribed
        for _ in 0..50 {
            if bus.subscriber_count("ch") == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert_eq!(bus.subscriber_count("ch"), 1);
        assert!(health.all_up());

        transport.publish("ch", Bytes::from_static(b"again")).await.unwrap();
        let (payload, sub) = reader.await.unwrap();
        assert_eq!(payload, Some(Bytes::from_static(b"again")));
        assert!(sub.is_subscribed());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_subscribe_is_retried_until_the_endpoint_returns() {
        let bus = MemoryBus::new();
        let transport = bus.transport("a");
        transport.set_connected(false);
        let health = SubscriptionHealth::new();
        let mut sub = ResilientSubscription::new(
            transport.clone() as Arc<dyn Transport>,
            "ch",
            quick_retry(),
            Arc::clone(&health),
        );
        assert!(sub.try_subscribe().await.is_err());

        let cancel = CancellationToken::new();
        let reader_cancel = cancel.clone();
        let reader = tokio::spawn(async move { sub.next(&reader_cancel).await });

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(health.down(), 1);

        transport.set_connected(true);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(health.all_up());

        transport.publish("ch", Bytes::from_static(b"x")).await.unwrap();
        assert_eq!(reader.await.unwrap(), Some(Bytes::from_static(b"x")));
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_ends_a_retry_loop() {
        let bus = MemoryBus::new();
        let transport = bus.transport("a");
        transport.set_connected(false);
        let health = SubscriptionHealth::new();
        let mut sub = ResilientSubscription::new(
            transport as Arc<dyn Transport>,
            "ch",
            quick_retry(),
            Arc::clone(&health),
        );
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert_eq!(sub.next(&cancel).await, None);
        drop(sub);
        assert!(health.all_up());
    }
}
