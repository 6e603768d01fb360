//! Cross-instance synchronizer.
//!
//! Publishes delivered/purchased facts and liveness beats, and folds facts
//! received from other instances into the local [`DeliveryLedger`]. Every
//! publication is applied locally first, so the ledger is correct even when
//! the bus is down or this is the only instance.
//!
//! A bus that drops or refuses subscriptions never stops the process: the
//! readers keep resubscribing in the background and the instance reports
//! itself degraded until every channel is back.

use std::sync::Arc;

use bytes::Bytes;
use chrono::Utc;
use metrics::counter;
use preapi_core::metric_names::LEDGER_FACTS_TOTAL;
use preapi_core::retry::RetryConfig;
use preapi_settings::BusSettings;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, instrument, warn};

use crate::errors::Result;
use crate::ledger::{DeliveryLedger, FactKind};
use crate::peers::{BeatOrigin, PeerTracker};
use crate::subscription::{ResilientSubscription, SubscriptionHealth};
use crate::transport::Transport;
use crate::wire;

/// Channel names used on the shared bus.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SyncChannels {
    /// Purchase facts.
    pub purchase: String,
    /// Delivery facts.
    pub delivery: String,
    /// Liveness beats.
    pub beat: String,
}

impl From<&BusSettings> for SyncChannels {
    fn from(settings: &BusSettings) -> Self {
        Self {
            purchase: settings.purchase_channel.clone(),
            delivery: settings.delivery_channel.clone(),
            beat: settings.beat_channel.clone(),
        }
    }
}

impl Default for SyncChannels {
    fn default() -> Self {
        Self::from(&BusSettings::default())
    }
}

#[derive(Clone, Copy, Debug)]
enum Route {
    Fact(FactKind),
    Beat,
}

/// Shares delivery knowledge between distributor instances.
pub struct CrossInstanceSync {
    host: String,
    channels: SyncChannels,
    transport: Option<Arc<dyn Transport>>,
    retry: RetryConfig,
    subscriptions: Arc<SubscriptionHealth>,
    ledger: DeliveryLedger,
    peers: PeerTracker,
}

impl CrossInstanceSync {
    /// Create a synchronizer. `None` transport runs single-instance.
    pub fn new(
        host: impl Into<String>,
        channels: SyncChannels,
        transport: Option<Arc<dyn Transport>>,
    ) -> Self {
        let host = host.into();
        Self {
            peers: PeerTracker::new(host.clone()),
            host,
            channels,
            transport,
            retry: RetryConfig::default(),
            subscriptions: SubscriptionHealth::new(),
            ledger: DeliveryLedger::new(),
        }
    }

    /// Backoff used when a bus subscription has to be re-established.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// A synchronizer without a bus; facts only reach the local ledger.
    pub fn single_instance(host: impl Into<String>) -> Self {
        Self::new(host, SyncChannels::default(), None)
    }

    /// This instance's identity in beats.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Whether cross-instance exclusivity is currently unavailable: no bus,
    /// a failing bus, or a bus channel that is not subscribed.
    pub fn is_degraded(&self) -> bool {
        self.transport
            .as_ref()
            .is_none_or(|t| !t.is_connected() || !self.subscriptions.all_up())
    }

    /// The local fact ledger.
    pub fn ledger(&self) -> &DeliveryLedger {
        &self.ledger
    }

    /// Peer liveness learned from beats.
    pub fn peers(&self) -> &PeerTracker {
        &self.peers
    }

    /// Announce that `event_id` was delivered by this instance.
    #[instrument(skip(self), fields(host = %self.host))]
    pub async fn publish_delivered(&self, event_id: &str) {
        self.record(FactKind::Delivered, event_id);
        self.publish_fact(&self.channels.delivery, event_id).await;
    }

    /// Announce that `event_id` was purchased.
    #[instrument(skip(self), fields(host = %self.host))]
    pub async fn publish_purchased(&self, event_id: &str) {
        self.record(FactKind::Purchased, event_id);
        self.publish_fact(&self.channels.purchase, event_id).await;
    }

    /// Publish a liveness beat carrying this instance's identity.
    pub async fn publish_beat(&self) {
        self.publish(&self.channels.beat, wire::encode_beat(&self.host))
            .await;
    }

    /// Subscribe to the fact and beat channels.
    ///
    /// Returns one reader task per channel; each stops when `cancel` fires.
    /// A channel whose first subscribe fails is logged and retried by its
    /// reader, so startup never fails on the bus. Without a transport nothing
    /// is spawned.
    pub async fn start(self: &Arc<Self>, cancel: &CancellationToken) -> Vec<JoinHandle<()>> {
        let Some(transport) = &self.transport else {
            warn!(host = %self.host, "no cross-instance bus, running single-instance");
            return Vec::new();
        };

        let routes = [
            (&self.channels.delivery, Route::Fact(FactKind::Delivered)),
            (&self.channels.purchase, Route::Fact(FactKind::Purchased)),
            (&self.channels.beat, Route::Beat),
        ];

        let mut handles = Vec::with_capacity(routes.len());
        for (channel, route) in routes {
            let mut subscription = ResilientSubscription::new(
                Arc::clone(transport),
                channel.clone(),
                self.retry.clone(),
                Arc::clone(&self.subscriptions),
            );
            if let Err(e) = subscription.try_subscribe().await {
                error!(
                    endpoint = transport.endpoint(),
                    channel = %channel,
                    error = %e,
                    "bus subscribe failed, running degraded until it recovers"
                );
            }
            handles.push(self.spawn_reader(route, subscription, cancel.clone()));
        }
        handles
    }

    /// Fold a received fact payload into the ledger.
    ///
    /// Returns `true` when the fact was new.
    pub fn apply_fact(&self, kind: FactKind, channel: &str, payload: &[u8]) -> Result<bool> {
        let event_id = wire::decode_fact(channel, payload)?;
        Ok(self.record(kind, &event_id))
    }

    /// Handle a received beat payload.
    pub fn apply_beat(&self, channel: &str, payload: &[u8]) -> Result<BeatOrigin> {
        let host = wire::decode_beat(channel, payload)?;
        let origin = self.peers.observe(&host, Utc::now());
        match origin {
            BeatOrigin::Own => debug!(host = %host, "beat from self"),
            BeatOrigin::Peer => debug!(peer = %host, "beat from peer"),
        }
        Ok(origin)
    }

    fn spawn_reader(
        self: &Arc<Self>,
        route: Route,
        mut subscription: ResilientSubscription,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let sync = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(payload) = subscription.next(&cancel).await {
                let channel = subscription.channel();
                let outcome = match route {
                    Route::Fact(kind) => sync.apply_fact(kind, channel, &payload).map(|_| ()),
                    Route::Beat => sync.apply_beat(channel, &payload).map(|_| ()),
                };
                if let Err(e) = outcome {
                    warn!(error = %e, "dropping malformed bus message");
                }
            }
            debug!(channel = subscription.channel(), "bus reader stopped");
        })
    }

    fn record(&self, kind: FactKind, event_id: &str) -> bool {
        let fresh = self.ledger.record(kind, event_id, Utc::now());
        if fresh {
            counter!(LEDGER_FACTS_TOTAL, "kind" => kind.as_str()).increment(1);
        }
        fresh
    }

    async fn publish_fact(&self, channel: &str, event_id: &str) {
        match wire::encode_fact(channel, event_id) {
            Ok(payload) => self.publish(channel, payload).await,
            Err(e) => warn!(error = %e, "failed to encode fact"),
        }
    }

    async fn publish(&self, channel: &str, payload: Bytes) {
        let Some(transport) = &self.transport else {
            return;
        };
        if let Err(e) = transport.publish(channel, payload).await {
            warn!(endpoint = transport.endpoint(), error = %e, "bus publish failed");
        }
    }
}
