//! Fast-track ingress.
//!
//! Subscribes to the detector channel on every configured endpoint, turns
//! each MessagePack payload into a canonical [`FlipEvent`], and hands it to a
//! [`FlipSink`]. Each message is handled on its own task so a slow sink never
//! holds up the subscription. Subscriptions that drop are re-established in
//! the background; [`IngressNormalizer::subscription_health`] counts the
//! channels currently down.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use metrics::counter;
use preapi_bus::beat::{spawn_beat_loop, spawn_status_loop};
use preapi_bus::{BeatOrigin, BusError, ResilientSubscription, SubscriptionHealth, Transport, wire};
use preapi_core::flip::INGRESS_PATH_KEY;
use preapi_core::metric_names::{FAST_TRACK_FLIPS_TOTAL, INGRESS_DROPPED_TOTAL};
use preapi_core::{FlipError, FlipEvent, Marker};
use preapi_settings::IngressSettings;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Profit above which an incoming flip is logged as scheduled.
const SCHEDULED_PROFIT_THRESHOLD: i64 = 2_000_000;

/// Receiver of normalized events.
pub trait FlipSink: Send + Sync {
    /// Take ownership of `event` for distribution.
    fn accept(&self, event: FlipEvent) -> Result<(), FlipError>;
}

/// Decode and normalize one ingress payload.
///
/// Rejects undecodable or invalid events, repairs the legacy metadata shape,
/// then marks the fast-track path.
pub fn normalize(payload: &[u8]) -> Result<FlipEvent, FlipError> {
    let mut event = FlipEvent::decode(payload)?;
    event.validate()?;
    if event.finder.has_legacy_metadata() {
        event.repair_legacy_metadata()?;
    }
    let _ = event.append_marker(Marker::FastTrack);
    event.tag_property(INGRESS_PATH_KEY, "redis");
    Ok(event)
}

fn drop_reason(err: &FlipError) -> &'static str {
    match err {
        FlipError::Decode(_) | FlipError::Encode(_) => "decode",
        FlipError::InvalidEvent { .. } => "invalid",
        FlipError::MetadataRepair { .. } => "repair",
    }
}

/// Normalizes fast-track events and forwards them to a sink.
pub struct IngressNormalizer {
    sink: Arc<dyn FlipSink>,
    settings: IngressSettings,
    host: String,
    subscriptions: Arc<SubscriptionHealth>,
}

impl IngressNormalizer {
    /// Create a normalizer forwarding to `sink`.
    pub fn new(
        sink: Arc<dyn FlipSink>,
        settings: IngressSettings,
        host: impl Into<String>,
    ) -> Self {
        Self {
            sink,
            settings,
            host: host.into(),
            subscriptions: SubscriptionHealth::new(),
        }
    }

    /// Ingress channels currently waiting to be resubscribed.
    pub fn subscription_health(&self) -> Arc<SubscriptionHealth> {
        Arc::clone(&self.subscriptions)
    }

    /// Handle one payload on its own task.
    pub fn dispatch(self: &Arc<Self>, payload: Bytes) -> JoinHandle<()> {
        let ingress = Arc::clone(self);
        tokio::spawn(async move { ingress.handle(&payload) })
    }

    /// Normalize `payload` and forward it. Malformed events are dropped.
    pub fn handle(&self, payload: &[u8]) {
        let event = match normalize(payload) {
            Ok(event) => event,
            Err(e) => {
                counter!(INGRESS_DROPPED_TOTAL, "reason" => drop_reason(&e)).increment(1);
                warn!(error = %e, "dropping fast-track message");
                return;
            }
        };
        counter!(FAST_TRACK_FLIPS_TOTAL).increment(1);
        let profit = event.profit();
        if profit > SCHEDULED_PROFIT_THRESHOLD {
            info!(event_id = %event.id, profit, item = %event.item_name, "scheduled");
        }
        let event_id = event.id.clone();
        if let Err(e) = self.sink.accept(event) {
            warn!(event_id = %event_id, error = %e, "sink rejected fast-track flip");
        }
    }

    /// Subscribe on every endpoint and start the per-endpoint beat and
    /// status loops.
    ///
    /// Four tasks run per endpoint until `cancel` fires. A channel that
    /// cannot be subscribed right away is logged and retried by its reader
    /// with the ingress backoff.
    pub async fn start(
        self: &Arc<Self>,
        endpoints: &[Arc<dyn Transport>],
        cancel: &CancellationToken,
    ) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::with_capacity(endpoints.len() * 4);
        for transport in endpoints {
            let flips = self.subscribe(transport, &self.settings.channel).await;
            let beats = self.subscribe(transport, &self.settings.beat_channel).await;
            handles.push(self.spawn_flip_reader(flips, cancel.clone()));
            handles.push(spawn_beat_reader(self.host.clone(), beats, cancel.clone()));
            handles.push(spawn_beat_loop(
                Arc::clone(transport),
                self.settings.beat_channel.clone(),
                self.host.clone(),
                Duration::from_millis(self.settings.beat_interval_ms),
                cancel.clone(),
            ));
            handles.push(spawn_status_loop(
                Arc::clone(transport),
                Duration::from_millis(self.settings.status_interval_ms),
                cancel.clone(),
            ));
        }
        handles
    }

    async fn subscribe(
        &self,
        transport: &Arc<dyn Transport>,
        channel: &str,
    ) -> ResilientSubscription {
        let mut subscription = ResilientSubscription::new(
            Arc::clone(transport),
            channel,
            self.settings.retry.clone(),
            Arc::clone(&self.subscriptions),
        );
        if let Err(e) = subscription.try_subscribe().await {
            error!(
                endpoint = transport.endpoint(),
                channel,
                error = %e,
                "ingress subscribe failed, retrying in the background"
            );
        }
        subscription
    }

    fn spawn_flip_reader(
        self: &Arc<Self>,
        mut flips: ResilientSubscription,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let ingress = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(payload) = flips.next(&cancel).await {
                let _ = ingress.dispatch(payload);
            }
        })
    }
}

/// Decode a beat and tell whether it is the one this instance sent.
fn read_beat(host: &str, channel: &str, payload: &[u8]) -> Result<(String, BeatOrigin), BusError> {
    let beat = wire::decode_beat(channel, payload)?;
    let origin = if beat == host {
        BeatOrigin::Own
    } else {
        BeatOrigin::Peer
    };
    Ok((beat, origin))
}

/// Log beats coming back on an endpoint's beat channel. Our own beat is the
/// proof the endpoint round-trips.
fn spawn_beat_reader(
    host: String,
    mut beats: ResilientSubscription,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(payload) = beats.next(&cancel).await {
            let endpoint = beats.endpoint();
            match read_beat(&host, beats.channel(), &payload) {
                Ok((beat, BeatOrigin::Own)) => info!(endpoint, host = %beat, "own beat received"),
                Ok((beat, BeatOrigin::Peer)) => debug!(endpoint, host = %beat, "beat received"),
                Err(e) => warn!(endpoint, error = %e, "malformed beat"),
            }
        }
    })
}
