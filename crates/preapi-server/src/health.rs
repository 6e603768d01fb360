//! `/health` endpoint.

use std::time::{Duration, Instant};

use chrono::Utc;
use preapi_bus::SubscriptionHealth;
use serde::Serialize;

use crate::service::PreApiService;

/// Peers silent for longer than this are not counted as live.
const PEER_LIVENESS: Duration = Duration::from_secs(5 * 60);

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// `"ok"`, or `"degraded"` when the shared bus or an ingress channel is
    /// unavailable.
    pub status: String,
    /// Seconds since startup.
    pub uptime_secs: u64,
    /// This instance's beat identity.
    pub host: String,
    /// Enrolled priority connections on this instance.
    pub enrolled: usize,
    /// Current priority roster size.
    pub roster_size: usize,
    /// Peer instances heard from recently.
    pub peers: usize,
    /// Whether cross-instance exclusivity is unavailable.
    pub degraded: bool,
    /// Ingress channels waiting to be resubscribed.
    pub ingress_down: usize,
}

/// Build a health response from the live service.
pub fn health_check(
    start_time: Instant,
    service: &PreApiService,
    ingress: Option<&SubscriptionHealth>,
) -> HealthResponse {
    let sync = service.sync();
    let degraded = sync.is_degraded();
    let ingress_down = ingress.map_or(0, SubscriptionHealth::down);
    HealthResponse {
        status: if degraded || ingress_down > 0 { "degraded" } else { "ok" }.into(),
        uptime_secs: start_time.elapsed().as_secs(),
        host: sync.host().to_owned(),
        enrolled: service.registry().len(),
        roster_size: service.registry().roster().len(),
        peers: sync.peers().live_peers(Utc::now(), PEER_LIVENESS).len(),
        degraded,
        ingress_down,
    }
}
