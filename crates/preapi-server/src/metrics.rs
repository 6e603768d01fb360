//! Prometheus metrics recorder and `/metrics` rendering.

use metrics::{describe_counter, describe_gauge};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

pub use preapi_core::metric_names::*;

/// Install the Prometheus recorder globally.
///
/// Returns the handle used to render `/metrics`. Call once at startup,
/// before anything records.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    describe_metrics();
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// Render Prometheus text format.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

fn describe_metrics() {
    describe_counter!(FAST_TRACK_FLIPS_TOTAL, "Fast-track flips accepted by ingress");
    describe_counter!(INGRESS_DROPPED_TOTAL, "Ingress messages dropped as malformed");
    describe_counter!(DELIVERIES_TOTAL, "Flips delivered, by path");
    describe_counter!(DELIVERY_FAILURES_TOTAL, "Failed or timed-out deliveries");
    describe_counter!(MISSED_WINDOW_TOTAL, "Fallback deliveries after a missed window");
    describe_counter!(LEDGER_FACTS_TOTAL, "New ledger facts, by kind");
    describe_gauge!(ENROLLED_CONNECTIONS, "Enrolled priority connections");
    describe_gauge!(ROSTER_SIZE, "Priority roster size");
    describe_counter!(ROSTER_REFRESH_FAILURES_TOTAL, "Failed roster refreshes");
}
