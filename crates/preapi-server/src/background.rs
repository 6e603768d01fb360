//! The periodic registry cycle.
//!
//! Every interval: warn connections about to lose priority, drop expired
//! ones, reload the roster, publish a liveness beat, and prune old ledger
//! facts.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use preapi_bus::CrossInstanceSync;
use preapi_settings::RegistrySettings;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::registry::{ConnectionRegistry, SweepReport};

/// What one cycle did.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Warn/expire sweep result.
    pub sweep: SweepReport,
    /// New roster size, or `None` if the refresh failed.
    pub roster_size: Option<usize>,
    /// Ledger facts pruned.
    pub pruned: usize,
}

/// Run one cycle.
pub async fn run_registry_cycle(
    registry: &ConnectionRegistry,
    sync: &CrossInstanceSync,
    retention: Duration,
) -> CycleReport {
    let now = Utc::now();
    let sweep = registry.sweep(now).await;
    let roster_size = registry.refresh().await.ok();
    sync.publish_beat().await;
    let cutoff = chrono::Duration::from_std(retention)
        .ok()
        .and_then(|r| now.checked_sub_signed(r))
        .unwrap_or(DateTime::<Utc>::MIN_UTC);
    let pruned = sync.ledger().prune_older_than(cutoff);

    let report = CycleReport {
        sweep,
        roster_size,
        pruned,
    };
    debug!(?report, "registry cycle complete");
    report
}

/// Run the cycle every `refresh_interval` until cancelled. The first cycle
/// runs immediately so the roster is loaded at startup.
pub fn spawn_registry_cycle(
    registry: Arc<ConnectionRegistry>,
    sync: Arc<CrossInstanceSync>,
    settings: &RegistrySettings,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    let interval = settings.refresh_interval();
    let retention = Duration::from_millis(settings.ledger_retention_ms);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    info!("registry cycle stopped");
                    break;
                }
                _ = ticker.tick() => {
                    let _ = run_registry_cycle(&registry, &sync, retention).await;
                }
            }
        }
    })
}
