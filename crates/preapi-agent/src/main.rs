//! Pre-api distributor binary: wires settings, the shared bus, ingress, the
//! registry cycle, and the health/metrics listener together.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use preapi_bus::CrossInstanceSync;
use preapi_bus::connect::{connect_bus, connect_endpoints};
use preapi_server::background::spawn_registry_cycle;
use preapi_server::{
    ConnectionRegistry, HttpBillingClient, IngressNormalizer, PreApiServer, PreApiService,
    ShutdownCoordinator, WindowTiming,
};

/// Pre-api flip distributor.
#[derive(Parser, Debug)]
#[command(name = "preapi-agent", about = "Pre-api flip distributor")]
struct Cli {
    /// Settings file (defaults to `PREAPI_SETTINGS` or `~/.preapi/settings.json`).
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Host to bind the health/metrics listener (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind (0 for auto-assign; overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Emit JSON log lines.
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    let settings_path = args
        .settings
        .unwrap_or_else(preapi_settings::loader::settings_path);
    let mut settings = preapi_settings::loader::load_settings_from_path(&settings_path)
        .with_context(|| format!("Failed to load settings from {}", settings_path.display()))?;
    if let Some(host) = args.host {
        settings.server.host = host;
    }
    if let Some(port) = args.port {
        settings.server.port = port;
    }

    preapi_core::logging::init_subscriber(
        &settings.logging.level,
        settings.logging.json || args.json_logs,
    );
    let metrics = match preapi_server::metrics::install_recorder() {
        Ok(handle) => Some(handle),
        Err(e) => {
            tracing::warn!(error = %e, "metrics recorder unavailable, /metrics disabled");
            None
        }
    };

    let host = settings.host_identity();
    let shutdown = Arc::new(ShutdownCoordinator::new());
    let cancel = shutdown.token();

    // Shared bus: unreachable means single-instance, not a startup failure
    let bus = connect_bus(&settings.bus, &cancel).await;
    let sync = Arc::new(
        CrossInstanceSync::new(host.clone(), (&settings.bus).into(), bus)
            .with_retry(settings.bus.retry.clone()),
    );
    shutdown.track(sync.start(&cancel).await);
    if sync.is_degraded() {
        tracing::warn!(
            host = %host,
            "cross-instance bus unavailable, fairness is local to this instance"
        );
    }

    let billing = Arc::new(
        HttpBillingClient::new(&settings.billing).context("Failed to build billing client")?,
    );
    let registry = Arc::new(ConnectionRegistry::new(
        billing,
        settings.registry.product_slug.clone(),
        std::time::Duration::from_millis(settings.registry.warning_lead_ms),
    ));
    let service = Arc::new(PreApiService::new(
        Arc::clone(&registry),
        Arc::clone(&sync),
        WindowTiming::from(&settings.fairness),
    ));
    shutdown.track([spawn_registry_cycle(
        Arc::clone(&registry),
        Arc::clone(&sync),
        &settings.registry,
        cancel.clone(),
    )]);

    // Fast-track ingress
    let endpoints = settings.ingress.resolved_endpoints();
    let transports = connect_endpoints(&endpoints, &settings.ingress.retry, &cancel).await;
    if transports.is_empty() {
        tracing::error!(
            configured = endpoints.len(),
            "no fast-track endpoint reachable, ingress disabled"
        );
    }
    let ingress = Arc::new(IngressNormalizer::new(
        service.clone(),
        settings.ingress.clone(),
        host.clone(),
    ));
    shutdown.track(ingress.start(&transports, &cancel).await);

    let server = PreApiServer::new(
        settings.server.clone(),
        service,
        metrics,
        Arc::clone(&shutdown),
    )
    .with_ingress_health(ingress.subscription_health());
    let (addr, handle) = server.listen().await.context("Failed to bind server")?;
    tracing::info!(host = %host, "pre-api distributor listening on http://{addr}");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;
    tracing::info!("shutting down");

    shutdown.track([handle]);
    shutdown.graceful_shutdown(None).await;
    Ok(())
}
