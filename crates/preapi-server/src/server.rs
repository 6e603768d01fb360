//! `PreApiServer`: health and metrics over HTTP.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use metrics_exporter_prometheus::PrometheusHandle;
use preapi_bus::SubscriptionHealth;
use preapi_settings::ServerSettings;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::health::{self, HealthResponse};
use crate::metrics;
use crate::service::PreApiService;
use crate::shutdown::ShutdownCoordinator;

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// The distribution service.
    pub service: Arc<PreApiService>,
    /// Metrics handle, when a recorder is installed.
    pub metrics: Option<PrometheusHandle>,
    /// When the server started.
    pub start_time: Instant,
    /// Ingress subscription state, when ingress runs.
    pub ingress: Option<Arc<SubscriptionHealth>>,
}

/// HTTP surface of one distributor instance.
pub struct PreApiServer {
    settings: ServerSettings,
    state: AppState,
    shutdown: Arc<ShutdownCoordinator>,
}

impl PreApiServer {
    /// Create a new server.
    pub fn new(
        settings: ServerSettings,
        service: Arc<PreApiService>,
        metrics: Option<PrometheusHandle>,
        shutdown: Arc<ShutdownCoordinator>,
    ) -> Self {
        Self {
            settings,
            state: AppState {
                service,
                metrics,
                start_time: Instant::now(),
                ingress: None,
            },
            shutdown,
        }
    }

    /// Report ingress subscription state on `/health`.
    #[must_use]
    pub fn with_ingress_health(mut self, ingress: Arc<SubscriptionHealth>) -> Self {
        self.state.ingress = Some(ingress);
        self
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        Router::new()
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .with_state(self.state.clone())
    }

    /// Bind and serve until the shutdown token fires.
    ///
    /// Returns the bound address and the serving task.
    pub async fn listen(&self) -> std::io::Result<(SocketAddr, JoinHandle<()>)> {
        let listener =
            TcpListener::bind((self.settings.host.as_str(), self.settings.port)).await?;
        let addr = listener.local_addr()?;
        let router = self.router();
        let token = self.shutdown.token();
        let handle = tokio::spawn(async move {
            let served = axum::serve(listener, router)
                .with_graceful_shutdown(async move { token.cancelled().await })
                .await;
            if let Err(e) = served {
                error!(error = %e, "http server failed");
            }
        });
        info!(%addr, "http listener bound");
        Ok((addr, handle))
    }

    /// Get the shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// Get the server settings.
    pub fn settings(&self) -> &ServerSettings {
        &self.settings
    }
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(health::health_check(
        state.start_time,
        &state.service,
        state.ingress.as_deref(),
    ))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => metrics::render(handle).into_response(),
        None => {
            (StatusCode::SERVICE_UNAVAILABLE, "metrics recorder not installed").into_response()
        }
    }
}
