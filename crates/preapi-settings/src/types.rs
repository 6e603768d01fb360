//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase")]` and `#[serde(default)]`
//! so a settings file only needs the values it changes.

use std::time::Duration;

use preapi_core::retry::RetryConfig;
use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings type for the pre-api distributor.
///
/// # JSON Format
///
/// ```json
/// {
///   "hostIdentity": "preapi-eu-1",
///   "bus": { "url": "redis://cache:6379" },
///   "ingress": { "endpoints": ["redis://flips-a:6379", "redis://flips-b:6379"] }
/// }
/// ```
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PreApiSettings {
    /// Identity published in liveness beats. Falls back to `HOSTNAME`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host_identity: Option<String>,
    /// Logging configuration.
    pub logging: LoggingSettings,
    /// Health/metrics HTTP listener.
    pub server: ServerSettings,
    /// Cross-instance pub/sub bus.
    pub bus: BusSettings,
    /// Fast-track ingress endpoints.
    pub ingress: IngressSettings,
    /// Exclusivity window timing.
    pub fairness: FairnessSettings,
    /// Enrollment registry cycle.
    pub registry: RegistrySettings,
    /// Billing collaborator.
    pub billing: BillingSettings,
}

impl PreApiSettings {
    /// Identity of this process in liveness beats.
    pub fn host_identity(&self) -> String {
        self.host_identity
            .clone()
            .filter(|h| !h.is_empty())
            .unwrap_or_else(default_host_identity)
    }

    /// Reject combinations the runtime cannot honor.
    pub fn validate(&self) -> Result<()> {
        if self.fairness.jitter_min_ms >= self.fairness.jitter_max_ms {
            return Err(SettingsError::InvalidValue(format!(
                "fairness.jitterMinMs ({}) must be below fairness.jitterMaxMs ({})",
                self.fairness.jitter_min_ms, self.fairness.jitter_max_ms
            )));
        }
        if self.registry.refresh_interval_ms == 0 {
            return Err(SettingsError::InvalidValue(
                "registry.refreshIntervalMs must be positive".into(),
            ));
        }
        if self.fairness.ledger_poll_ms == 0 {
            return Err(SettingsError::InvalidValue(
                "fairness.ledgerPollMs must be positive".into(),
            ));
        }
        Ok(())
    }
}

fn default_host_identity() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| format!("preapi-{}", uuid::Uuid::now_v7().simple()))
}

// ─────────────────────────────────────────────────────────────────────────────
// Logging / server
// ─────────────────────────────────────────────────────────────────────────────

/// Logging configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of the compact format.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json: false,
        }
    }
}

/// Health and metrics HTTP listener.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Bind port (`0` auto-assigns).
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8088,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Transports
// ─────────────────────────────────────────────────────────────────────────────

/// Cross-instance pub/sub bus.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BusSettings {
    /// Redis URL of the shared bus. `None` runs single-instance.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Channel carrying purchase facts.
    pub purchase_channel: String,
    /// Channel carrying delivery facts.
    pub delivery_channel: String,
    /// Channel carrying liveness beats.
    pub beat_channel: String,
    /// Connect and resubscribe retry policy.
    pub retry: RetryConfig,
}

impl Default for BusSettings {
    fn default() -> Self {
        Self {
            url: None,
            purchase_channel: "auction_sell".into(),
            delivery_channel: "auction_sent".into(),
            beat_channel: "preapi_beat".into(),
            retry: RetryConfig {
                max_retries: 3,
                ..RetryConfig::default()
            },
        }
    }
}

/// Fast-track ingress endpoints.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct IngressSettings {
    /// Single legacy endpoint. When set, `endpoints` is ignored.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub legacy_endpoint: Option<String>,
    /// Redis URLs publishing fast-track flips.
    pub endpoints: Vec<String>,
    /// Channel carrying MessagePack flip events.
    pub channel: String,
    /// Per-endpoint liveness channel.
    pub beat_channel: String,
    /// Interval between per-endpoint beats.
    pub beat_interval_ms: u64,
    /// Interval between connection status log lines.
    pub status_interval_ms: u64,
    /// Connect and resubscribe retry policy.
    pub retry: RetryConfig,
}

impl IngressSettings {
    /// Endpoints to connect to; the legacy option wins when present.
    pub fn resolved_endpoints(&self) -> Vec<String> {
        match &self.legacy_endpoint {
            Some(legacy) if !legacy.is_empty() => vec![legacy.clone()],
            _ => self.endpoints.clone(),
        }
    }
}

impl Default for IngressSettings {
    fn default() -> Self {
        Self {
            legacy_endpoint: None,
            endpoints: Vec::new(),
            channel: "snipes".into(),
            beat_channel: "beat".into(),
            beat_interval_ms: 120_000,
            status_interval_ms: 150_000,
            retry: RetryConfig {
                max_retries: 6,
                base_delay_ms: 10_000,
                max_delay_ms: 120_000,
                jitter_factor: 0.2,
            },
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Distribution
// ─────────────────────────────────────────────────────────────────────────────

/// Exclusivity window timing.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FairnessSettings {
    /// Head start the holder gets over the window end.
    pub head_start_ms: u64,
    /// Floor on a non-holder's wait.
    pub min_fallback_wait_ms: u64,
    /// Lower bound of the post-delivery-fact jitter.
    pub jitter_min_ms: u64,
    /// Upper bound (exclusive) of the post-delivery-fact jitter.
    pub jitter_max_ms: u64,
    /// How long before window end the holder's receipt is checked.
    pub holder_guard_ms: u64,
    /// Ledger polling interval while a non-holder waits.
    pub ledger_poll_ms: u64,
    /// Upper bound on one send operation.
    pub send_timeout_ms: u64,
}

impl Default for FairnessSettings {
    fn default() -> Self {
        Self {
            head_start_ms: 2000,
            min_fallback_wait_ms: 1500,
            jitter_min_ms: 3000,
            jitter_max_ms: 5000,
            holder_guard_ms: 2500,
            ledger_poll_ms: 200,
            send_timeout_ms: 10_000,
        }
    }
}

/// Enrollment registry cycle.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RegistrySettings {
    /// Interval of the warning/refresh/beat cycle.
    pub refresh_interval_ms: u64,
    /// Warn connections expiring within this lead.
    pub warning_lead_ms: u64,
    /// Billing product whose holders form the roster.
    pub product_slug: String,
    /// Ledger entries older than this are pruned each cycle.
    pub ledger_retention_ms: u64,
}

impl RegistrySettings {
    /// Cycle interval as a [`Duration`].
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_interval_ms)
    }
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            refresh_interval_ms: 45_000,
            warning_lead_ms: 60_000,
            product_slug: "pre_api".into(),
            ledger_retention_ms: 300_000,
        }
    }
}

/// Billing collaborator.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BillingSettings {
    /// Base URL of the products service.
    pub base_url: String,
    /// Request timeout.
    pub timeout_ms: u64,
}

impl Default for BillingSettings {
    fn default() -> Self {
        Self {
            base_url: "http://payment:8080".into(),
            timeout_ms: 10_000,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
