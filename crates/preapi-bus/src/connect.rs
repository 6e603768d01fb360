//! Connecting to pub/sub endpoints with bounded retries.

use std::future::Future;
use std::sync::Arc;

use preapi_core::retry::RetryConfig;
use preapi_settings::BusSettings;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::errors::Result;
use crate::redis_transport::RedisTransport;
use crate::transport::Transport;

/// Run `dial` until it succeeds, retries are exhausted, or `cancel` fires.
///
/// Waits [`RetryConfig::delay_for`] between attempts. Returns `None` when no
/// connection could be made.
pub async fn connect_with_retry<T, F, Fut>(
    endpoint: &str,
    retry: &RetryConfig,
    cancel: &CancellationToken,
    mut dial: F,
) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        match dial().await {
            Ok(conn) => {
                if attempt > 0 {
                    info!(endpoint, attempt, "connected after retrying");
                }
                return Some(conn);
            }
            Err(e) if attempt >= retry.max_retries => {
                error!(endpoint, attempts = attempt + 1, error = %e, "giving up on endpoint");
                return None;
            }
            Err(e) => {
                let delay = retry.delay_for(attempt);
                warn!(
                    endpoint,
                    attempt,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error = %e,
                    "connect failed, retrying"
                );
                tokio::select! {
                    () = cancel.cancelled() => return None,
                    () = tokio::time::sleep(delay) => {}
                }
                attempt += 1;
            }
        }
    }
}

/// Connect to the shared bus, or `None` to run single-instance.
pub async fn connect_bus(
    settings: &BusSettings,
    cancel: &CancellationToken,
) -> Option<Arc<dyn Transport>> {
    let Some(url) = settings.url.as_deref() else {
        info!("no bus url configured");
        return None;
    };
    let transport =
        connect_with_retry(url, &settings.retry, cancel, || RedisTransport::connect(url)).await?;
    Some(Arc::new(transport))
}

/// Connect to every ingress endpoint that answers; unreachable ones are
/// skipped after their retries run out.
pub async fn connect_endpoints(
    endpoints: &[String],
    retry: &RetryConfig,
    cancel: &CancellationToken,
) -> Vec<Arc<dyn Transport>> {
    let attempts = endpoints.iter().map(|endpoint| async move {
        connect_with_retry(endpoint, retry, cancel, || RedisTransport::connect(endpoint))
            .await
            .map(|t| Arc::new(t) as Arc<dyn Transport>)
    });
    futures::future::join_all(attempts)
        .await
        .into_iter()
        .flatten()
        .collect()
}
