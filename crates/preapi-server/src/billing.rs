//! Billing collaborator: who currently holds the priority tier.

use std::time::Duration;

use async_trait::async_trait;
use preapi_settings::BillingSettings;
use thiserror::Error;
use tracing::debug;

/// Errors talking to the billing service.
#[derive(Debug, Error)]
pub enum BillingError {
    /// Transport failure or undecodable body.
    #[error("billing request failed: {0}")]
    Request(#[from] reqwest::Error),
    /// Non-success HTTP status.
    #[error("billing service returned {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body, for the log.
        body: String,
    },
}

/// Source of the priority roster.
#[async_trait]
pub trait BillingClient: Send + Sync {
    /// User ids currently holding `product_slug`, in roster order.
    async fn priority_holders(&self, product_slug: &str) -> Result<Vec<String>, BillingError>;
}

/// HTTP billing client.
///
/// `GET {base_url}/Products/service/{slug}/ids` returning a JSON array of
/// user ids.
pub struct HttpBillingClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpBillingClient {
    /// Build a client from settings.
    pub fn new(settings: &BillingSettings) -> Result<Self, BillingError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(settings.timeout_ms))
            .build()?;
        Ok(Self {
            client,
            base_url: settings.base_url.trim_end_matches('/').to_owned(),
        })
    }
}

#[async_trait]
impl BillingClient for HttpBillingClient {
    async fn priority_holders(&self, product_slug: &str) -> Result<Vec<String>, BillingError> {
        let url = format!("{}/Products/service/{product_slug}/ids", self.base_url);
        let resp = self.client.get(&url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(BillingError::Status {
                status: status.as_u16(),
                body,
            });
        }
        let users: Vec<String> = resp.json().await?;
        debug!(product_slug, count = users.len(), "fetched priority holders");
        Ok(users)
    }
}
