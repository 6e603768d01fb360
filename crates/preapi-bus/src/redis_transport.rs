//! Redis pub/sub transport.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use ::redis::AsyncCommands;
use ::redis::aio::MultiplexedConnection;
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use tracing::{debug, instrument};

use crate::errors::{BusError, Result};
use crate::transport::{Subscription, Transport};

/// A Redis endpoint.
///
/// Publishing shares one multiplexed connection. Every subscription opens its
/// own pub/sub connection, so a slow channel never stalls another. The
/// connected flag drops when a publish fails or a subscription stream ends,
/// and comes back with the next successful publish or subscribe.
#[derive(Debug)]
pub struct RedisTransport {
    endpoint: String,
    client: ::redis::Client,
    publisher: MultiplexedConnection,
    connected: Arc<AtomicBool>,
}

impl RedisTransport {
    /// Dial `endpoint`.
    ///
    /// Accepts a full `redis://` URL or a bare `host:port`.
    #[instrument(skip_all, fields(endpoint = %endpoint))]
    pub async fn connect(endpoint: &str) -> Result<Self> {
        let url = normalize_endpoint(endpoint);
        let client =
            ::redis::Client::open(url.as_str()).map_err(|e| BusError::connect(endpoint, e))?;
        let publisher = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| BusError::connect(endpoint, e))?;
        debug!("redis connection established");
        Ok(Self {
            endpoint: endpoint.to_owned(),
            client,
            publisher,
            connected: Arc::new(AtomicBool::new(true)),
        })
    }
}

#[async_trait]
impl Transport for RedisTransport {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    async fn publish(&self, channel: &str, payload: Bytes) -> Result<()> {
        let mut conn = self.publisher.clone();
        let result: ::redis::RedisResult<i64> = conn.publish(channel, payload.as_ref()).await;
        self.connected.store(result.is_ok(), Ordering::Relaxed);
        let _receivers = result.map_err(|e| BusError::publish(channel, e))?;
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<Subscription> {
        let subscribe_err = |e: ::redis::RedisError| BusError::Subscribe {
            endpoint: self.endpoint.clone(),
            channel: channel.to_owned(),
            reason: e.to_string(),
        };
        let subscribed = async {
            let mut pubsub = self.client.get_async_pubsub().await?;
            pubsub.subscribe(channel).await?;
            Ok::<_, ::redis::RedisError>(pubsub)
        };
        let pubsub = match subscribed.await {
            Ok(pubsub) => pubsub,
            Err(e) => {
                self.connected.store(false, Ordering::Relaxed);
                return Err(subscribe_err(e));
            }
        };
        self.connected.store(true, Ordering::Relaxed);

        let connected = Arc::clone(&self.connected);
        let closed = futures::stream::once(async move {
            connected.store(false, Ordering::Relaxed);
        })
        .filter_map(|()| futures::future::ready(None::<Bytes>));
        let stream = pubsub
            .into_on_message()
            .map(|msg| Bytes::copy_from_slice(msg.get_payload_bytes()))
            .chain(closed);
        Ok(Box::pin(stream))
    }
}

/// Turn a bare `host:port` into a `redis://` URL.
pub fn normalize_endpoint(endpoint: &str) -> String {
    let trimmed = endpoint.trim();
    if trimmed.contains("://") {
        trimmed.to_owned()
    } else {
        format!("redis://{trimmed}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn bare_host_gets_scheme() {
        assert_eq!(normalize_endpoint("cache:6379"), "redis://cache:6379");
    }

    #[test]
    fn url_is_kept() {
        assert_eq!(
            normalize_endpoint(" rediss://cache:6380/1 "),
            "rediss://cache:6380/1"
        );
    }

    #[tokio::test]
    async fn invalid_url_is_connect_error() {
        let result = RedisTransport::connect("unknown-scheme://nowhere").await;
        assert_matches!(
            result,
            Err(BusError::Connect { endpoint, .. }) if endpoint == "unknown-scheme://nowhere"
        );
    }
}
