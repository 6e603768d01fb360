//! `PreApiService`: the surface the session layer talks to.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use preapi_bus::CrossInstanceSync;
use preapi_core::{FlipConnection, FlipError, FlipEvent};
use tracing::{info, warn};

use crate::coordinator::{Distribution, FairnessCoordinator};
use crate::fairness::WindowTiming;
use crate::ingress::FlipSink;
use crate::purchase::{self, PurchaseParseError};
use crate::registry::ConnectionRegistry;

/// Result of handling a purchase notice.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PurchaseOutcome {
    /// A delivered event matched; a purchase fact was published.
    Published {
        /// The purchased event.
        event_id: String,
    },
    /// Nothing in the session's history matched.
    NoHistoryMatch {
        /// Item name from the notice.
        item_name: String,
        /// Price from the notice.
        price: i64,
    },
}

/// Pre-api distribution for one instance.
pub struct PreApiService {
    registry: Arc<ConnectionRegistry>,
    sync: Arc<CrossInstanceSync>,
    coordinator: FairnessCoordinator,
}

impl PreApiService {
    /// Wire a service from its parts.
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        sync: Arc<CrossInstanceSync>,
        timing: WindowTiming,
    ) -> Self {
        let coordinator =
            FairnessCoordinator::new(Arc::clone(&registry), Arc::clone(&sync), timing);
        Self {
            registry,
            sync,
            coordinator,
        }
    }

    /// Enroll a session with priority access until `expires_at`.
    ///
    /// Kicks off a roster refresh in the background so the new holder is
    /// rostered without waiting for the next cycle.
    pub fn enroll(&self, connection: Arc<dyn FlipConnection>, expires_at: DateTime<Utc>) {
        self.registry.enroll(connection, expires_at);
        let registry = Arc::clone(&self.registry);
        let _refresh = tokio::spawn(async move {
            let _ = registry.refresh().await;
        });
    }

    /// Whether `connection_id` currently holds priority access.
    pub fn is_enrolled(&self, connection_id: &str) -> bool {
        self.registry.is_enrolled(connection_id, Utc::now())
    }

    /// Deregister a session.
    pub fn remove(&self, connection_id: &str) -> bool {
        self.registry.remove(connection_id)
    }

    /// Whether a purchase fact exists for `event_id`.
    pub fn is_sold(&self, event_id: &str) -> bool {
        self.sync.ledger().is_purchased(event_id)
    }

    /// Handle a purchase notice relayed by `connection`.
    pub async fn purchase_message(
        &self,
        connection: &dyn FlipConnection,
        message: &str,
    ) -> Result<PurchaseOutcome, PurchaseParseError> {
        let notice = purchase::parse_purchase(message)?;
        let history = connection.recently_delivered();
        match purchase::match_recent(&notice, &history) {
            Some(flip) => {
                info!(
                    event_id = %flip.id,
                    user_id = connection.user_id(),
                    "matched purchase to delivered flip"
                );
                self.sync.publish_purchased(&flip.id).await;
                Ok(PurchaseOutcome::Published {
                    event_id: flip.id.clone(),
                })
            }
            None => {
                info!(
                    user_id = connection.user_id(),
                    item = %notice.item_name,
                    price = notice.price,
                    "purchase did not match any delivered flip"
                );
                Ok(PurchaseOutcome::NoHistoryMatch {
                    item_name: notice.item_name,
                    price: notice.price,
                })
            }
        }
    }

    /// Distribute `event` to the enrolled connections.
    pub fn distribute(&self, event: FlipEvent) -> Result<Distribution, FlipError> {
        self.coordinator.distribute(event)
    }

    /// The enrollment registry.
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// The cross-instance synchronizer.
    pub fn sync(&self) -> &Arc<CrossInstanceSync> {
        &self.sync
    }
}

impl FlipSink for PreApiService {
    fn accept(&self, event: FlipEvent) -> Result<(), FlipError> {
        match self.distribute(event) {
            Ok(_detached) => Ok(()),
            Err(e) => {
                warn!(error = %e, "refusing to distribute flip");
                Err(e)
            }
        }
    }
}
