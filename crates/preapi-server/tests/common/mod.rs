//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use preapi_bus::{CrossInstanceSync, MemoryBus, SyncChannels, Transport};
use preapi_core::flip::DISPLAY_NAME_KEY;
use preapi_core::{FinderKind, FlipConnection, FlipEvent, RecentFlips};
use preapi_server::{BillingClient, BillingError, ConnectionRegistry, PreApiService, WindowTiming};
use tokio_util::sync::CancellationToken;

/// A session that records what it receives.
pub struct TestConnection {
    pub id: String,
    pub user: String,
    pub accept: AtomicBool,
    pub recent: RecentFlips,
}

impl TestConnection {
    pub fn new(id: &str, user: &str) -> Arc<Self> {
        Arc::new(Self {
            id: id.into(),
            user: user.into(),
            accept: AtomicBool::new(true),
            recent: RecentFlips::default(),
        })
    }

    pub fn refuse(&self) {
        self.accept.store(false, Ordering::SeqCst);
    }

    /// Display names of everything received, oldest first.
    pub fn received_names(&self) -> Vec<String> {
        self.recent
            .snapshot()
            .iter()
            .map(|f| f.display_name().unwrap_or_default().to_owned())
            .collect()
    }
}

#[async_trait]
impl FlipConnection for TestConnection {
    fn connection_id(&self) -> &str {
        &self.id
    }
    fn user_id(&self) -> &str {
        &self.user
    }
    async fn send_flip(&self, flip: Arc<FlipEvent>) -> bool {
        if !self.accept.load(Ordering::SeqCst) {
            return false;
        }
        self.recent.push(flip);
        true
    }
    fn recently_delivered(&self) -> Vec<Arc<FlipEvent>> {
        self.recent.snapshot()
    }
    async fn warn_expiry(&self, _expires_at: DateTime<Utc>) -> bool {
        true
    }
}

/// Billing that always returns the same roster.
pub struct StaticBilling(pub Vec<String>);

#[async_trait]
impl BillingClient for StaticBilling {
    async fn priority_holders(&self, _slug: &str) -> Result<Vec<String>, BillingError> {
        Ok(self.0.clone())
    }
}

/// One simulated distributor instance.
pub struct Instance {
    pub service: Arc<PreApiService>,
    pub sync: Arc<CrossInstanceSync>,
}

impl Instance {
    /// An instance on `bus` (or single-instance when `None`) with `roster`
    /// already loaded.
    pub async fn start(
        host: &str,
        bus: Option<&Arc<MemoryBus>>,
        roster: &[&str],
        cancel: &CancellationToken,
    ) -> Self {
        let transport = bus.map(|b| b.transport(host) as Arc<dyn Transport>);
        let sync = Arc::new(CrossInstanceSync::new(host, SyncChannels::default(), transport));
        let _readers = sync.start(cancel).await;

        let billing = Arc::new(StaticBilling(roster.iter().map(|u| (*u).to_owned()).collect()));
        let registry =
            Arc::new(ConnectionRegistry::new(billing, "pre_api", Duration::from_secs(60)));
        let _ = registry.refresh().await.unwrap();

        let service =
            Arc::new(PreApiService::new(registry, Arc::clone(&sync), WindowTiming::default()));
        Self { service, sync }
    }

    /// Enroll a new recording connection for an hour.
    pub fn connect(&self, id: &str, user: &str) -> Arc<TestConnection> {
        let conn = TestConnection::new(id, user);
        self.service
            .registry()
            .enroll(conn.clone(), Utc::now() + chrono::Duration::hours(1));
        conn
    }
}

/// An event actionable `window` from now, displayed as `name`.
pub fn flip(id: &str, key: i64, window: Duration, name: &str) -> FlipEvent {
    FlipEvent {
        id: id.into(),
        fairness_key: key,
        item_name: name.into(),
        tag: name.to_uppercase(),
        starting_bid: 900_000_000,
        target_price: 950_000_000,
        earliest_actionable: Utc::now() + chrono::Duration::from_std(window).unwrap(),
        finder: FinderKind::Sniper,
        metadata: BTreeMap::from([(DISPLAY_NAME_KEY.to_owned(), name.to_owned())]),
        attributes: BTreeMap::new(),
        additional_props: BTreeMap::new(),
        nbt: None,
    }
}
