//! Enrolled priority connections and the roster they compete over.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use metrics::{counter, gauge};
use preapi_core::FlipConnection;
use preapi_core::metric_names::{ENROLLED_CONNECTIONS, ROSTER_REFRESH_FAILURES_TOTAL};
use tracing::{debug, error, info, instrument, warn};

use crate::billing::{BillingClient, BillingError};
use crate::roster::PriorityRoster;

/// One enrolled session and when its priority access ends.
#[derive(Clone)]
pub struct EnrolledUser {
    /// The live session.
    pub connection: Arc<dyn FlipConnection>,
    /// End of priority access.
    pub expires_at: DateTime<Utc>,
}

/// Result of one warn/expire sweep.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Connections told their access ends soon.
    pub warned: usize,
    /// Connections removed because access already ended.
    pub expired: usize,
}

/// Sessions on this instance that hold priority access.
///
/// Keyed by [`FlipConnection::connection_id`]. Each instance enrolls only the
/// sessions connected to it.
pub struct ConnectionRegistry {
    enrolled: DashMap<String, EnrolledUser>,
    roster: PriorityRoster,
    billing: Arc<dyn BillingClient>,
    product_slug: String,
    warning_lead: Duration,
}

impl ConnectionRegistry {
    /// Create an empty registry fed by `billing`.
    pub fn new(
        billing: Arc<dyn BillingClient>,
        product_slug: impl Into<String>,
        warning_lead: std::time::Duration,
    ) -> Self {
        Self {
            enrolled: DashMap::new(),
            roster: PriorityRoster::new(),
            billing,
            product_slug: product_slug.into(),
            warning_lead: Duration::from_std(warning_lead).unwrap_or(Duration::MAX),
        }
    }

    /// Enroll `connection` until `expires_at`, or extend an existing
    /// enrollment.
    pub fn enroll(&self, connection: Arc<dyn FlipConnection>, expires_at: DateTime<Utc>) {
        let id = connection.connection_id().to_owned();
        let user_id = connection.user_id().to_owned();
        let _ = self.enrolled.insert(
            id.clone(),
            EnrolledUser {
                connection,
                expires_at,
            },
        );
        self.publish_gauge();
        info!(
            connection_id = %id,
            user_id = %user_id,
            %expires_at,
            enrolled = self.len(),
            "enrolled priority connection"
        );
    }

    /// Whether `connection_id` holds unexpired priority access at `now`.
    pub fn is_enrolled(&self, connection_id: &str, now: DateTime<Utc>) -> bool {
        self.enrolled
            .get(connection_id)
            .is_some_and(|e| e.expires_at > now)
    }

    /// Expiry of `connection_id`, if enrolled.
    pub fn expires_at(&self, connection_id: &str) -> Option<DateTime<Utc>> {
        self.enrolled.get(connection_id).map(|e| e.expires_at)
    }

    /// Deregister `connection_id`. Returns whether it was enrolled.
    pub fn remove(&self, connection_id: &str) -> bool {
        let removed = self.enrolled.remove(connection_id).is_some();
        if removed {
            self.publish_gauge();
            debug!(connection_id, "deregistered connection");
        }
        removed
    }

    /// Connections whose access has not ended at `now`.
    pub fn active_connections(&self, now: DateTime<Utc>) -> Vec<Arc<dyn FlipConnection>> {
        self.enrolled
            .iter()
            .filter(|e| e.expires_at > now)
            .map(|e| Arc::clone(&e.connection))
            .collect()
    }

    /// Number of enrolled connections, expired or not.
    pub fn len(&self) -> usize {
        self.enrolled.len()
    }

    /// Whether nothing is enrolled.
    pub fn is_empty(&self) -> bool {
        self.enrolled.is_empty()
    }

    /// The priority roster.
    pub fn roster(&self) -> &PriorityRoster {
        &self.roster
    }

    /// Warn connections expiring within the lead, then drop expired ones.
    ///
    /// Expired connections are removed without a warning. Each connection is
    /// warned at most once per sweep.
    pub async fn sweep(&self, now: DateTime<Utc>) -> SweepReport {
        let mut expiring = Vec::new();
        let mut expired = Vec::new();
        for entry in &self.enrolled {
            if entry.expires_at <= now {
                expired.push(entry.key().clone());
            } else if entry.expires_at - now <= self.warning_lead {
                expiring.push(entry.value().clone());
            }
        }

        let mut report = SweepReport::default();
        for user in expiring {
            if user.connection.warn_expiry(user.expires_at).await {
                report.warned += 1;
            } else {
                warn!(
                    connection_id = user.connection.connection_id(),
                    "failed to deliver expiry warning"
                );
            }
        }
        for id in expired {
            if self.remove(&id) {
                report.expired += 1;
            }
        }
        report
    }

    /// Reload the roster from billing. On failure the stale roster stays.
    #[instrument(skip(self), fields(product = %self.product_slug))]
    pub async fn refresh(&self) -> Result<usize, BillingError> {
        match self.billing.priority_holders(&self.product_slug).await {
            Ok(users) => {
                let count = users.len();
                self.roster.replace(users);
                debug!(count, "priority roster refreshed");
                Ok(count)
            }
            Err(e) => {
                counter!(ROSTER_REFRESH_FAILURES_TOTAL).increment(1);
                error!(
                    error = %e,
                    stale_size = self.roster.len(),
                    "failed to refresh priority roster"
                );
                Err(e)
            }
        }
    }

    fn publish_gauge(&self) {
        #[allow(clippy::cast_precision_loss)]
        let count = self.enrolled.len() as f64;
        gauge!(ENROLLED_CONNECTIONS).set(count);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use async_trait::async_trait;
    use parking_lot::Mutex;
    use preapi_core::{FlipEvent, RecentFlips};

    // ── Test doubles (shared with other unit tests in this crate) ───────

    pub(crate) struct FakeConnection {
        pub id: String,
        pub user: String,
        pub accept: AtomicBool,
        pub recent: RecentFlips,
        pub warnings: AtomicUsize,
        /// Sends attempted, accepted or not.
        pub sends: AtomicUsize,
        /// Accepted sends that never reach the history.
        pub lost_sends: AtomicUsize,
    }

    impl FakeConnection {
        pub fn new(id: &str, user: &str) -> Arc<Self> {
            Arc::new(Self {
                id: id.into(),
                user: user.into(),
                accept: AtomicBool::new(true),
                recent: RecentFlips::default(),
                warnings: AtomicUsize::new(0),
                sends: AtomicUsize::new(0),
                lost_sends: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl FlipConnection for FakeConnection {
        fn connection_id(&self) -> &str {
            &self.id
        }
        fn user_id(&self) -> &str {
            &self.user
        }
        async fn send_flip(&self, flip: Arc<FlipEvent>) -> bool {
            let _ = self.sends.fetch_add(1, Ordering::SeqCst);
            if !self.accept.load(Ordering::SeqCst) {
                return false;
            }
            let lost = self
                .lost_sends
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
            if lost.is_err() {
                self.recent.push(flip);
            }
            true
        }
        fn recently_delivered(&self) -> Vec<Arc<FlipEvent>> {
            self.recent.snapshot()
        }
        async fn warn_expiry(&self, _expires_at: DateTime<Utc>) -> bool {
            let _ = self.warnings.fetch_add(1, Ordering::SeqCst);
            true
        }
    }

    pub(crate) struct FakeBilling {
        pub responses: Mutex<VecDeque<Result<Vec<String>, u16>>>,
        pub calls: AtomicUsize,
    }

    impl FakeBilling {
        pub fn with(responses: Vec<Result<Vec<String>, u16>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
                calls: AtomicUsize::new(0),
            })
        }

        pub fn roster(users: &[&str]) -> Arc<Self> {
            Self::with(vec![Ok(users.iter().map(|u| (*u).to_owned()).collect())])
        }
    }

    #[async_trait]
    impl BillingClient for FakeBilling {
        async fn priority_holders(&self, _slug: &str) -> Result<Vec<String>, BillingError> {
            let _ = self.calls.fetch_add(1, Ordering::SeqCst);
            match self.responses.lock().pop_front() {
                Some(Ok(users)) => Ok(users),
                Some(Err(status)) => Err(BillingError::Status {
                    status,
                    body: String::new(),
                }),
                None => Err(BillingError::Status {
                    status: 500,
                    body: "exhausted".into(),
                }),
            }
        }
    }

    fn registry(billing: Arc<FakeBilling>) -> ConnectionRegistry {
        ConnectionRegistry::new(billing, "pre_api", std::time::Duration::from_secs(60))
    }

    // ── enrollment ──────────────────────────────────────────────────────

    #[test]
    fn enroll_then_is_enrolled() {
        let reg = registry(FakeBilling::with(vec![]));
        let now = Utc::now();
        reg.enroll(FakeConnection::new("c1", "A"), now + Duration::minutes(10));
        assert!(reg.is_enrolled("c1", now));
        assert!(!reg.is_enrolled("c2", now));
    }

    #[test]
    fn enroll_upserts_expiry() {
        let reg = registry(FakeBilling::with(vec![]));
        let now = Utc::now();
        let conn = FakeConnection::new("c1", "A");
        reg.enroll(conn.clone(), now + Duration::minutes(1));
        reg.enroll(conn, now + Duration::hours(1));
        assert_eq!(reg.len(), 1);
        assert_eq!(reg.expires_at("c1"), Some(now + Duration::hours(1)));
    }

    #[test]
    fn expired_connection_is_not_active() {
        let reg = registry(FakeBilling::with(vec![]));
        let now = Utc::now();
        reg.enroll(FakeConnection::new("gone", "A"), now - Duration::seconds(1));
        reg.enroll(FakeConnection::new("live", "B"), now + Duration::minutes(5));
        let active: Vec<_> = reg
            .active_connections(now)
            .iter()
            .map(|c| c.connection_id().to_owned())
            .collect();
        assert_eq!(active, ["live"]);
        assert!(!reg.is_enrolled("gone", now));
    }

    #[test]
    fn remove_reports_presence() {
        let reg = registry(FakeBilling::with(vec![]));
        reg.enroll(FakeConnection::new("c1", "A"), Utc::now() + Duration::minutes(5));
        assert!(reg.remove("c1"));
        assert!(!reg.remove("c1"));
        assert!(reg.is_empty());
    }

    // ── sweep ───────────────────────────────────────────────────────────

    #[tokio::test]
    async fn sweep_warns_expiring_and_removes_expired() {
        let reg = registry(FakeBilling::with(vec![]));
        let now = Utc::now();
        let soon = FakeConnection::new("soon", "A");
        let later = FakeConnection::new("later", "B");
        let gone = FakeConnection::new("gone", "C");
        reg.enroll(soon.clone(), now + Duration::seconds(30));
        reg.enroll(later.clone(), now + Duration::minutes(30));
        reg.enroll(gone.clone(), now - Duration::seconds(1));

        let report = reg.sweep(now).await;
        assert_eq!(report, SweepReport { warned: 1, expired: 1 });
        assert_eq!(soon.warnings.load(Ordering::SeqCst), 1);
        assert_eq!(later.warnings.load(Ordering::SeqCst), 0);
        assert_eq!(gone.warnings.load(Ordering::SeqCst), 0);
        assert_eq!(reg.len(), 2);
    }

    #[tokio::test]
    async fn repeated_sweeps_warn_once_each() {
        let reg = registry(FakeBilling::with(vec![]));
        let now = Utc::now();
        let soon = FakeConnection::new("soon", "A");
        reg.enroll(soon.clone(), now + Duration::seconds(50));
        let _ = reg.sweep(now).await;
        let _ = reg.sweep(now).await;
        assert_eq!(soon.warnings.load(Ordering::SeqCst), 2);
    }

    // ── refresh ─────────────────────────────────────────────────────────

    #[tokio::test]
    async fn refresh_replaces_roster() {
        let reg = registry(FakeBilling::roster(&["A", "B", "C"]));
        assert_eq!(reg.refresh().await.unwrap(), 3);
        assert_eq!(*reg.roster().snapshot(), ["A", "B", "C"]);
    }

    #[tokio::test]
    async fn failed_refresh_keeps_stale_roster() {
        let reg = registry(FakeBilling::with(vec![
            Ok(vec!["A".into(), "B".into()]),
            Err(503),
        ]));
        let _ = reg.refresh().await.unwrap();
        assert!(reg.refresh().await.is_err());
        assert_eq!(*reg.roster().snapshot(), ["A", "B"]);
    }

    #[tokio::test]
    async fn failed_refresh_keeps_enrollment() {
        let reg = registry(FakeBilling::with(vec![Err(500)]));
        let now = Utc::now();
        reg.enroll(FakeConnection::new("c1", "A"), now + Duration::minutes(5));
        assert!(reg.refresh().await.is_err());
        assert!(reg.is_enrolled("c1", now));
    }
}
