//! The fairness coordinator.
//!
//! For each event one connection (per roster slot) is the *holder*: it gets
//! the event immediately. Everyone else waits out the exclusivity window,
//! polling the ledger; a delivery fact from another instance cuts the wait
//! down to a short jitter, and an expired window with no fact means the
//! holder missed it.
//!
//! Every connection gets its own task. The only join point is a monitor task
//! that collects outcomes for metrics and the [`DistributionReport`].

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use metrics::counter;
use preapi_bus::CrossInstanceSync;
use preapi_core::metric_names::{DELIVERIES_TOTAL, DELIVERY_FAILURES_TOTAL, MISSED_WINDOW_TOTAL};
use preapi_core::{FlipConnection, FlipError, FlipEvent, Marker};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::fairness::{self, WindowTiming};
use crate::registry::ConnectionRegistry;

/// Which delivery path produced a send.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeliveryPath {
    /// Immediate delivery to the round-robin holder.
    Holder,
    /// Post-window delivery after a delivery fact was observed.
    Fallback,
    /// Post-window delivery with no delivery fact; carries the missed marker.
    MissedWindow,
}

impl DeliveryPath {
    /// Metric label.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Holder => "holder",
            Self::Fallback => "fallback",
            Self::MissedWindow => "missed_window",
        }
    }
}

/// What happened to one connection's delivery.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// The event was sent.
    Delivered(DeliveryPath),
    /// A purchase fact arrived before the fallback; nothing was sent.
    SkippedPurchased,
    /// The send failed or timed out; the connection was deregistered.
    SendFailed,
    /// The task overran its budget and was abandoned.
    TimedOut,
}

/// One recipient of a distribution.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Recipient {
    /// Session identity.
    pub connection_id: String,
    /// User behind the session.
    pub user_id: String,
    /// Index the connection competed with.
    pub index: usize,
    /// Whether it is the holder for this event.
    pub holder: bool,
}

/// Outcome of one recipient's task.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeliveryRecord {
    /// Recipient this record belongs to.
    pub recipient: Recipient,
    /// What happened.
    pub outcome: DeliveryOutcome,
}

/// Every outcome of one distribution, in completion order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DistributionReport {
    /// Event distributed.
    pub event_id: String,
    /// Per-recipient outcomes.
    pub records: Vec<DeliveryRecord>,
}

impl DistributionReport {
    /// Outcome for `connection_id`, if it was a recipient.
    pub fn outcome_for(&self, connection_id: &str) -> Option<DeliveryOutcome> {
        self.records
            .iter()
            .find(|r| r.recipient.connection_id == connection_id)
            .map(|r| r.outcome)
    }
}

/// Handle on a running distribution.
///
/// Dropping it does not stop delivery.
#[derive(Debug)]
pub struct Distribution {
    /// Event being distributed.
    pub event_id: String,
    /// Roster slot holding the event.
    pub assigned_index: usize,
    /// Roster size used for the assignment.
    pub roster_size: usize,
    /// Time until the event became actionable, at dispatch.
    pub window: Duration,
    /// Connections a task was spawned for.
    pub recipients: Vec<Recipient>,
    monitor: JoinHandle<DistributionReport>,
}

impl Distribution {
    /// Connections treated as holder.
    pub fn holders(&self) -> impl Iterator<Item = &Recipient> {
        self.recipients.iter().filter(|r| r.holder)
    }

    /// Wait for every recipient task to finish.
    pub async fn report(self) -> DistributionReport {
        let event_id = self.event_id;
        self.monitor.await.unwrap_or_else(|e| {
            warn!(event_id = %event_id, error = %e, "distribution monitor failed");
            DistributionReport {
                event_id,
                records: Vec::new(),
            }
        })
    }
}

/// Shared state every delivery task needs.
#[derive(Clone)]
struct DeliveryContext {
    registry: Arc<ConnectionRegistry>,
    sync: Arc<CrossInstanceSync>,
    timing: WindowTiming,
}

/// Distributes events over the enrolled connections of this instance.
pub struct FairnessCoordinator {
    ctx: DeliveryContext,
}

impl FairnessCoordinator {
    /// Create a coordinator over `registry`, sharing facts through `sync`.
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        sync: Arc<CrossInstanceSync>,
        timing: WindowTiming,
    ) -> Self {
        Self {
            ctx: DeliveryContext {
                registry,
                sync,
                timing,
            },
        }
    }

    /// Window timing in use.
    pub fn timing(&self) -> &WindowTiming {
        &self.ctx.timing
    }

    /// Start distributing `event` to every active enrolled connection.
    ///
    /// Returns as soon as the per-connection tasks are spawned. The only
    /// error is an event that breaks a distribution invariant.
    #[instrument(skip_all, fields(event_id = %event.id))]
    pub fn distribute(&self, mut event: FlipEvent) -> Result<Distribution, FlipError> {
        event.validate()?;
        let _ = event.append_marker(Marker::Distributed);
        let base = Arc::new(event);

        let now = Utc::now();
        let roster = self.ctx.registry.roster().snapshot();
        let assigned_index = fairness::assigned_index(base.fairness_key, roster.len());
        let window = base.until_actionable(now);
        let connections = self.ctx.registry.active_connections(now);

        let profit = base.profit();
        if profit > 0 {
            info!(
                profit,
                recipients = connections.len(),
                roster_size = roster.len(),
                assigned_index,
                window_ms = millis(window),
                "distributing flip"
            );
        }

        let budget = self.ctx.timing.task_budget(window);
        let mut tasks = JoinSet::new();
        let mut recipients = Vec::with_capacity(connections.len());
        for connection in connections {
            let position = fairness::roster_position(&roster, connection.user_id());
            if position.is_none() {
                warn!(
                    user_id = connection.user_id(),
                    "connection user is not in the priority roster"
                );
            }
            let index = fairness::connection_index(position, roster.len());
            let recipient = Recipient {
                connection_id: connection.connection_id().to_owned(),
                user_id: connection.user_id().to_owned(),
                index,
                holder: index == assigned_index,
            };
            recipients.push(recipient.clone());

            let ctx = self.ctx.clone();
            let base = Arc::clone(&base);
            let _ = tasks.spawn(async move {
                let work = ctx.deliver(&connection, base, window, recipient.holder);
                let outcome = match tokio::time::timeout(budget, work).await {
                    Ok(outcome) => outcome,
                    Err(_) => {
                        let _ = ctx.registry.remove(&recipient.connection_id);
                        DeliveryOutcome::TimedOut
                    }
                };
                DeliveryRecord { recipient, outcome }
            });
        }

        let monitor = tokio::spawn(collect(base.id.clone(), tasks));
        Ok(Distribution {
            event_id: base.id.clone(),
            assigned_index,
            roster_size: roster.len(),
            window,
            recipients,
            monitor,
        })
    }
}

impl DeliveryContext {
    async fn deliver(
        &self,
        connection: &Arc<dyn FlipConnection>,
        base: Arc<FlipEvent>,
        window: Duration,
        holder: bool,
    ) -> DeliveryOutcome {
        if holder {
            self.deliver_as_holder(connection, base, window).await
        } else {
            self.deliver_as_fallback(connection, base, window).await
        }
    }

    async fn deliver_as_holder(
        &self,
        connection: &Arc<dyn FlipConnection>,
        base: Arc<FlipEvent>,
        window: Duration,
    ) -> DeliveryOutcome {
        let view = Arc::new(base.with_marker(Marker::Holder));
        info!(event_id = %base.id, user_id = connection.user_id(), holder = true, "sending flip");
        if !self.send(connection, Arc::clone(&view)).await {
            return DeliveryOutcome::SendFailed;
        }

        tokio::time::sleep(self.timing.holder_check_delay(window)).await;
        if !connection.has_recently_delivered(&base.id) {
            // one more try while the window is still open
            debug!(
                event_id = %base.id,
                user_id = connection.user_id(),
                "holder receipt not confirmed, sending again"
            );
            if !self.send(connection, view).await {
                return DeliveryOutcome::SendFailed;
            }
        }
        if connection.has_recently_delivered(&base.id) {
            self.sync.publish_delivered(&base.id).await;
        } else {
            debug!(
                event_id = %base.id,
                user_id = connection.user_id(),
                "holder receipt still not confirmed"
            );
        }
        DeliveryOutcome::Delivered(DeliveryPath::Holder)
    }

    async fn deliver_as_fallback(
        &self,
        connection: &Arc<dyn FlipConnection>,
        base: Arc<FlipEvent>,
        window: Duration,
    ) -> DeliveryOutcome {
        let ledger = self.sync.ledger();
        let wait = self.timing.non_holder_wait(window);
        let mut deadline = Instant::now() + wait;
        let mut fact_seen = false;
        debug!(
            event_id = %base.id,
            user_id = connection.user_id(),
            wait_ms = millis(wait),
            "waiting for holder"
        );

        loop {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            if !fact_seen && ledger.is_delivered(&base.id) {
                fact_seen = true;
                deadline = WindowTiming::shortened(deadline, now, self.timing.jitter());
                debug!(
                    event_id = %base.id,
                    remaining_ms = millis(deadline - now),
                    "delivery fact seen, shortening wait"
                );
                continue;
            }
            tokio::time::sleep_until(deadline.min(now + self.timing.poll_interval)).await;
        }

        if ledger.is_purchased(&base.id) {
            debug!(
                event_id = %base.id,
                user_id = connection.user_id(),
                "already purchased, skipping fallback"
            );
            return DeliveryOutcome::SkippedPurchased;
        }

        let (view, path) = if fact_seen || ledger.is_delivered(&base.id) {
            (base, DeliveryPath::Fallback)
        } else {
            (Arc::new(base.with_marker(Marker::MissedWindow)), DeliveryPath::MissedWindow)
        };
        info!(
            event_id = %view.id,
            user_id = connection.user_id(),
            holder = false,
            path = path.as_str(),
            "sending flip"
        );
        if self.send(connection, view).await {
            DeliveryOutcome::Delivered(path)
        } else {
            DeliveryOutcome::SendFailed
        }
    }

    /// Send with a timeout. A failed send deregisters the connection, as does
    /// a successful send to a connection whose access has since ended.
    async fn send(&self, connection: &Arc<dyn FlipConnection>, view: Arc<FlipEvent>) -> bool {
        let id = connection.connection_id();
        let delivered = matches!(
            tokio::time::timeout(self.timing.send_timeout, connection.send_flip(view)).await,
            Ok(true)
        );
        if !delivered {
            info!(connection_id = id, user_id = connection.user_id(), "send failed, deregistering");
            let _ = self.registry.remove(id);
        } else if !self.registry.is_enrolled(id, Utc::now()) && self.registry.remove(id) {
            info!(connection_id = id, "priority access ended, deregistered");
        }
        delivered
    }
}

async fn collect(event_id: String, mut tasks: JoinSet<DeliveryRecord>) -> DistributionReport {
    let mut records = Vec::with_capacity(tasks.len());
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(record) => {
                match record.outcome {
                    DeliveryOutcome::Delivered(path) => {
                        counter!(DELIVERIES_TOTAL, "path" => path.as_str()).increment(1);
                        if path == DeliveryPath::MissedWindow {
                            counter!(MISSED_WINDOW_TOTAL).increment(1);
                        }
                    }
                    DeliveryOutcome::SendFailed | DeliveryOutcome::TimedOut => {
                        counter!(DELIVERY_FAILURES_TOTAL).increment(1);
                    }
                    DeliveryOutcome::SkippedPurchased => {}
                }
                records.push(record);
            }
            Err(e) => warn!(event_id = %event_id, error = %e, "delivery task failed"),
        }
    }
    debug!(event_id = %event_id, recipients = records.len(), "distribution complete");
    DistributionReport { event_id, records }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::atomic::Ordering;

    use assert_matches::assert_matches;
    use preapi_core::FinderKind;
    use preapi_core::flip::DISPLAY_NAME_KEY;

    use crate::registry::tests::{FakeBilling, FakeConnection};

    fn event(id: &str, key: i64, window: Duration) -> FlipEvent {
        FlipEvent {
            id: id.into(),
            fairness_key: key,
            item_name: "Hyperion".into(),
            tag: "HYPERION".into(),
            starting_bid: 900_000_000,
            target_price: 950_000_000,
            earliest_actionable: Utc::now() + chrono::Duration::from_std(window).unwrap(),
            finder: FinderKind::Sniper,
            metadata: BTreeMap::from([(DISPLAY_NAME_KEY.to_owned(), "Hyperion".to_owned())]),
            attributes: BTreeMap::new(),
            additional_props: BTreeMap::new(),
            nbt: None,
        }
    }

    async fn setup(
        users: &[&str],
    ) -> (
        FairnessCoordinator,
        Arc<ConnectionRegistry>,
        Arc<CrossInstanceSync>,
        Vec<Arc<FakeConnection>>,
    ) {
        let registry = Arc::new(ConnectionRegistry::new(
            FakeBilling::roster(users),
            "pre_api",
            Duration::from_secs(60),
        ));
        let _ = registry.refresh().await.unwrap();
        let mut conns = Vec::new();
        for (i, user) in users.iter().enumerate() {
            let conn = FakeConnection::new(&format!("conn-{i}"), user);
            registry.enroll(conn.clone(), Utc::now() + chrono::Duration::hours(1));
            conns.push(conn);
        }
        let sync = Arc::new(CrossInstanceSync::single_instance("test"));
        let coordinator = FairnessCoordinator::new(
            Arc::clone(&registry),
            Arc::clone(&sync),
            WindowTiming::default(),
        );
        (coordinator, registry, sync, conns)
    }

    fn last_name(conn: &FakeConnection) -> String {
        conn.recent.snapshot().last().unwrap().display_name().unwrap().to_owned()
    }

    // ── validation ──────────────────────────────────────────────────────

    #[tokio::test]
    async fn unknown_finder_is_rejected() {
        let (coordinator, ..) = setup(&["A"]).await;
        let mut bad = event("e1", 1, Duration::from_secs(5));
        bad.finder = FinderKind::Unknown;
        assert_matches!(coordinator.distribute(bad), Err(FlipError::InvalidEvent { .. }));
    }

    #[tokio::test]
    async fn empty_id_is_rejected() {
        let (coordinator, ..) = setup(&["A"]).await;
        assert!(coordinator.distribute(event("", 1, Duration::from_secs(5))).is_err());
    }

    // ── holder selection ────────────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn exactly_one_holder_with_full_roster() {
        let (coordinator, ..) = setup(&["A", "B", "C"]).await;
        let dist = coordinator.distribute(event("e1", 7, Duration::from_secs(10))).unwrap();
        assert_eq!(dist.assigned_index, 1);
        let holders: Vec<_> = dist.holders().map(|r| r.user_id.clone()).collect();
        assert_eq!(holders, ["B"]);
        let _ = dist.report().await;
    }

    #[tokio::test(start_paused = true)]
    async fn empty_roster_makes_everyone_holder() {
        let registry = Arc::new(ConnectionRegistry::new(
            FakeBilling::with(vec![]),
            "pre_api",
            Duration::from_secs(60),
        ));
        registry.enroll(FakeConnection::new("c1", "A"), Utc::now() + chrono::Duration::hours(1));
        registry.enroll(FakeConnection::new("c2", "B"), Utc::now() + chrono::Duration::hours(1));
        let coordinator = FairnessCoordinator::new(
            registry,
            Arc::new(CrossInstanceSync::single_instance("test")),
            WindowTiming::default(),
        );
        let dist = coordinator.distribute(event("e1", 99, Duration::ZERO)).unwrap();
        assert_eq!(dist.holders().count(), 2);
        let _ = dist.report().await;
    }

    // ── holder path ─────────────────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn holder_gets_marked_view_immediately_and_publishes_receipt() {
        let (coordinator, _, sync, conns) = setup(&["A", "B", "C"]).await;
        let start = Instant::now();
        let dist = coordinator.distribute(event("e1", 7, Duration::from_secs(10))).unwrap();

        // holder send happens before any timer fires
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;
        assert_eq!(conns[1].recent.len(), 1);
        assert_eq!(last_name(&conns[1]), "Hyperion§8.§c.");

        let report = dist.report().await;
        assert_eq!(
            report.outcome_for("conn-1"),
            Some(DeliveryOutcome::Delivered(DeliveryPath::Holder))
        );
        assert!(sync.ledger().is_delivered("e1"));
        assert!(start.elapsed() >= Duration::from_millis(7400));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_holder_send_deregisters() {
        let (coordinator, registry, sync, conns) = setup(&["A", "B", "C"]).await;
        conns[1].accept.store(false, Ordering::SeqCst);

        let report = coordinator
            .distribute(event("e1", 7, Duration::from_secs(10)))
            .unwrap()
            .report()
            .await;
        assert_eq!(report.outcome_for("conn-1"), Some(DeliveryOutcome::SendFailed));
        assert!(!registry.is_enrolled("conn-1", Utc::now()));
        assert!(!sync.ledger().is_delivered("e1"));
    }

    #[tokio::test(start_paused = true)]
    async fn unconfirmed_holder_is_sent_once_more() {
        let (coordinator, _, sync, conns) = setup(&["A", "B", "C"]).await;
        conns[1].lost_sends.store(1, Ordering::SeqCst);

        let report = coordinator
            .distribute(event("e1", 7, Duration::from_secs(10)))
            .unwrap()
            .report()
            .await;
        assert_eq!(
            report.outcome_for("conn-1"),
            Some(DeliveryOutcome::Delivered(DeliveryPath::Holder))
        );
        assert_eq!(conns[1].sends.load(Ordering::SeqCst), 2);
        assert_eq!(last_name(&conns[1]), "Hyperion§8.§c.");
        assert!(sync.ledger().is_delivered("e1"));
    }

    #[tokio::test(start_paused = true)]
    async fn holder_is_not_resent_more_than_once() {
        let (coordinator, _, sync, conns) = setup(&["A", "B", "C"]).await;
        conns[1].lost_sends.store(5, Ordering::SeqCst);

        let report = coordinator
            .distribute(event("e1", 7, Duration::from_secs(10)))
            .unwrap()
            .report()
            .await;
        assert_eq!(
            report.outcome_for("conn-1"),
            Some(DeliveryOutcome::Delivered(DeliveryPath::Holder))
        );
        assert_eq!(conns[1].sends.load(Ordering::SeqCst), 2);
        assert!(!sync.ledger().is_delivered("e1"));
        // nobody confirmed, so the others fall through to the missed marker
        assert_eq!(last_name(&conns[0]), "Hyperion§8.§0.");
    }

    #[tokio::test(start_paused = true)]
    async fn confirmed_holder_is_sent_once() {
        let (coordinator, _, _, conns) = setup(&["A", "B", "C"]).await;
        let _ = coordinator
            .distribute(event("e1", 7, Duration::from_secs(10)))
            .unwrap()
            .report()
            .await;
        assert_eq!(conns[1].sends.load(Ordering::SeqCst), 1);
    }

    // ── non-holder path ─────────────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn failed_fallback_send_deregisters() {
        let (coordinator, registry, _, conns) = setup(&["A", "B"]).await;
        conns[0].accept.store(false, Ordering::SeqCst);

        let report = coordinator
            .distribute(event("e1", 1, Duration::from_secs(10)))
            .unwrap()
            .report()
            .await;
        assert_eq!(report.outcome_for("conn-0"), Some(DeliveryOutcome::SendFailed));
        assert!(!registry.is_enrolled("conn-0", Utc::now()));
        assert!(registry.is_enrolled("conn-1", Utc::now()));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_connection_is_left_out_of_the_next_distribution() {
        let (coordinator, _, _, conns) = setup(&["A", "B"]).await;
        conns[0].accept.store(false, Ordering::SeqCst);
        let _ = coordinator
            .distribute(event("e1", 1, Duration::from_secs(10)))
            .unwrap()
            .report()
            .await;
        assert_eq!(conns[0].sends.load(Ordering::SeqCst), 1);

        // it would accept now, but it is no longer enrolled
        conns[0].accept.store(true, Ordering::SeqCst);
        let dist = coordinator
            .distribute(event("e2", 1, Duration::from_secs(10)))
            .unwrap();
        let ids: Vec<_> = dist.recipients.iter().map(|r| r.connection_id.as_str()).collect();
        assert_eq!(ids, ["conn-1"]);
        let report = dist.report().await;
        assert_eq!(report.records.len(), 1);
        assert_eq!(conns[0].sends.load(Ordering::SeqCst), 1);
        assert!(conns[0].recent.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn non_holders_miss_window_without_delivery_fact() {
        let (coordinator, _, _, conns) = setup(&["A", "B"]).await;
        // holder B refuses, so no delivery fact is ever published
        conns[1].accept.store(false, Ordering::SeqCst);

        let start = Instant::now();
        let report = coordinator
            .distribute(event("e1", 1, Duration::from_secs(10)))
            .unwrap()
            .report()
            .await;
        assert_eq!(
            report.outcome_for("conn-0"),
            Some(DeliveryOutcome::Delivered(DeliveryPath::MissedWindow))
        );
        assert_eq!(last_name(&conns[0]), "Hyperion§8.§0.");
        assert!(start.elapsed() >= Duration::from_millis(7900));
    }

    #[tokio::test(start_paused = true)]
    async fn delivery_fact_shortens_wait_to_jitter() {
        let (coordinator, _, sync, conns) = setup(&["A", "B"]).await;
        conns[1].accept.store(false, Ordering::SeqCst);

        let start = Instant::now();
        let dist = coordinator.distribute(event("e1", 1, Duration::from_secs(30))).unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        sync.publish_delivered("e1").await;

        let report = dist.report().await;
        assert_eq!(
            report.outcome_for("conn-0"),
            Some(DeliveryOutcome::Delivered(DeliveryPath::Fallback))
        );
        assert_eq!(last_name(&conns[0]), "Hyperion§8.");
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(4), "{elapsed:?}");
        assert!(elapsed < Duration::from_millis(6500), "{elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn short_window_is_floored() {
        let (coordinator, _, _, conns) = setup(&["A", "B"]).await;
        conns[1].accept.store(false, Ordering::SeqCst);

        let start = Instant::now();
        let _ = coordinator
            .distribute(event("e1", 1, Duration::ZERO))
            .unwrap()
            .report()
            .await;
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(1500), "{elapsed:?}");
        assert!(elapsed < Duration::from_millis(1800), "{elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn purchase_suppresses_fallback() {
        let (coordinator, _, sync, conns) = setup(&["A", "B"]).await;
        conns[1].accept.store(false, Ordering::SeqCst);

        let dist = coordinator.distribute(event("e1", 1, Duration::from_secs(10))).unwrap();
        sync.publish_purchased("e1").await;
        let report = dist.report().await;
        assert_eq!(report.outcome_for("conn-0"), Some(DeliveryOutcome::SkippedPurchased));
        assert!(conns[0].recent.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn shared_event_is_never_mutated_per_recipient() {
        let (coordinator, _, _, conns) = setup(&["A", "B", "C"]).await;
        conns[1].accept.store(false, Ordering::SeqCst);
        let _ = coordinator
            .distribute(event("e1", 7, Duration::from_secs(5)))
            .unwrap()
            .report()
            .await;
        // both non-holders got exactly one missed marker, not each other's
        assert_eq!(last_name(&conns[0]), "Hyperion§8.§0.");
        assert_eq!(last_name(&conns[2]), "Hyperion§8.§0.");
    }

    #[tokio::test(start_paused = true)]
    async fn expired_connection_is_excluded() {
        let (coordinator, registry, _, _) = setup(&["A"]).await;
        let stale = FakeConnection::new("stale", "A");
        registry.enroll(stale.clone(), Utc::now() - chrono::Duration::seconds(1));
        let dist = coordinator.distribute(event("e1", 0, Duration::ZERO)).unwrap();
        assert!(dist.recipients.iter().all(|r| r.connection_id != "stale"));
        let _ = dist.report().await;
        assert!(stale.recent.is_empty());
    }

    #[test]
    fn path_labels() {
        assert_eq!(DeliveryPath::Holder.as_str(), "holder");
        assert_eq!(DeliveryPath::MissedWindow.as_str(), "missed_window");
    }
}
