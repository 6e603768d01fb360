//! Process-local record of delivery and purchase facts.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

/// Kind of fact stored in the ledger.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FactKind {
    /// Some recipient received the event.
    Delivered,
    /// Someone bought the listing.
    Purchased,
}

impl FactKind {
    /// Metric label for this kind.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Delivered => "delivered",
            Self::Purchased => "purchased",
        }
    }
}

/// Facts keyed by event id, each with the time it was first (delivered:
/// last) recorded.
///
/// Delivered facts are upserts. Purchased facts keep the first timestamp.
/// Entries are dropped by [`DeliveryLedger::prune_older_than`].
#[derive(Default)]
pub struct DeliveryLedger {
    delivered: DashMap<String, DateTime<Utc>>,
    purchased: DashMap<String, DateTime<Utc>>,
}

impl DeliveryLedger {
    /// Create an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a fact. Returns `true` if the id was not yet known for `kind`.
    pub fn record(&self, kind: FactKind, event_id: &str, at: DateTime<Utc>) -> bool {
        match kind {
            FactKind::Delivered => self.delivered.insert(event_id.to_owned(), at).is_none(),
            FactKind::Purchased => match self.purchased.entry(event_id.to_owned()) {
                Entry::Occupied(_) => false,
                Entry::Vacant(slot) => {
                    let _ = slot.insert(at);
                    true
                }
            },
        }
    }

    /// Record that `event_id` was delivered somewhere.
    pub fn record_delivered(&self, event_id: &str, at: DateTime<Utc>) -> bool {
        self.record(FactKind::Delivered, event_id, at)
    }

    /// Record that `event_id` was purchased.
    pub fn record_purchased(&self, event_id: &str, at: DateTime<Utc>) -> bool {
        self.record(FactKind::Purchased, event_id, at)
    }

    /// When `event_id` was last reported delivered.
    pub fn delivered_at(&self, event_id: &str) -> Option<DateTime<Utc>> {
        self.delivered.get(event_id).map(|at| *at)
    }

    /// When `event_id` was first reported purchased.
    pub fn purchased_at(&self, event_id: &str) -> Option<DateTime<Utc>> {
        self.purchased.get(event_id).map(|at| *at)
    }

    /// Whether a delivered fact exists for `event_id`.
    pub fn is_delivered(&self, event_id: &str) -> bool {
        self.delivered.contains_key(event_id)
    }

    /// Whether a purchased fact exists for `event_id`.
    pub fn is_purchased(&self, event_id: &str) -> bool {
        self.purchased.contains_key(event_id)
    }

    /// Drop facts recorded before `cutoff`. Returns how many were removed.
    pub fn prune_older_than(&self, cutoff: DateTime<Utc>) -> usize {
        let before = self.len();
        self.delivered.retain(|_, at| *at >= cutoff);
        self.purchased.retain(|_, at| *at >= cutoff);
        before - self.len()
    }

    /// Total number of facts held.
    pub fn len(&self) -> usize {
        self.delivered.len() + self.purchased.len()
    }

    /// Whether the ledger holds no facts.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
