//! Liveness of other distributor instances, learned from beats.

use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;

/// Who sent a beat.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BeatOrigin {
    /// This process (our own publication echoed back).
    Own,
    /// Another instance.
    Peer,
}

/// Last-seen times of peer instances.
pub struct PeerTracker {
    own_host: String,
    last_seen: DashMap<String, DateTime<Utc>>,
}

impl PeerTracker {
    /// Create a tracker that treats `own_host` as self.
    pub fn new(own_host: impl Into<String>) -> Self {
        Self {
            own_host: own_host.into(),
            last_seen: DashMap::new(),
        }
    }

    /// Record a beat from `host` received at `at`.
    pub fn observe(&self, host: &str, at: DateTime<Utc>) -> BeatOrigin {
        if host == self.own_host {
            return BeatOrigin::Own;
        }
        let _ = self.last_seen.insert(host.to_owned(), at);
        BeatOrigin::Peer
    }

    /// Peers heard from within `within` of `now`, sorted by name.
    pub fn live_peers(&self, now: DateTime<Utc>, within: Duration) -> Vec<String> {
        let within = chrono::Duration::from_std(within).unwrap_or(chrono::Duration::MAX);
        let mut peers: Vec<String> = self
            .last_seen
            .iter()
            .filter(|entry| now.signed_duration_since(*entry.value()) <= within)
            .map(|entry| entry.key().clone())
            .collect();
        peers.sort();
        peers
    }

    /// Every peer ever heard from.
    pub fn known_count(&self) -> usize {
        self.last_seen.len()
    }
}
