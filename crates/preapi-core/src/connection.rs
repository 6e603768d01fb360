//! Client session capability consumed by the distributor.
//!
//! The distributor never owns a session's lifecycle. The transport layer
//! implements [`FlipConnection`] for each live session and hands out
//! `Arc<dyn FlipConnection>` references for the duration of an enrollment.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::flip::FlipEvent;

/// Default number of delivered events remembered per session.
pub const DEFAULT_RECENT_CAPACITY: usize = 50;

/// One live client session.
#[async_trait]
pub trait FlipConnection: Send + Sync {
    /// Stable identity of this session, used as the enrollment key.
    fn connection_id(&self) -> &str;

    /// Identifier of the user behind the session (roster key).
    fn user_id(&self) -> &str;

    /// Deliver a flip. Returns `false` if the session is gone.
    async fn send_flip(&self, flip: Arc<FlipEvent>) -> bool;

    /// Previously delivered events, oldest first.
    fn recently_delivered(&self) -> Vec<Arc<FlipEvent>>;

    /// Tell the user their priority access ends at `expires_at`.
    ///
    /// Returns `false` if the message could not be delivered.
    async fn warn_expiry(&self, expires_at: DateTime<Utc>) -> bool;

    /// Whether an event with `event_id` is in the delivery history.
    fn has_recently_delivered(&self, event_id: &str) -> bool {
        self.recently_delivered().iter().any(|f| f.id == event_id)
    }
}

/// Bounded, ordered history of delivered flips.
///
/// Transports embed one per session to back
/// [`FlipConnection::recently_delivered`]. The oldest entry is evicted once
/// `capacity` is reached.
pub struct RecentFlips {
    entries: Mutex<VecDeque<Arc<FlipEvent>>>,
    capacity: usize,
}

impl RecentFlips {
    /// Create an empty history holding at most `capacity` events.
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity: capacity.max(1),
        }
    }

    /// Record a delivered event.
    pub fn push(&self, flip: Arc<FlipEvent>) {
        let mut entries = self.entries.lock();
        if entries.len() == self.capacity {
            let _ = entries.pop_front();
        }
        entries.push_back(flip);
    }

    /// Snapshot of the history, oldest first.
    pub fn snapshot(&self) -> Vec<Arc<FlipEvent>> {
        self.entries.lock().iter().cloned().collect()
    }

    /// Number of remembered events.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether nothing has been delivered yet.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl Default for RecentFlips {
    fn default() -> Self {
        Self::new(DEFAULT_RECENT_CAPACITY)
    }
}
