//! Round-robin assignment and exclusivity-window timing.
//!
//! Everything here is a pure function of its inputs (apart from the random
//! index for unrostered connections and the jitter draw), so every instance
//! computes the same holder for the same event and roster without talking to
//! the others.

use std::time::Duration;

use preapi_settings::FairnessSettings;
use rand::Rng;
use tokio::time::Instant;

/// Index of the roster slot holding `fairness_key`.
///
/// `|fairness_key| mod max(1, roster_len)`.
pub fn assigned_index(fairness_key: i64, roster_len: usize) -> usize {
    let slots = u64::try_from(roster_len.max(1)).unwrap_or(u64::MAX);
    usize::try_from(fairness_key.unsigned_abs() % slots).unwrap_or_default()
}

/// Position of `user_id` in the roster, by exact match.
pub fn roster_position(roster: &[String], user_id: &str) -> Option<usize> {
    roster.iter().position(|u| u == user_id)
}

/// The index a connection competes with.
///
/// A rostered connection uses its position. An unrostered one (enrolled
/// before the roster caught up) draws a random index in
/// `[0, max(1, roster_len))`, so its holder status is local to this
/// instance and this distribution.
pub fn connection_index(position: Option<usize>, roster_len: usize) -> usize {
    position.unwrap_or_else(|| rand::rng().random_range(0..roster_len.max(1)))
}

/// Timing parameters of the exclusivity window.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WindowTiming {
    /// Head start the holder gets before the window ends.
    pub head_start: Duration,
    /// Floor on a non-holder's wait.
    pub min_fallback_wait: Duration,
    /// Lower bound of the post-delivery jitter.
    pub jitter_min: Duration,
    /// Upper bound (exclusive) of the post-delivery jitter.
    pub jitter_max: Duration,
    /// Guard before window end at which the holder's receipt is checked.
    pub holder_guard: Duration,
    /// Ledger polling interval.
    pub poll_interval: Duration,
    /// Bound on one send.
    pub send_timeout: Duration,
}

impl From<&FairnessSettings> for WindowTiming {
    fn from(s: &FairnessSettings) -> Self {
        Self {
            head_start: Duration::from_millis(s.head_start_ms),
            min_fallback_wait: Duration::from_millis(s.min_fallback_wait_ms),
            jitter_min: Duration::from_millis(s.jitter_min_ms),
            jitter_max: Duration::from_millis(s.jitter_max_ms),
            holder_guard: Duration::from_millis(s.holder_guard_ms),
            poll_interval: Duration::from_millis(s.ledger_poll_ms.max(1)),
            send_timeout: Duration::from_millis(s.send_timeout_ms),
        }
    }
}

impl Default for WindowTiming {
    fn default() -> Self {
        Self::from(&FairnessSettings::default())
    }
}

impl WindowTiming {
    /// How long a non-holder waits before its fallback delivery.
    ///
    /// `max(window - head_start, min_fallback_wait)`.
    pub fn non_holder_wait(&self, window: Duration) -> Duration {
        window
            .saturating_sub(self.head_start)
            .max(self.min_fallback_wait)
    }

    /// How long after its delivery the holder's receipt is checked.
    pub fn holder_check_delay(&self, window: Duration) -> Duration {
        window.saturating_sub(self.holder_guard)
    }

    /// A deadline shortened by a delivery fact seen at `seen_at`.
    ///
    /// Never later than `deadline`.
    pub fn shortened(deadline: Instant, seen_at: Instant, jitter: Duration) -> Instant {
        deadline.min(seen_at + jitter)
    }

    /// Draw a jitter in `[jitter_min, jitter_max)`.
    pub fn jitter(&self) -> Duration {
        if self.jitter_max <= self.jitter_min {
            return self.jitter_min;
        }
        let min = u64::try_from(self.jitter_min.as_millis()).unwrap_or(u64::MAX);
        let max = u64::try_from(self.jitter_max.as_millis()).unwrap_or(u64::MAX);
        Duration::from_millis(rand::rng().random_range(min..max))
    }

    /// Upper bound on one delivery task for a window of `window`.
    ///
    /// Covers the longest path of either role: the full non-holder wait plus
    /// a jitter, or the holder's send, receipt check and one re-send; plus a
    /// poll of slack.
    pub fn task_budget(&self, window: Duration) -> Duration {
        self.non_holder_wait(window).max(window)
            + self.jitter_max
            + self.send_timeout * 2
            + self.poll_interval
    }
}
