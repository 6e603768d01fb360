//! The priority roster: ordered user ids entitled to the head start.

use std::sync::Arc;

use metrics::gauge;
use parking_lot::RwLock;
use preapi_core::metric_names::ROSTER_SIZE;

/// Ordered list of priority user ids, replaced wholesale on refresh.
///
/// Readers take a cheap snapshot so a distribution sees one consistent
/// roster even if a refresh lands mid-way.
#[derive(Default)]
pub struct PriorityRoster {
    users: RwLock<Arc<Vec<String>>>,
}

impl PriorityRoster {
    /// Create an empty roster.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the roster.
    pub fn replace(&self, users: Vec<String>) {
        #[allow(clippy::cast_precision_loss)]
        let size = users.len() as f64;
        gauge!(ROSTER_SIZE).set(size);
        *self.users.write() = Arc::new(users);
    }

    /// Current roster.
    pub fn snapshot(&self) -> Arc<Vec<String>> {
        Arc::clone(&self.users.read())
    }

    /// Number of rostered users.
    pub fn len(&self) -> usize {
        self.users.read().len()
    }

    /// Whether nobody is rostered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
