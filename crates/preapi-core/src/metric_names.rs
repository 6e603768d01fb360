//! Metric name constants shared across crates.

/// Fast-track flips forwarded by ingress (counter).
pub const FAST_TRACK_FLIPS_TOTAL: &str = "preapi_fast_track_flips_total";
/// Ingress messages dropped as malformed (counter, labels: reason).
pub const INGRESS_DROPPED_TOTAL: &str = "preapi_ingress_dropped_total";
/// Successful deliveries (counter, labels: path).
pub const DELIVERIES_TOTAL: &str = "preapi_deliveries_total";
/// Failed or timed-out sends (counter).
pub const DELIVERY_FAILURES_TOTAL: &str = "preapi_delivery_failures_total";
/// Fallback deliveries carrying the missed-window marker (counter).
pub const MISSED_WINDOW_TOTAL: &str = "preapi_missed_window_total";
/// New ledger facts observed (counter, labels: kind).
pub const LEDGER_FACTS_TOTAL: &str = "preapi_ledger_facts_total";
/// Currently enrolled connections (gauge).
pub const ENROLLED_CONNECTIONS: &str = "preapi_enrolled_connections";
/// Current priority roster size (gauge).
pub const ROSTER_SIZE: &str = "preapi_roster_size";
/// Failed roster refreshes (counter).
pub const ROSTER_REFRESH_FAILURES_TOTAL: &str = "preapi_roster_refresh_failures_total";

/// Every metric name, for exporters and tests.
pub const ALL: [&str; 9] = [
    FAST_TRACK_FLIPS_TOTAL,
    INGRESS_DROPPED_TOTAL,
    DELIVERIES_TOTAL,
    DELIVERY_FAILURES_TOTAL,
    MISSED_WINDOW_TOTAL,
    LEDGER_FACTS_TOTAL,
    ENROLLED_CONNECTIONS,
    ROSTER_SIZE,
    ROSTER_REFRESH_FAILURES_TOTAL,
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metric_constants_are_snake_case() {
        for name in ALL {
            assert!(
                name.chars().all(|c| c.is_ascii_lowercase() || c == '_'),
                "metric name '{name}' must be snake_case"
            );
            assert!(name.starts_with("preapi_"));
        }
    }
}
