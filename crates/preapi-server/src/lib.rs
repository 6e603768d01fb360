//! # preapi-server
//!
//! Fair distribution of fast-track flips to priority connections.
//!
//! - [`fairness`]: round-robin assignment and window timing
//! - [`registry`]: enrolled connections, expiry warnings, roster refresh
//! - [`coordinator`]: per-connection holder/fallback delivery
//! - [`ingress`]: fast-track decoding, repair, and forwarding
//! - [`purchase`]: purchase-confirmation parsing
//! - [`service`]: the facade used by the session layer
//! - [`background`]: the periodic registry cycle
//! - [`server`]: `/health` and `/metrics`

#![deny(unsafe_code)]

pub mod background;
pub mod billing;
pub mod coordinator;
pub mod fairness;
pub mod health;
pub mod ingress;
pub mod metrics;
pub mod purchase;
pub mod registry;
pub mod roster;
pub mod server;
pub mod service;
pub mod shutdown;

pub use billing::{BillingClient, BillingError, HttpBillingClient};
pub use coordinator::{
    DeliveryOutcome, DeliveryPath, Distribution, DistributionReport, FairnessCoordinator,
};
pub use fairness::WindowTiming;
pub use ingress::{FlipSink, IngressNormalizer};
pub use purchase::PurchaseParseError;
pub use registry::ConnectionRegistry;
pub use server::PreApiServer;
pub use service::{PreApiService, PurchaseOutcome};
pub use shutdown::ShutdownCoordinator;
