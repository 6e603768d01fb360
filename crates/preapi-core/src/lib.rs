//! # preapi-core
//!
//! Shared vocabulary for the pre-api flip distributor.
//!
//! - **Flip events**: [`FlipEvent`] with its detector tag ([`FinderKind`]) and
//!   provenance [`Marker`]s layered onto per-recipient views
//! - **Connections**: the [`FlipConnection`] capability every client session
//!   exposes, plus the bounded [`RecentFlips`] history
//! - **Errors**: [`FlipError`] via `thiserror`
//! - **Retry**: backoff math shared by every transport connect loop
//! - **Logging**: `tracing` subscriber setup

#![deny(unsafe_code)]

pub mod connection;
pub mod errors;
pub mod flip;
pub mod logging;
pub mod metric_names;
pub mod retry;

pub use connection::{FlipConnection, RecentFlips};
pub use errors::{FlipError, Result};
pub use flip::{FinderKind, FlipEvent, Marker};
