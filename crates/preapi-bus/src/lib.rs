//! # preapi-bus
//!
//! Cross-instance synchronization for the pre-api distributor.
//!
//! Instances share three kinds of fact over a pub/sub bus: *delivered*
//! (some recipient got the event), *purchased* (someone bought it), and
//! liveness *beats*. Facts land in a process-local [`DeliveryLedger`] that the
//! fairness coordinator polls while a recipient waits out its window.
//!
//! - [`transport`]: the [`Transport`] seam over a pub/sub backend
//! - [`redis_transport`]: Redis-backed transport used in production
//! - [`memory`]: in-process bus for tests and multi-instance simulation
//! - [`sync`]: [`CrossInstanceSync`], publishing and consuming facts
//! - [`connect`]: retrying connection with backoff, degrading when exhausted
//! - [`subscription`]: channel readers that resubscribe after a drop

#![deny(unsafe_code)]

pub mod beat;
pub mod connect;
pub mod errors;
pub mod ledger;
pub mod memory;
pub mod peers;
pub mod redis_transport;
pub mod subscription;
pub mod sync;
pub mod transport;
pub mod wire;

pub use errors::{BusError, Result};
pub use ledger::{DeliveryLedger, FactKind};
pub use memory::{MemoryBus, MemoryTransport};
pub use peers::{BeatOrigin, PeerTracker};
pub use redis_transport::RedisTransport;
pub use subscription::{ResilientSubscription, SubscriptionHealth};
pub use sync::{CrossInstanceSync, SyncChannels};
pub use transport::{Subscription, Transport};
