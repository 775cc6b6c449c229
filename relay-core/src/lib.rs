//! relay-core
//!
//! Data-plane primitives for the market-data relay: the per-symbol order
//! book and trade cache, the non-blocking fan-out hub, and the upstream
//! gateway connection manager.
//!
//! - `cache`: per-symbol orderbook snapshot store and trade-history ring.
//! - `hub`: topic registry and non-blocking publish with slow-consumer eviction.
//! - `upstream`: gateway connection management, failover, and per-symbol reconnect.
//! - `repository` / `decoder`: external collaborator seams (persistence, wire decode).
#![warn(missing_docs)]

/// Per-symbol order-book snapshot store and bounded trade-history ring.
pub mod cache;
/// The gateway decoder seam.
pub mod decoder;
/// Core-internal error type.
pub mod error;
/// Fan-out hub: topics, non-blocking publish, slow-consumer eviction, zombie sweep.
pub mod hub;
/// The repository seam.
pub mod repository;
/// Internal stream utilities used by `StreamHandle` and tests.
pub mod stream;
/// Upstream Manager: gateway health, failover, and per-symbol ingest supervision.
pub mod upstream;

pub use cache::Cache;
pub use decoder::GatewayDecoder;
pub use error::CoreError;
pub use hub::{Hub, Subscriber};
pub use repository::{Repository, RepositoryError, UsageDelta};
pub use stream::StreamHandle;
pub use upstream::UpstreamManager;
