//! Multi-tenant market-data relay.
//!
//! Composes four data-plane components behind the narrow ingress contract
//! a transport layer drives:
//!
//! - The Upstream Manager maintains gateway connections, fails over on
//!   sustained unhealth, and supervises one reconnecting ingest task per
//!   subscribed symbol.
//! - The Cache holds the latest order-book snapshot and a bounded trade
//!   history ring per symbol.
//! - The Fan-out Hub distributes ingested updates to per-symbol
//!   subscribers without ever blocking on a slow reader.
//! - The Rate Limiter and Auth Gate (in `relay-middleware`) admit and
//!   authenticate callers before they reach the above.
//!
//! Transport, persistence, configuration loading, and process logging are
//! the host application's concern; this crate only consumes the narrow
//! seams (`Repository`, `GatewayDecoder`) those concerns are built behind.
#![warn(missing_docs)]

mod relay;
mod stale;

pub use relay::{MarketRelay, MarketRelayBuilder};

pub use relay_core::{Cache, GatewayDecoder, Hub, Repository, RepositoryError, Subscriber, UsageDelta};
pub use relay_middleware::{AuthGate, DistributedCache, RateLimiter};
pub use relay_types::{
    AuthConfig, AuthRecord, BackoffConfig, CacheConfig, FanoutConfig, GatewayConnection,
    GatewayEndpoint, GatewayEndpointConfig, KeyStatus, MarketDataPayload, MarketDataUpdate,
    OrderbookSnapshot, PriceLevel, RateConfig, RelayConfig, RelayError, StreamStatus, Symbol,
    TenantStatus, Trade, TradeSide, UpstreamConfig, UpstreamStream,
};
