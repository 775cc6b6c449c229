//! Configuration types shared across the relay's data-plane components.
//!
//! None of these structs load from a file or environment; configuration
//! loading is a host-application concern. They derive `Deserialize` so a
//! host can populate them with whatever config crate it already uses.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// A single upstream market-data gateway endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GatewayEndpointConfig {
    /// Connection string or URL for the gateway, opaque to the core.
    pub endpoint: String,
    /// Lower value is preferred; used to order failover attempts.
    pub priority: u32,
    /// Optional region label, informational only.
    pub region: Option<String>,
}

/// Exponential backoff configuration for per-symbol stream reconnects.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BackoffConfig {
    /// Minimum (first-failure) backoff delay in milliseconds.
    pub min_backoff_ms: u64,
    /// Maximum backoff delay in milliseconds.
    pub max_backoff_ms: u64,
    /// Exponential factor applied after each consecutive failure (>= 1).
    pub factor: u32,
    /// Symmetric jitter percentage `[0, 100]` applied around the computed
    /// delay, i.e. the final delay is perturbed by a uniform value in
    /// `[-jitter_percent%, +jitter_percent%]`.
    pub jitter_percent: u8,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            min_backoff_ms: 100,
            max_backoff_ms: 30_000,
            factor: 2,
            jitter_percent: 10,
        }
    }
}

/// Configuration for the Upstream Manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    /// Gateways in priority order; the manager selects the lowest-priority
    /// value first and fails over down the list on sustained unhealth.
    pub gateways: Vec<GatewayEndpointConfig>,
    /// Interval between health-check passes.
    pub health_check_interval: Duration,
    /// Reconnect backoff policy for per-symbol streams.
    pub backoff: BackoffConfig,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            gateways: Vec::new(),
            health_check_interval: Duration::from_secs(5),
            backoff: BackoffConfig::default(),
        }
    }
}

/// Configuration for the Fan-out Hub.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FanoutConfig {
    /// Bounded capacity of each subscriber's send queue.
    pub subscriber_buffer_size: usize,
    /// Number of consecutive drops before a subscriber is evicted.
    pub slow_consumer_threshold: u64,
    /// Subscribers with no successful send in this long are swept as zombies.
    pub zombie_timeout: Duration,
}

impl Default for FanoutConfig {
    fn default() -> Self {
        Self {
            subscriber_buffer_size: 500,
            slow_consumer_threshold: 1000,
            zombie_timeout: Duration::from_secs(60),
        }
    }
}

/// Configuration for the Cache.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Maximum number of price levels retained per order-book side.
    pub max_orderbook_depth: usize,
    /// Capacity of each symbol's trade-history ring buffer.
    pub trade_history_size: usize,
    /// Interval between stale-entry cleanup passes.
    pub cleanup_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_orderbook_depth: 100,
            trade_history_size: 1000,
            cleanup_interval: Duration::from_secs(5 * 60),
        }
    }
}

/// Configuration for the Rate Limiter.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RateConfig {
    /// Default requests-per-second for a key seen for the first time.
    pub default_rps: u32,
    /// Default concurrent-stream limit for a key seen for the first time.
    pub default_max_streams: u32,
    /// Burst capacity multiplier applied to `rps` to get the token bucket's
    /// maximum burst size.
    pub burst_multiplier: f64,
    /// Interval between GC passes over idle keys.
    pub cleanup_interval: Duration,
}

impl Default for RateConfig {
    fn default() -> Self {
        Self {
            default_rps: 100,
            default_max_streams: 10,
            burst_multiplier: 2.0,
            cleanup_interval: Duration::from_secs(5 * 60),
        }
    }
}

/// Configuration for the Auth Gate.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Time-to-live for cached authorization records, in both the
    /// in-process and (if configured) distributed cache.
    pub cache_ttl: Duration,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            cache_ttl: Duration::from_secs(5 * 60),
        }
    }
}

/// Aggregate configuration for the whole relay.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RelayConfig {
    /// Upstream Manager configuration.
    pub upstream: UpstreamConfig,
    /// Fan-out Hub configuration.
    pub fanout: FanoutConfig,
    /// Cache configuration.
    pub cache: CacheConfig,
    /// Rate Limiter configuration.
    pub rate: RateConfig,
    /// Auth Gate configuration.
    pub auth: AuthConfig,
}
