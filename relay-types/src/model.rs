//! Core data model: order books, trades, gateway/stream state, and auth records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque market instrument identifier; the scoping key for all
/// symbol-keyed state in the relay.
pub type Symbol = String;

/// A single price/size pair on one side of an order book.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct PriceLevel {
    /// Limit price of this level.
    pub price: f64,
    /// Aggregate size resting at this price.
    pub size: f64,
}

impl PriceLevel {
    /// Construct a new price level.
    #[must_use]
    pub const fn new(price: f64, size: f64) -> Self {
        Self { price, size }
    }
}

/// The authoritative latest order-book state for one symbol.
///
/// Invariants (enforced by the cache that stores these, not by this type
/// itself): `asks` strictly ascending by price, `bids` strictly descending
/// by price, each side truncated to the configured `max_depth`, and
/// `sequence` monotonically non-decreasing per symbol across updates.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrderbookSnapshot {
    /// Symbol this snapshot belongs to.
    pub symbol: Symbol,
    /// Wall-clock time the snapshot was produced upstream.
    pub timestamp: DateTime<Utc>,
    /// Monotonically non-decreasing per-symbol sequence number.
    pub sequence: u64,
    /// Ask side, ascending by price.
    pub asks: Vec<PriceLevel>,
    /// Bid side, descending by price.
    pub bids: Vec<PriceLevel>,
}

impl OrderbookSnapshot {
    /// Truncate both sides to at most `max_depth` entries, keeping the
    /// entries closest to the touch (the first `max_depth` of each
    /// already-sorted side).
    pub fn truncate(&mut self, max_depth: usize) {
        self.asks.truncate(max_depth);
        self.bids.truncate(max_depth);
    }

    /// Whether `asks` is strictly ascending and `bids` is strictly
    /// descending by price. Used in tests and debug assertions.
    #[must_use]
    pub fn is_sorted(&self) -> bool {
        self.asks.windows(2).all(|w| w[0].price < w[1].price)
            && self.bids.windows(2).all(|w| w[0].price > w[1].price)
    }
}

/// Which side of the book a trade executed against.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TradeSide {
    /// Aggressor was a buyer.
    Buy,
    /// Aggressor was a seller.
    Sell,
}

/// A single, immutable executed trade.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Trade {
    /// Symbol the trade occurred on.
    pub symbol: Symbol,
    /// Upstream-assigned trade identifier.
    pub trade_id: String,
    /// Execution price.
    pub price: f64,
    /// Executed size.
    pub size: f64,
    /// Aggressor side.
    pub side: TradeSide,
    /// Execution time.
    pub timestamp: DateTime<Utc>,
}

/// Discriminated update record produced by the upstream decoder and
/// consumed by the cache and fan-out hub. Exactly one of `orderbook` or
/// `trade` is populated, matching the variant named in `kind`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MarketDataUpdate {
    /// Symbol this update concerns.
    pub symbol: Symbol,
    /// Time the update was produced.
    pub timestamp: DateTime<Utc>,
    /// Per-symbol monotonically non-decreasing sequence number.
    pub sequence: u64,
    /// Whether this update is a full-state snapshot (as opposed to an
    /// incremental update); the cache only ever receives snapshots per the
    /// replace-with-truncate contract.
    pub is_snapshot: bool,
    /// The payload: exactly one of the two variants.
    pub payload: MarketDataPayload,
}

/// The payload carried by a [`MarketDataUpdate`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[non_exhaustive]
pub enum MarketDataPayload {
    /// A full order-book snapshot.
    Orderbook(OrderbookSnapshot),
    /// A single executed trade.
    Trade(Trade),
}

/// A configured upstream gateway, as ordered by priority.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GatewayEndpoint {
    /// Connection string or URL, opaque to the core.
    pub endpoint: String,
    /// Lower value is preferred.
    pub priority: u32,
    /// Optional region label.
    pub region: Option<String>,
}

/// The single active upstream connection the manager is currently
/// consuming. At most one `GatewayConnection` is active at any time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GatewayConnection {
    /// The endpoint currently in use.
    pub endpoint: GatewayEndpoint,
    /// Last time a health-check ping was answered.
    pub last_ping: Option<DateTime<Utc>>,
    /// Number of reconnects since this connection was first established.
    pub reconnect_count: u64,
    /// Whether the connection is currently believed to be live.
    pub connected: bool,
}

/// Lifecycle state of a per-symbol ingest stream, owned exclusively by the
/// Upstream Manager.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum StreamStatus {
    /// Stream registered but not yet connected upstream.
    Connecting,
    /// Stream is actively receiving data.
    Active,
    /// Stream lost its connection and is backing off before retrying.
    Reconnecting,
    /// Stream has been torn down (unsubscribe or manager shutdown).
    Closed,
}

/// Per-symbol ingest state, created on first `Subscribe(symbol)` and
/// destroyed on `Unsubscribe(symbol)` or manager shutdown.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UpstreamStream {
    /// Symbol this stream ingests.
    pub symbol: Symbol,
    /// Current lifecycle state.
    pub status: StreamStatus,
    /// Last time data was received for this symbol.
    pub last_update: Option<DateTime<Utc>>,
    /// Reconnect attempts since the stream was created; persists across
    /// reconnects until the symbol is unsubscribed.
    pub reconnect_count: u64,
}

/// Status of a tenant account.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TenantStatus {
    /// Tenant is in good standing.
    Active,
    /// Tenant has been administratively suspended.
    Suspended,
}

/// Status of an individual API key.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum KeyStatus {
    /// Key is usable.
    Active,
    /// Key has been administratively revoked.
    Revoked,
    /// Key has passed its validity window.
    Expired,
}

/// A validated authorization record, produced by the Auth Gate from a
/// repository row (joining tenant, key, and plan).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuthRecord {
    /// Owning tenant identifier.
    pub tenant_id: String,
    /// Current tenant status.
    pub tenant_status: TenantStatus,
    /// API key identifier.
    pub key_id: String,
    /// Current key status.
    pub key_status: KeyStatus,
    /// Plan identifier the key is billed/bounded under.
    pub plan_id: String,
    /// Maximum concurrent streams allowed for this key.
    pub max_concurrent_streams: u32,
    /// Maximum requests per second allowed for this key.
    pub max_rps: u32,
    /// Maximum distinct symbols this key may subscribe to concurrently.
    pub max_symbols: u32,
    /// Maximum requests allowed per calendar day.
    pub max_daily_requests: u64,
    /// Key expiry, if any.
    pub expires_at: Option<DateTime<Utc>>,
    /// When this record was last (re)validated and cached.
    pub cached_at: DateTime<Utc>,
}

impl AuthRecord {
    /// Whether this record currently grants access: both tenant and key
    /// must be active, and any `expires_at` must be in the future.
    #[must_use]
    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        self.tenant_status == TenantStatus::Active
            && self.key_status == KeyStatus::Active
            && self.expires_at.is_none_or(|exp| exp > now)
    }
}
