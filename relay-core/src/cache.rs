//! Per-symbol order-book snapshot store and bounded trade-history ring.
//!
//! Locking discipline (spec-mandated): the symbol -> snapshot map has its
//! own lock; each symbol's trade ring has its own lock. The map lock is
//! never held while acquiring a ring lock, and neither is ever held across
//! a caller-visible copy: readers clone before releasing.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use relay_types::{CacheConfig, OrderbookSnapshot, Symbol, Trade};

/// Fixed-capacity ring buffer of trades, oldest-overwritten on overflow.
struct TradeRing {
    capacity: usize,
    buf: Vec<Trade>,
    next: usize,
    filled: bool,
}

impl TradeRing {
    fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            buf: Vec::with_capacity(capacity),
            next: 0,
            filled: false,
        }
    }

    fn push(&mut self, trade: Trade) {
        if self.buf.len() < self.capacity {
            self.buf.push(trade);
        } else {
            self.buf[self.next] = trade;
            self.filled = true;
        }
        self.next = (self.next + 1) % self.capacity;
    }

    /// Return the `n` most recent trades, oldest first among the selected.
    fn recent(&self, n: usize) -> Vec<Trade> {
        let len = self.buf.len();
        let n = n.min(len);
        if !self.filled {
            return self.buf[len - n..].to_vec();
        }
        // `next` is the index of the oldest element once the ring has wrapped.
        let mut out = Vec::with_capacity(n);
        let start = (self.next + self.capacity - n) % self.capacity;
        for i in 0..n {
            out.push(self.buf[(start + i) % self.capacity].clone());
        }
        out
    }
}

/// Per-symbol latest order-book snapshot plus bounded trade history.
///
/// `UpdateOrderbook` replaces the stored snapshot wholesale (truncated to
/// `max_depth` per side); this is not a delta merge, per the spec's
/// resolved open question. Callers deliver full-snapshot-equivalents,
/// built from deltas upstream if necessary.
pub struct Cache {
    config: CacheConfig,
    books: RwLock<HashMap<Symbol, OrderbookSnapshot>>,
    trades: RwLock<HashMap<Symbol, RwLock<TradeRing>>>,
}

impl Cache {
    /// Construct an empty cache with the given configuration.
    #[must_use]
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            books: RwLock::new(HashMap::new()),
            trades: RwLock::new(HashMap::new()),
        }
    }

    /// Replace the stored snapshot for `snapshot.symbol`, truncating both
    /// sides to the configured `max_orderbook_depth`.
    pub fn update_orderbook(&self, mut snapshot: OrderbookSnapshot) {
        snapshot.truncate(self.config.max_orderbook_depth);
        let mut books = self.books.write().expect("cache book lock poisoned");
        books.insert(snapshot.symbol.clone(), snapshot);
    }

    /// Return an independent copy of the cached snapshot for `symbol`, if any.
    #[must_use]
    pub fn get_orderbook(&self, symbol: &str) -> Option<OrderbookSnapshot> {
        let books = self.books.read().expect("cache book lock poisoned");
        books.get(symbol).cloned()
    }

    /// Append a trade to `trade.symbol`'s ring, creating it lazily.
    pub fn add_trade(&self, trade: Trade) {
        let symbol = trade.symbol.clone();
        // Fast path: ring already exists.
        {
            let trades = self.trades.read().expect("cache trades lock poisoned");
            if let Some(ring) = trades.get(&symbol) {
                ring.write().expect("ring lock poisoned").push(trade);
                return;
            }
        }
        // Slow path: create under the write lock, double-checking.
        let mut trades = self.trades.write().expect("cache trades lock poisoned");
        trades
            .entry(symbol)
            .or_insert_with(|| RwLock::new(TradeRing::new(self.config.trade_history_size)))
            .write()
            .expect("ring lock poisoned")
            .push(trade);
    }

    /// Return the `n` most recent trades for `symbol`, oldest first among
    /// the selected, up to the ring's current count.
    #[must_use]
    pub fn get_recent_trades(&self, symbol: &str, n: usize) -> Vec<Trade> {
        let trades = self.trades.read().expect("cache trades lock poisoned");
        trades
            .get(symbol)
            .map(|ring| ring.read().expect("ring lock poisoned").recent(n))
            .unwrap_or_default()
    }

    /// Snapshot of all symbols with a cached book.
    #[must_use]
    pub fn get_symbols(&self) -> Vec<Symbol> {
        let books = self.books.read().expect("cache book lock poisoned");
        books.keys().cloned().collect()
    }

    /// Remove symbols whose snapshot timestamp is older than `now - stale_threshold`,
    /// along with their trade rings.
    pub fn cleanup(&self, now: DateTime<Utc>, stale_threshold: chrono::Duration) {
        let cutoff = now - stale_threshold;
        let stale: Vec<Symbol> = {
            let books = self.books.read().expect("cache book lock poisoned");
            books
                .iter()
                .filter(|(_, snap)| snap.timestamp < cutoff)
                .map(|(sym, _)| sym.clone())
                .collect()
        };
        if stale.is_empty() {
            return;
        }
        {
            let mut books = self.books.write().expect("cache book lock poisoned");
            for sym in &stale {
                books.remove(sym);
            }
        }
        {
            let mut trades = self.trades.write().expect("cache trades lock poisoned");
            for sym in &stale {
                trades.remove(sym);
            }
        }
    }
}
