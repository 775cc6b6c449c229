//! Property-based coverage for the cache invariants named in spec: snapshot
//! ordering survives truncation, depth is always bounded, and the trade ring
//! always returns the most recent `n` pushes in arrival order.

use chrono::Utc;
use proptest::prelude::*;
use relay_core::Cache;
use relay_types::{CacheConfig, OrderbookSnapshot, PriceLevel, Trade, TradeSide};

fn sorted_levels(count: usize, ascending: bool, base: f64) -> Vec<PriceLevel> {
    (0..count)
        .map(|i| {
            let price = if ascending {
                base + i as f64
            } else {
                base - i as f64
            };
            PriceLevel::new(price, 1.0 + i as f64)
        })
        .collect()
}

fn snapshot_with_sides(asks_count: usize, bids_count: usize) -> OrderbookSnapshot {
    OrderbookSnapshot {
        symbol: "XYZ".to_string(),
        timestamp: Utc::now(),
        sequence: 1,
        asks: sorted_levels(asks_count, true, 100.0),
        bids: sorted_levels(bids_count, false, 99.0),
    }
}

proptest! {
    /// Regardless of how many levels the upstream hands in, the cached
    /// snapshot never exceeds the configured depth on either side.
    #[test]
    fn depth_is_always_bounded(asks_count in 0usize..200, bids_count in 0usize..200, max_depth in 1usize..50) {
        let mut cfg = CacheConfig::default();
        cfg.max_orderbook_depth = max_depth;
        let cache = Cache::new(cfg);
        cache.update_orderbook(snapshot_with_sides(asks_count, bids_count));

        let got = cache.get_orderbook("XYZ").unwrap();
        prop_assert!(got.asks.len() <= max_depth);
        prop_assert!(got.bids.len() <= max_depth);
    }

    /// Truncating an already strictly-sorted snapshot to its first
    /// `max_depth` entries per side can never break the ordering invariant.
    #[test]
    fn sorted_snapshot_stays_sorted_after_truncation(
        asks_count in 0usize..200,
        bids_count in 0usize..200,
        max_depth in 1usize..50,
    ) {
        let mut cfg = CacheConfig::default();
        cfg.max_orderbook_depth = max_depth;
        let cache = Cache::new(cfg);
        cache.update_orderbook(snapshot_with_sides(asks_count, bids_count));

        let got = cache.get_orderbook("XYZ").unwrap();
        prop_assert!(got.is_sorted());
    }

    /// The ring always hands back the most recently pushed `n` trades, in
    /// the order they were pushed, no matter how many pushes overflowed it.
    #[test]
    fn ring_returns_most_recent_pushes_in_order(
        capacity in 1usize..20,
        total_pushes in 0usize..200,
        request in 0usize..30,
    ) {
        let mut cfg = CacheConfig::default();
        cfg.trade_history_size = capacity;
        let cache = Cache::new(cfg);
        let now = Utc::now();

        for i in 0..total_pushes {
            cache.add_trade(Trade {
                symbol: "XYZ".to_string(),
                trade_id: i.to_string(),
                price: 1.0,
                size: 1.0,
                side: TradeSide::Buy,
                timestamp: now,
            });
        }

        let recent = cache.get_recent_trades("XYZ", request);
        let expected_len = request.min(total_pushes).min(capacity);
        prop_assert_eq!(recent.len(), expected_len);

        let expected_ids: Vec<String> = ((total_pushes.saturating_sub(expected_len))..total_pushes)
            .map(|i| i.to_string())
            .collect();
        let got_ids: Vec<String> = recent.iter().map(|t| t.trade_id.clone()).collect();
        prop_assert_eq!(got_ids, expected_ids);
    }
}
