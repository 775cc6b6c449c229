//! Deterministic [`GatewayDecoder`] fixture: plays back a scripted sequence
//! of updates per symbol, then holds the stream open until cancelled.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use relay_core::GatewayDecoder;
use relay_types::MarketDataUpdate;
use tokio::sync::{mpsc, oneshot};

/// A `GatewayDecoder` that replays a fixed script of updates per symbol.
///
/// Symbols with no script entry get an empty stream that stays open (no
/// updates, no close) until cancelled — useful for exercising subscribe/
/// unsubscribe bookkeeping without needing data.
pub struct ScriptedDecoder {
    scripts: HashMap<String, Vec<MarketDataUpdate>>,
    send_interval: Duration,
    healthy: AtomicBool,
    ingests: Mutex<Vec<String>>,
}

impl ScriptedDecoder {
    /// Build a decoder with no scripted updates; every symbol just holds
    /// its stream open. Useful for tests that only care about subscribe
    /// lifecycle, not delivered data.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            scripts: HashMap::new(),
            send_interval: Duration::from_millis(0),
            healthy: AtomicBool::new(true),
            ingests: Mutex::new(Vec::new()),
        }
    }

    /// Build a decoder that replays `scripts[symbol]` in order (with
    /// `send_interval` between sends) the moment a symbol is ingested.
    #[must_use]
    pub fn with_scripts(scripts: HashMap<String, Vec<MarketDataUpdate>>, send_interval: Duration) -> Self {
        Self {
            scripts,
            send_interval,
            healthy: AtomicBool::new(true),
            ingests: Mutex::new(Vec::new()),
        }
    }

    /// Flip the health-check response returned by [`ping`](GatewayDecoder::ping).
    /// Used to drive failover scenarios deterministically.
    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    /// Symbols ingested so far, in call order, including duplicates. Lets a
    /// test assert `subscribe` only triggered one `ingest` call.
    #[must_use]
    pub fn ingest_calls(&self) -> Vec<String> {
        self.ingests.lock().expect("decoder mutex poisoned").clone()
    }
}

#[async_trait]
impl GatewayDecoder for ScriptedDecoder {
    async fn ingest(&self, symbol: String, mut cancel: oneshot::Receiver<()>) -> mpsc::Receiver<MarketDataUpdate> {
        self.ingests.lock().expect("decoder mutex poisoned").push(symbol.clone());
        let script = self.scripts.get(&symbol).cloned().unwrap_or_default();
        let interval = self.send_interval;
        let (tx, rx) = mpsc::channel(script.len().max(1));

        tokio::spawn(async move {
            for update in script {
                if interval > Duration::ZERO {
                    tokio::time::sleep(interval).await;
                }
                if tx.send(update).await.is_err() {
                    return;
                }
            }
            let _ = cancel.await;
        });

        rx
    }

    async fn ping(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use relay_types::{MarketDataPayload, OrderbookSnapshot};

    fn snapshot_update(symbol: &str, sequence: u64) -> MarketDataUpdate {
        MarketDataUpdate {
            symbol: symbol.to_string(),
            timestamp: Utc::now(),
            sequence,
            is_snapshot: true,
            payload: MarketDataPayload::Orderbook(OrderbookSnapshot {
                symbol: symbol.to_string(),
                timestamp: Utc::now(),
                sequence,
                asks: vec![],
                bids: vec![],
            }),
        }
    }

    #[tokio::test]
    async fn scripted_updates_are_delivered_in_order() {
        let mut scripts = HashMap::new();
        scripts.insert(
            "XYZ".to_string(),
            vec![snapshot_update("XYZ", 1), snapshot_update("XYZ", 2)],
        );
        let decoder = ScriptedDecoder::with_scripts(scripts, Duration::ZERO);
        let (_stop_tx, stop_rx) = oneshot::channel();
        let mut rx = decoder.ingest("XYZ".to_string(), stop_rx).await;

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first.sequence, 1);
        assert_eq!(second.sequence, 2);
    }

    #[tokio::test]
    async fn unscripted_symbol_yields_no_updates() {
        let decoder = ScriptedDecoder::empty();
        let (_stop_tx, stop_rx) = oneshot::channel();
        let mut rx = decoder.ingest("ABC".to_string(), stop_rx).await;
        let res = tokio::time::timeout(Duration::from_millis(20), rx.recv()).await;
        assert!(res.is_err(), "expected no update within the timeout");
    }

    #[tokio::test]
    async fn set_healthy_flips_ping_result() {
        let decoder = ScriptedDecoder::empty();
        assert!(decoder.ping().await);
        decoder.set_healthy(false);
        assert!(!decoder.ping().await);
    }
}
