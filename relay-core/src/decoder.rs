//! The gateway decoder seam: the upstream wire dialect is treated as an
//! opaque source of canonical [`MarketDataUpdate`] records.

use async_trait::async_trait;
use relay_types::{MarketDataUpdate, Symbol};
use tokio::sync::mpsc;

/// Abstract decoder bound to one upstream gateway endpoint. Given a symbol
/// and a cancellation signal, produces a stream of canonical update
/// records until cancelled or the upstream connection drops. Failures
/// surface as stream termination; retry policy belongs to the Upstream
/// Manager, not the decoder.
#[async_trait]
pub trait GatewayDecoder: Send + Sync {
    /// Begin ingesting `symbol` from this gateway. Returns a receiver that
    /// yields updates until the decoder observes `cancel` or the
    /// connection is lost (at which point the channel is dropped, closing
    /// the receiver).
    async fn ingest(
        &self,
        symbol: Symbol,
        cancel: tokio::sync::oneshot::Receiver<()>,
    ) -> mpsc::Receiver<MarketDataUpdate>;

    /// Lightweight liveness probe against the gateway connection itself
    /// (not a particular symbol). Used by the health-check loop.
    async fn ping(&self) -> bool;
}
