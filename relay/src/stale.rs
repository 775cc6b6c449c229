//! Background maintenance: cache cleanup, hub zombie sweep, rate-limiter
//! GC, and auth-cache scrub. Each runs as its own cancellable task so one
//! slow pass never delays another.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use relay_core::{Cache, Hub, StreamHandle};
use relay_middleware::{AuthGate, RateLimiter, UsageTracker};
use tokio::sync::oneshot;

/// Orderbook snapshots with no update in this long are treated as stale
/// and evicted from the cache, along with their trade history.
const STALE_ORDERBOOK_THRESHOLD: chrono::Duration = chrono::Duration::hours(24);

fn spawn_ticker(interval: Duration, mut tick: impl FnMut() + Send + 'static) -> StreamHandle {
    let (stop_tx, mut stop_rx) = oneshot::channel();
    let handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => tick(),
                _ = &mut stop_rx => break,
            }
        }
    });
    StreamHandle::new(handle, stop_tx)
}

fn spawn_async_ticker<F, Fut>(interval: Duration, mut tick: F) -> StreamHandle
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: std::future::Future<Output = ()> + Send,
{
    let (stop_tx, mut stop_rx) = oneshot::channel();
    let handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => tick().await,
                _ = &mut stop_rx => break,
            }
        }
    });
    StreamHandle::new(handle, stop_tx)
}

/// Owns the handles to the relay's periodic maintenance tasks.
pub struct StaleSweeper {
    tasks: Vec<StreamHandle>,
}

impl StaleSweeper {
    /// Launch the cache, hub, rate-limiter and auth maintenance tasks.
    #[must_use]
    pub fn start(
        cache: Arc<Cache>,
        hub: Arc<Hub>,
        rate_limiter: Arc<RateLimiter>,
        auth: Arc<AuthGate>,
        usage: Arc<UsageTracker>,
        cache_cleanup_interval: Duration,
        zombie_timeout: Duration,
        rate_cleanup_interval: Duration,
    ) -> Self {
        let cache_task = spawn_ticker(cache_cleanup_interval, move || {
            cache.cleanup(Utc::now(), STALE_ORDERBOOK_THRESHOLD);
        });
        let hub_task = spawn_ticker(zombie_timeout, move || {
            hub.cleanup_zombies(Utc::now());
        });
        let rate_task = spawn_ticker(rate_cleanup_interval, move || {
            rate_limiter.gc();
        });
        let auth_task = spawn_async_ticker(rate_cleanup_interval, move || {
            let auth = Arc::clone(&auth);
            async move { auth.run_pending_maintenance().await }
        });
        let usage_task = spawn_async_ticker(cache_cleanup_interval, move || {
            let usage = Arc::clone(&usage);
            async move { usage.flush().await }
        });

        Self {
            tasks: vec![cache_task, hub_task, rate_task, auth_task, usage_task],
        }
    }

    /// Stop all maintenance tasks, awaiting their graceful shutdown.
    pub async fn stop(self) {
        for task in self.tasks {
            task.stop().await;
        }
    }
}
