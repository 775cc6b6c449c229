//! Token-bucket request limiter and per-key concurrent-stream semaphore.
//!
//! State is grouped per key (tenant or API key, caller's choice) behind a
//! single mutex, mirroring the `Mutex`-guarded runtime pattern the rest of
//! this crate uses for call accounting: a key's bucket and stream count are
//! read and written together, so there is one lock to reason about instead
//! of two that can drift out of sync.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use relay_types::RateConfig;
use tokio::sync::oneshot;
use tokio::time::sleep;

struct ClientState {
    rps: f64,
    burst: f64,
    tokens: f64,
    last_refill: Instant,
    max_streams: u32,
    active_streams: u32,
    last_access: Instant,
}

impl ClientState {
    fn new(rps: f64, burst_multiplier: f64, max_streams: u32, now: Instant) -> Self {
        let burst = rps * burst_multiplier;
        Self {
            rps,
            burst,
            tokens: burst,
            last_refill: now,
            max_streams,
            active_streams: 0,
            last_access: now,
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        if elapsed > 0.0 {
            self.tokens = (self.tokens + elapsed * self.rps).min(self.burst);
            self.last_refill = now;
        }
    }

    fn try_take(&mut self, n: f64, now: Instant) -> bool {
        self.refill(now);
        self.last_access = now;
        if self.tokens >= n {
            self.tokens -= n;
            true
        } else {
            false
        }
    }
}

/// Per-key request-rate and concurrent-stream limiter.
///
/// One token bucket and one stream counter are maintained per key; a key
/// that has never been seen is lazily created with the configured defaults
/// on first touch.
pub struct RateLimiter {
    config: RateConfig,
    clients: Mutex<HashMap<String, ClientState>>,
}

impl RateLimiter {
    /// Construct a limiter with the given defaults for unseen keys.
    pub fn new(config: RateConfig) -> Self {
        Self {
            config,
            clients: Mutex::new(HashMap::new()),
        }
    }

    fn with_client<T>(&self, key: &str, f: impl FnOnce(&mut ClientState) -> T) -> T {
        let now = Instant::now();
        let mut clients = self.clients.lock().expect("rate limiter mutex poisoned");
        let entry = clients.entry(key.to_string()).or_insert_with(|| {
            ClientState::new(
                f64::from(self.config.default_rps),
                self.config.burst_multiplier,
                self.config.default_max_streams,
                now,
            )
        });
        f(entry)
    }

    /// Attempt to consume one token for `key`. Returns `false` without
    /// blocking if the bucket is empty.
    pub fn allow(&self, key: &str) -> bool {
        self.allow_n(key, 1.0)
    }

    /// Attempt to consume `n` tokens for `key` as a single atomic check.
    pub fn allow_n(&self, key: &str, n: f64) -> bool {
        let now = Instant::now();
        self.with_client(key, |c| c.try_take(n, now))
    }

    /// Poll until a token is available for `key`, or `cancel` resolves
    /// first. Returns `false` if cancelled before a token was granted.
    pub async fn wait(&self, key: &str, mut cancel: oneshot::Receiver<()>) -> bool {
        loop {
            if self.allow(key) {
                return true;
            }
            tokio::select! {
                _ = &mut cancel => return false,
                _ = sleep(Duration::from_millis(25)) => {}
            }
        }
    }

    /// Reserve one of `key`'s concurrent-stream slots. Returns `false` if
    /// the key is already at its stream limit.
    pub fn acquire_stream(&self, key: &str) -> bool {
        self.with_client(key, |c| {
            if c.active_streams < c.max_streams {
                c.active_streams += 1;
                true
            } else {
                false
            }
        })
    }

    /// Release a stream slot previously granted by [`acquire_stream`].
    /// Saturates at zero so a duplicate release cannot underflow the count.
    ///
    /// [`acquire_stream`]: RateLimiter::acquire_stream
    pub fn release_stream(&self, key: &str) {
        self.with_client(key, |c| {
            c.active_streams = c.active_streams.saturating_sub(1);
        });
    }

    /// Number of streams currently held open for `key`.
    pub fn active_streams(&self, key: &str) -> u32 {
        let mut clients = self.clients.lock().expect("rate limiter mutex poisoned");
        clients.get_mut(key).map_or(0, |c| c.active_streams)
    }

    /// Override the per-second rate and stream ceiling for a specific key,
    /// e.g. after a plan upgrade. Creates the key if it hasn't been seen.
    pub fn set_limit(&self, key: &str, rps: f64, max_streams: u32) {
        let now = Instant::now();
        let burst_multiplier = self.config.burst_multiplier;
        let mut clients = self.clients.lock().expect("rate limiter mutex poisoned");
        let entry = clients
            .entry(key.to_string())
            .or_insert_with(|| ClientState::new(rps, burst_multiplier, max_streams, now));
        entry.rps = rps;
        entry.burst = rps * burst_multiplier;
        entry.max_streams = max_streams;
        entry.tokens = entry.tokens.min(entry.burst);
        entry.last_access = now;
    }

    /// Drop keys idle for more than twice the configured cleanup interval
    /// that hold no open streams. Intended to run on a periodic tick.
    pub fn gc(&self) {
        let now = Instant::now();
        let stale_after = self.config.cleanup_interval.saturating_mul(2);
        let mut clients = self.clients.lock().expect("rate limiter mutex poisoned");
        let before = clients.len();
        clients.retain(|_, c| {
            c.active_streams > 0 || now.saturating_duration_since(c.last_access) < stale_after
        });
        let dropped = before - clients.len();
        if dropped > 0 {
            tracing::debug!(dropped, remaining = clients.len(), "rate limiter gc swept idle keys");
        }
    }

    /// Number of distinct keys currently tracked. Exposed for tests and
    /// diagnostics.
    pub fn tracked_keys(&self) -> usize {
        self.clients.lock().expect("rate limiter mutex poisoned").len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> RateConfig {
        RateConfig {
            default_rps: 10,
            default_max_streams: 2,
            burst_multiplier: 1.0,
            cleanup_interval: Duration::from_secs(60),
        }
    }

    #[test]
    fn allow_exhausts_burst_then_refuses() {
        let limiter = RateLimiter::new(config());
        for _ in 0..10 {
            assert!(limiter.allow("tenant-a"));
        }
        assert!(!limiter.allow("tenant-a"));
    }

    #[test]
    fn distinct_keys_have_independent_buckets() {
        let limiter = RateLimiter::new(config());
        for _ in 0..10 {
            assert!(limiter.allow("tenant-a"));
        }
        assert!(!limiter.allow("tenant-a"));
        assert!(limiter.allow("tenant-b"));
    }

    #[test]
    fn stream_semaphore_blocks_past_limit_and_releases() {
        let limiter = RateLimiter::new(config());
        assert!(limiter.acquire_stream("tenant-a"));
        assert!(limiter.acquire_stream("tenant-a"));
        assert!(!limiter.acquire_stream("tenant-a"));
        limiter.release_stream("tenant-a");
        assert!(limiter.acquire_stream("tenant-a"));
    }

    #[test]
    fn release_stream_saturates_at_zero() {
        let limiter = RateLimiter::new(config());
        limiter.release_stream("tenant-a");
        limiter.release_stream("tenant-a");
        assert_eq!(limiter.active_streams("tenant-a"), 0);
    }

    #[test]
    fn set_limit_raises_ceiling_for_existing_key() {
        let limiter = RateLimiter::new(config());
        assert!(limiter.acquire_stream("tenant-a"));
        assert!(limiter.acquire_stream("tenant-a"));
        assert!(!limiter.acquire_stream("tenant-a"));
        limiter.set_limit("tenant-a", 10.0, 3);
        assert!(limiter.acquire_stream("tenant-a"));
    }

    #[test]
    fn gc_drops_idle_keys_but_keeps_active_streams() {
        let limiter = RateLimiter::new(config());
        limiter.allow("idle-tenant");
        limiter.acquire_stream("busy-tenant");
        {
            let mut clients = limiter.clients.lock().unwrap();
            let stale = Instant::now() - Duration::from_secs(600);
            for c in clients.values_mut() {
                c.last_access = stale;
            }
        }
        limiter.gc();
        assert_eq!(limiter.tracked_keys(), 1);
        assert_eq!(limiter.active_streams("busy-tenant"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn wait_returns_once_bucket_refills() {
        let limiter = RateLimiter::new(RateConfig {
            default_rps: 1,
            default_max_streams: 1,
            burst_multiplier: 1.0,
            cleanup_interval: Duration::from_secs(60),
        });
        assert!(limiter.allow("tenant-a"));
        assert!(!limiter.allow("tenant-a"));

        let (_tx, rx) = oneshot::channel();
        let waited = tokio::time::timeout(Duration::from_secs(5), limiter.wait("tenant-a", rx)).await;
        assert_eq!(waited, Ok(true));
    }

    #[tokio::test]
    async fn wait_returns_false_when_cancelled() {
        let limiter = RateLimiter::new(RateConfig {
            default_rps: 0,
            default_max_streams: 1,
            burst_multiplier: 0.0,
            cleanup_interval: Duration::from_secs(60),
        });
        let (tx, rx) = oneshot::channel();
        let wait = tokio::spawn(async move { limiter.wait("tenant-a", rx).await });
        drop(tx);
        assert_eq!(wait.await.unwrap(), false);
    }
}
