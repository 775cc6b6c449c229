//! Upstream Manager: owns the set of candidate gateways, runs a health
//! loop, fails over between gateways on sustained unhealth, and supervises
//! one ingest task per subscribed symbol with exponential backoff.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use chrono::Utc;
use rand::Rng;
use relay_types::{
    GatewayConnection, GatewayEndpoint, MarketDataUpdate, StreamStatus, Symbol, UpstreamConfig,
    UpstreamStream,
};
use tokio::sync::oneshot;
use tracing::{info, warn};

use crate::decoder::GatewayDecoder;
use crate::error::CoreError;
use crate::stream::StreamHandle;

/// An active stream with no received frame in this long is treated as dead
/// even if it still answers pings.
const DATA_LIVENESS_THRESHOLD: Duration = Duration::from_secs(30);
/// Width of the sliding window the error-rate health check looks back over.
const ERROR_RATE_WINDOW: Duration = Duration::from_secs(60);
/// Error rate above this fraction within the window marks the gateway unhealthy.
const ERROR_RATE_THRESHOLD: f64 = 0.05;

/// Compute the reconnect delay for the `n`th consecutive failure (1-based):
/// `min(base * factor^(n-1), max)` perturbed by a uniform jitter in
/// `[-jitter_percent%, +jitter_percent%]`.
#[must_use]
pub fn backoff_delay_ms(
    min_backoff_ms: u64,
    max_backoff_ms: u64,
    factor: u32,
    jitter_percent: u8,
    failures: u32,
) -> u64 {
    let exponent = failures.saturating_sub(1);
    let scaled = u64::from(factor)
        .checked_pow(exponent)
        .map_or(max_backoff_ms, |f| min_backoff_ms.saturating_mul(f));
    let base = scaled.min(max_backoff_ms);
    jitter_symmetric(base, jitter_percent)
}

/// Perturb `base_ms` by a uniform jitter in `[-jitter_percent%, +jitter_percent%]`.
#[must_use]
pub fn jitter_symmetric(base_ms: u64, jitter_percent: u8) -> u64 {
    if jitter_percent == 0 || base_ms == 0 {
        return base_ms;
    }
    let range = (base_ms.saturating_mul(u64::from(jitter_percent))) / 100;
    if range == 0 {
        return base_ms;
    }
    let mut rng = rand::rng();
    let delta: i64 = rng.random_range(-(range as i64)..=(range as i64));
    (i64::try_from(base_ms).unwrap_or(i64::MAX) + delta).max(0) as u64
}

/// Bookkeeping for one subscribed symbol's ingest task.
struct StreamEntry {
    handle: Option<StreamHandle>,
    status: Arc<RwLock<UpstreamStream>>,
}

/// Owns the upstream gateway list, the current active connection, and the
/// per-symbol ingest streams. The data-sink callback supplied at
/// construction is invoked for every decoded frame; it must not block
/// (Cache update + Hub publish).
pub struct UpstreamManager<D: GatewayDecoder + 'static> {
    decoder: Arc<D>,
    config: UpstreamConfig,
    gateways: Vec<GatewayEndpoint>,
    active: RwLock<Option<GatewayConnection>>,
    streams: RwLock<HashMap<Symbol, StreamEntry>>,
    failover_in_progress: AtomicBool,
    reconnect_total: AtomicU64,
    health_task: RwLock<Option<StreamHandle>>,
    sink: Arc<dyn Fn(MarketDataUpdate) + Send + Sync>,
    /// Sliding log of ingest outcomes (`true` = error/disconnect) used by
    /// the error-rate health check; entries older than `ERROR_RATE_WINDOW`
    /// are pruned lazily on each record/read.
    events: Mutex<VecDeque<(Instant, bool)>>,
}

impl<D: GatewayDecoder + 'static> UpstreamManager<D> {
    /// Construct a manager over the gateways named in `config`, sorted by
    /// ascending priority. `sink` is invoked for every ingested update and
    /// must not block.
    #[must_use]
    pub fn new(
        config: UpstreamConfig,
        decoder: Arc<D>,
        sink: Arc<dyn Fn(MarketDataUpdate) + Send + Sync>,
    ) -> Self {
        let mut gateways: Vec<GatewayEndpoint> = config
            .gateways
            .iter()
            .map(|g| GatewayEndpoint {
                endpoint: g.endpoint.clone(),
                priority: g.priority,
                region: g.region.clone(),
            })
            .collect();
        gateways.sort_by_key(|g| g.priority);
        Self {
            decoder,
            config,
            gateways,
            active: RwLock::new(None),
            streams: RwLock::new(HashMap::new()),
            failover_in_progress: AtomicBool::new(false),
            reconnect_total: AtomicU64::new(0),
            health_task: RwLock::new(None),
            sink,
            events: Mutex::new(VecDeque::new()),
        }
    }

    fn record_event(&self, is_error: bool) {
        let now = Instant::now();
        let mut events = self.events.lock().expect("events lock poisoned");
        events.push_back((now, is_error));
        while events
            .front()
            .is_some_and(|(t, _)| now.saturating_duration_since(*t) > ERROR_RATE_WINDOW)
        {
            events.pop_front();
        }
    }

    /// Fraction of ingest outcomes recorded as errors within the trailing
    /// `ERROR_RATE_WINDOW`. `0.0` if no events have been recorded yet.
    fn error_rate(&self) -> f64 {
        let now = Instant::now();
        let mut events = self.events.lock().expect("events lock poisoned");
        while events
            .front()
            .is_some_and(|(t, _)| now.saturating_duration_since(*t) > ERROR_RATE_WINDOW)
        {
            events.pop_front();
        }
        if events.is_empty() {
            return 0.0;
        }
        let errors = events.iter().filter(|(_, is_error)| *is_error).count();
        errors as f64 / events.len() as f64
    }

    /// Whether any actively-streaming symbol has gone longer than
    /// `DATA_LIVENESS_THRESHOLD` without a received frame.
    fn has_stale_active_stream(&self) -> bool {
        let now = Utc::now();
        let threshold = chrono::Duration::from_std(DATA_LIVENESS_THRESHOLD)
            .unwrap_or(chrono::Duration::seconds(30));
        let streams = self.streams.read().expect("streams lock poisoned");
        streams.values().any(|entry| {
            let st = entry.status.read().expect("stream status lock poisoned");
            st.status == StreamStatus::Active
                && st.last_update.is_some_and(|last| now - last > threshold)
        })
    }

    /// Total reconnects observed across all symbols and failovers.
    #[must_use]
    pub fn reconnect_total(&self) -> u64 {
        self.reconnect_total.load(Ordering::Relaxed)
    }

    /// The currently active gateway connection, if any.
    #[must_use]
    pub fn active_connection(&self) -> Option<GatewayConnection> {
        self.active.read().expect("active lock poisoned").clone()
    }

    /// Select the minimum-priority gateway, mark it active, and start the
    /// health-check loop. Fails if no gateways are configured.
    pub fn start(self: &Arc<Self>) -> Result<(), CoreError> {
        let endpoint = self
            .gateways
            .first()
            .cloned()
            .ok_or(CoreError::NoGatewaysConfigured)?;
        *self.active.write().expect("active lock poisoned") = Some(GatewayConnection {
            endpoint,
            last_ping: Some(Utc::now()),
            reconnect_count: 0,
            connected: true,
        });

        let mgr = Arc::clone(self);
        let interval = self.config.health_check_interval;
        let (stop_tx, mut stop_rx) = oneshot::channel();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        mgr.run_health_check().await;
                    }
                    _ = &mut stop_rx => break,
                }
            }
        });
        *self.health_task.write().expect("health task lock poisoned") =
            Some(StreamHandle::new(handle, stop_tx));
        Ok(())
    }

    async fn run_health_check(self: &Arc<Self>) {
        let ping_ok = tokio::time::timeout(Duration::from_secs(1), self.decoder.ping())
            .await
            .unwrap_or(false);
        if !ping_ok {
            warn!("active gateway failed ping health check, beginning failover sweep");
            self.failover().await;
            return;
        }

        if self.has_stale_active_stream() {
            warn!(
                threshold_secs = DATA_LIVENESS_THRESHOLD.as_secs(),
                "active stream exceeded data-liveness threshold, beginning failover sweep"
            );
            self.failover().await;
            return;
        }

        let error_rate = self.error_rate();
        if error_rate > ERROR_RATE_THRESHOLD {
            warn!(error_rate, "ingest error rate exceeded threshold, beginning failover sweep");
            self.failover().await;
            return;
        }

        if let Some(conn) = self.active.write().expect("active lock poisoned").as_mut() {
            conn.last_ping = Some(Utc::now());
            conn.connected = true;
        }
    }

    /// Iterate gateways in priority order looking for a healthy one.
    /// `failover_in_progress` is a single-flight guard: only one sweep
    /// proceeds at a time.
    async fn failover(self: &Arc<Self>) {
        if self
            .failover_in_progress
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }
        let _guard = scopeguard(&self.failover_in_progress);

        for endpoint in &self.gateways {
            if self.decoder.ping().await {
                *self.active.write().expect("active lock poisoned") = Some(GatewayConnection {
                    endpoint: endpoint.clone(),
                    last_ping: Some(Utc::now()),
                    reconnect_count: self
                        .active_connection()
                        .map_or(0, |c| c.reconnect_count + 1),
                    connected: true,
                });
                self.reconnect_total.fetch_add(1, Ordering::Relaxed);
                info!(endpoint = %endpoint.endpoint, "failed over to gateway");
                return;
            }
        }
        if let Some(conn) = self.active.write().expect("active lock poisoned").as_mut() {
            conn.connected = false;
        }
        warn!("all gateways unavailable during failover sweep");
    }

    /// Idempotent: ensure a per-symbol ingest stream exists. Returns as
    /// soon as the stream is registered; the connection itself proceeds
    /// asynchronously.
    pub fn subscribe(self: &Arc<Self>, symbol: Symbol) {
        {
            let streams = self.streams.read().expect("streams lock poisoned");
            if streams.contains_key(&symbol) {
                return;
            }
        }
        let status = Arc::new(RwLock::new(UpstreamStream {
            symbol: symbol.clone(),
            status: StreamStatus::Connecting,
            last_update: None,
            reconnect_count: 0,
        }));

        let mgr = Arc::clone(self);
        let sym = symbol.clone();
        let status_for_task = Arc::clone(&status);
        let (stop_tx, stop_rx) = oneshot::channel();
        let handle = tokio::spawn(async move {
            mgr.run_symbol_stream(sym, status_for_task, stop_rx).await;
        });

        let mut streams = self.streams.write().expect("streams lock poisoned");
        streams
            .entry(symbol)
            .or_insert_with(|| StreamEntry {
                handle: Some(StreamHandle::new(handle, stop_tx)),
                status,
            });
    }

    async fn run_symbol_stream(
        self: Arc<Self>,
        symbol: Symbol,
        status: Arc<RwLock<UpstreamStream>>,
        mut stop_rx: oneshot::Receiver<()>,
    ) {
        let mut failures: u32 = 0;
        loop {
            let (ingest_stop_tx, ingest_stop_rx) = oneshot::channel();
            let mut rx = self.decoder.ingest(symbol.clone(), ingest_stop_rx).await;

            {
                let mut st = status.write().expect("stream status lock poisoned");
                st.status = StreamStatus::Active;
            }

            let closed_cleanly = loop {
                tokio::select! {
                    biased;
                    _ = &mut stop_rx => {
                        let _ = ingest_stop_tx.send(());
                        let mut st = status.write().expect("stream status lock poisoned");
                        st.status = StreamStatus::Closed;
                        return;
                    }
                    update = rx.recv() => {
                        match update {
                            Some(update) => {
                                failures = 0;
                                self.record_event(false);
                                let mut st = status.write().expect("stream status lock poisoned");
                                st.last_update = Some(Utc::now());
                                drop(st);
                                (self.sink)(update);
                            }
                            None => break true,
                        }
                    }
                }
            };
            drop(ingest_stop_tx);
            let _ = closed_cleanly;

            failures += 1;
            self.record_event(true);
            self.reconnect_total.fetch_add(1, Ordering::Relaxed);
            let backoff = &self.config.backoff;
            let delay_ms = backoff_delay_ms(
                backoff.min_backoff_ms,
                backoff.max_backoff_ms,
                backoff.factor,
                backoff.jitter_percent,
                failures,
            );
            {
                let mut st = status.write().expect("stream status lock poisoned");
                st.status = StreamStatus::Reconnecting;
                st.reconnect_count += 1;
            }
            tokio::select! {
                _ = &mut stop_rx => {
                    let mut st = status.write().expect("stream status lock poisoned");
                    st.status = StreamStatus::Closed;
                    return;
                }
                () = tokio::time::sleep(Duration::from_millis(delay_ms)) => {}
            }
        }
    }

    /// Idempotent: tear down the per-symbol stream, if any.
    pub async fn unsubscribe(&self, symbol: &str) {
        let entry = {
            let mut streams = self.streams.write().expect("streams lock poisoned");
            streams.remove(symbol)
        };
        if let Some(entry) = entry {
            if let Some(handle) = entry.handle {
                handle.stop().await;
            }
        }
    }

    /// Current lifecycle snapshot for `symbol`, if a stream is registered.
    #[must_use]
    pub fn stream_status(&self, symbol: &str) -> Option<UpstreamStream> {
        let streams = self.streams.read().expect("streams lock poisoned");
        streams
            .get(symbol)
            .map(|e| e.status.read().expect("stream status lock poisoned").clone())
    }

    /// Cancel all per-symbol streams and the health loop, releasing the
    /// worker pool. Blocks briefly for in-flight work to wind down.
    pub async fn stop(&self) {
        let entries: Vec<StreamEntry> = {
            let mut streams = self.streams.write().expect("streams lock poisoned");
            streams.drain().map(|(_, v)| v).collect()
        };
        for entry in entries {
            if let Some(handle) = entry.handle {
                handle.stop().await;
            }
        }
        let health = self.health_task.write().expect("health task lock poisoned").take();
        if let Some(handle) = health {
            handle.stop().await;
        }
    }
}

/// RAII guard clearing a single-flight `AtomicBool` on drop.
fn scopeguard(flag: &AtomicBool) -> impl Drop + '_ {
    struct Guard<'a>(&'a AtomicBool);
    impl Drop for Guard<'_> {
        fn drop(&mut self) {
            self.0.store(false, Ordering::SeqCst);
        }
    }
    Guard(flag)
}
