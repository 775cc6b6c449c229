//! `MarketRelay`: wires the Upstream Manager, Cache, Fan-out Hub, Rate
//! Limiter and Auth Gate behind the narrow surface a transport layer
//! consumes, per the ingress contract: `create_subscriber` ->
//! `acquire_stream` -> `subscribe(symbol)` -> deliver cached snapshot ->
//! pump the subscriber's send queue.

use std::sync::Arc;

use relay_core::{Cache, GatewayDecoder, Hub, Repository, Subscriber, UpstreamManager};
use relay_middleware::{AuthGate, DistributedCache, RateLimiter, UsageTracker};
use relay_types::{AuthRecord, MarketDataPayload, OrderbookSnapshot, RelayConfig, RelayError};
use tokio::sync::mpsc;
use tracing::warn;

use crate::stale::StaleSweeper;

/// Multi-tenant market-data relay: the composed data plane behind a
/// transport's credential, symbol and subscriber bookkeeping.
pub struct MarketRelay<D: GatewayDecoder + 'static> {
    upstream: Arc<UpstreamManager<D>>,
    cache: Arc<Cache>,
    hub: Arc<Hub>,
    rate_limiter: Arc<RateLimiter>,
    auth: Arc<AuthGate>,
    usage: Arc<UsageTracker>,
    config: RelayConfig,
    sweeper: StaleSweeper,
}

impl<D: GatewayDecoder + 'static> MarketRelay<D> {
    /// Start building a relay over the given decoder and repository.
    #[must_use]
    pub fn builder(decoder: Arc<D>, repository: Arc<dyn Repository>) -> MarketRelayBuilder<D> {
        MarketRelayBuilder::new(decoder, repository)
    }

    /// Validate an opaque credential string against the Auth Gate.
    ///
    /// On success, also pushes the record's `max_rps`/`max_concurrent_streams`
    /// into the rate limiter for `record.key_id`, so the first and every
    /// subsequent successful authentication keeps that key's quota in sync
    /// with its current plan.
    ///
    /// # Errors
    /// Returns the credential error classified by the Auth Gate pipeline
    /// (`MissingCredential`, `InvalidCredential`, `ExpiredCredential`,
    /// `RevokedCredential`, `SuspendedTenant`), or `Unavailable` if neither
    /// cache tier nor the repository could answer.
    pub async fn authenticate(&self, credential: &str) -> Result<AuthRecord, RelayError> {
        let record = self.auth.authenticate(credential).await?;
        self.rate_limiter.set_limit(
            &record.key_id,
            f64::from(record.max_rps),
            record.max_concurrent_streams,
        );
        Ok(record)
    }

    /// Purge a credential's cached record so the next `authenticate` call
    /// goes to the repository. Call after any administrative mutation of
    /// the owning key or tenant.
    pub async fn invalidate_credential(&self, credential: &str) {
        self.auth.invalidate_cache(credential).await;
    }

    /// Allocate a subscriber connection for `(tenant_id, key_id)`. The
    /// returned receiver must be pumped by the caller until it closes.
    #[must_use]
    pub fn create_subscriber(
        &self,
        id: impl Into<String>,
        tenant_id: impl Into<String>,
        key_id: impl Into<String>,
    ) -> (Arc<Subscriber>, mpsc::Receiver<relay_types::MarketDataUpdate>) {
        self.hub.create_subscriber(id, tenant_id, key_id)
    }

    /// Reserve one of `record`'s concurrent-stream slots.
    ///
    /// # Errors
    /// Returns `QuotaExceededStreams` if the key is already at its limit.
    pub fn acquire_stream(&self, record: &AuthRecord) -> Result<(), RelayError> {
        if self.rate_limiter.acquire_stream(&record.key_id) {
            let active = self.rate_limiter.active_streams(&record.key_id);
            self.usage
                .observe_active_streams(&record.tenant_id, &record.key_id, active);
            Ok(())
        } else {
            self.usage.record_error(&record.tenant_id, &record.key_id);
            Err(RelayError::QuotaExceededStreams)
        }
    }

    /// Release a stream slot previously granted by `acquire_stream`. Call
    /// on client disconnect.
    pub fn release_stream(&self, record: &AuthRecord) {
        self.rate_limiter.release_stream(&record.key_id);
    }

    /// Consume one of `record`'s request-rate tokens.
    ///
    /// # Errors
    /// Returns `QuotaExceededRps` if the bucket is empty.
    pub fn allow_request(&self, record: &AuthRecord) -> Result<(), RelayError> {
        if self.rate_limiter.allow(&record.key_id) {
            self.usage.record_request(&record.tenant_id, &record.key_id);
            Ok(())
        } else {
            self.usage.record_error(&record.tenant_id, &record.key_id);
            Err(RelayError::QuotaExceededRps)
        }
    }

    /// Register `subscriber` for `symbol` (creating an upstream ingest
    /// stream if this is the first subscriber to ask for it) and return the
    /// cached snapshot, if any.
    ///
    /// # Errors
    /// Returns `NotFound` if no snapshot is cached yet for `symbol`; the
    /// subscription side effect still takes place so a future snapshot
    /// reaches this subscriber through the fan-out hub.
    pub fn subscribe(
        &self,
        subscriber: &Arc<Subscriber>,
        symbol: &str,
    ) -> Result<OrderbookSnapshot, RelayError> {
        self.upstream.subscribe(symbol.to_string());
        self.hub.subscribe(symbol, Arc::clone(subscriber));
        self.cache
            .get_orderbook(symbol)
            .ok_or_else(|| RelayError::not_found(format!("orderbook for {symbol}")))
    }

    /// Remove `subscriber` from `symbol`'s topic. Does not tear down the
    /// upstream ingest stream, which may still be serving other
    /// subscribers; the stream is only torn down via `unsubscribe_symbol`.
    pub fn unsubscribe(&self, subscriber: &Arc<Subscriber>, symbol: &str) {
        self.hub.unsubscribe(symbol, &subscriber.id);
    }

    /// Tear down the upstream ingest stream for `symbol`, e.g. once the
    /// last interested subscriber has gone.
    pub async fn unsubscribe_symbol(&self, symbol: &str) {
        self.upstream.unsubscribe(symbol).await;
    }

    /// The most recent `n` trades cached for `symbol`.
    #[must_use]
    pub fn recent_trades(&self, symbol: &str, n: usize) -> Vec<relay_types::Trade> {
        self.cache.get_recent_trades(symbol, n)
    }

    /// Current lifecycle state of `symbol`'s upstream ingest stream.
    #[must_use]
    pub fn stream_status(&self, symbol: &str) -> Option<relay_types::UpstreamStream> {
        self.upstream.stream_status(symbol)
    }

    /// The gateway connection currently serving ingest traffic, if any.
    #[must_use]
    pub fn active_gateway(&self) -> Option<relay_types::GatewayConnection> {
        self.upstream.active_connection()
    }

    /// Total reconnects observed across all symbols and gateway failovers.
    #[must_use]
    pub fn reconnect_total(&self) -> u64 {
        self.upstream.reconnect_total()
    }

    /// Number of subscribers currently registered across all topics.
    #[must_use]
    pub fn active_subscribers(&self) -> u64 {
        self.hub.active_subscribers()
    }

    /// Total messages dropped hub-wide due to full subscriber queues.
    #[must_use]
    pub fn dropped_messages(&self) -> u64 {
        self.hub.dropped_messages()
    }

    /// Cancel all upstream streams, the health loop, and the background
    /// maintenance tasks (cache cleanup, rate-limiter GC, auth-cache scrub,
    /// zombie sweep). Blocks briefly for in-flight work to wind down.
    pub async fn stop(&self) {
        self.sweeper.stop().await;
        self.upstream.stop().await;
    }
}

fn ingest_update<D: GatewayDecoder + 'static>(
    cache: &Cache,
    hub: &Hub,
    update: relay_types::MarketDataUpdate,
) {
    match &update.payload {
        MarketDataPayload::Orderbook(snapshot) => {
            cache.update_orderbook(snapshot.clone());
        }
        MarketDataPayload::Trade(trade) => {
            cache.add_trade(trade.clone());
        }
        _ => warn!(symbol = %update.symbol, "ignoring unrecognized market data payload variant"),
    }
    hub.publish(&update.symbol, update);
}

/// Builder for a [`MarketRelay`]. Registers the decoder, repository, and
/// optional distributed cache, then constructs the data-plane components
/// from a `RelayConfig` and wires the sink that feeds ingested updates into
/// the cache and fan-out hub.
pub struct MarketRelayBuilder<D: GatewayDecoder + 'static> {
    decoder: Arc<D>,
    repository: Arc<dyn Repository>,
    distributed_cache: Option<Arc<dyn DistributedCache>>,
    config: RelayConfig,
    auth_cache_capacity: u64,
}

impl<D: GatewayDecoder + 'static> MarketRelayBuilder<D> {
    fn new(decoder: Arc<D>, repository: Arc<dyn Repository>) -> Self {
        Self {
            decoder,
            repository,
            distributed_cache: None,
            config: RelayConfig::default(),
            auth_cache_capacity: 100_000,
        }
    }

    /// Override the full configuration in one call.
    #[must_use]
    pub fn config(mut self, config: RelayConfig) -> Self {
        self.config = config;
        self
    }

    /// Register a second-tier cache consulted before the repository.
    #[must_use]
    pub fn distributed_cache(mut self, cache: Arc<dyn DistributedCache>) -> Self {
        self.distributed_cache = Some(cache);
        self
    }

    /// Cap the number of entries held in the in-process auth cache.
    #[must_use]
    pub const fn auth_cache_capacity(mut self, capacity: u64) -> Self {
        self.auth_cache_capacity = capacity;
        self
    }

    /// Construct the relay and start its background maintenance tasks and
    /// the upstream health-check loop.
    ///
    /// # Errors
    /// Returns `Unavailable` if no gateways are configured.
    pub fn build(self) -> Result<Arc<MarketRelay<D>>, RelayError> {
        let cache = Arc::new(Cache::new(self.config.cache));
        let hub = Arc::new(Hub::new(self.config.fanout));
        let rate_limiter = Arc::new(RateLimiter::new(self.config.rate));
        let auth = Arc::new(AuthGate::new(
            Arc::clone(&self.repository),
            self.distributed_cache,
            self.config.auth.cache_ttl,
            self.auth_cache_capacity,
        ));
        let usage = Arc::new(UsageTracker::new(Arc::clone(&self.repository)));

        let delivery_usage = Arc::clone(&usage);
        hub.set_on_delivery(Arc::new(move |tenant_id, key_id| {
            delivery_usage.record_messages(tenant_id, key_id, 1);
        }));

        let sink_cache = Arc::clone(&cache);
        let sink_hub = Arc::clone(&hub);
        let upstream = Arc::new(UpstreamManager::new(
            self.config.upstream.clone(),
            Arc::clone(&self.decoder),
            Arc::new(move |update| ingest_update::<D>(&sink_cache, &sink_hub, update)),
        ));
        upstream.start()?;

        let sweeper = StaleSweeper::start(
            Arc::clone(&cache),
            Arc::clone(&hub),
            Arc::clone(&rate_limiter),
            Arc::clone(&auth),
            Arc::clone(&usage),
            self.config.cache.cleanup_interval,
            self.config.fanout.zombie_timeout,
            self.config.rate.cleanup_interval,
        );

        Ok(Arc::new(MarketRelay {
            upstream,
            cache,
            hub,
            rate_limiter,
            auth,
            usage,
            config: self.config,
            sweeper,
        }))
    }
}

impl<D: GatewayDecoder + 'static> MarketRelay<D> {
    /// The configuration this relay was built with.
    #[must_use]
    pub const fn config(&self) -> &RelayConfig {
        &self.config
    }
}
