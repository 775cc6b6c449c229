//! Fan-out Hub: topic registry, non-blocking publish, slow-consumer
//! eviction, and zombie sweep.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Utc};
use relay_types::{FanoutConfig, MarketDataUpdate, Symbol};
use tokio::sync::mpsc;
use tracing::debug;

/// A single subscriber's send-side state. The Hub may hand out further
/// `Arc<Subscriber>` clones (e.g. to the transport layer), but `sender` is
/// held behind a mutex the Hub owns exclusively: closing a subscriber
/// clears it, which drops the one and only `Sender` and closes the
/// `Receiver` end for good, regardless of how many `Arc` clones are still
/// alive elsewhere.
pub struct Subscriber {
    /// Unique subscriber id, assigned by the caller at creation time.
    pub id: String,
    /// Tenant this subscriber belongs to.
    pub tenant_id: String,
    /// API key this subscriber authenticated with.
    pub key_id: String,
    sender: Mutex<Option<mpsc::Sender<MarketDataUpdate>>>,
    connect_time: DateTime<Utc>,
    last_send: RwLock<DateTime<Utc>>,
    dropped_count: AtomicU64,
    closed: AtomicBool,
}

impl Subscriber {
    fn new(
        id: String,
        tenant_id: String,
        key_id: String,
        sender: mpsc::Sender<MarketDataUpdate>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            tenant_id,
            key_id,
            sender: Mutex::new(Some(sender)),
            connect_time: now,
            last_send: RwLock::new(now),
            dropped_count: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Total number of publishes dropped because this subscriber's queue
    /// was full.
    #[must_use]
    pub fn dropped_count(&self) -> u64 {
        self.dropped_count.load(Ordering::Relaxed)
    }

    /// Time this subscriber was created.
    #[must_use]
    pub const fn connect_time(&self) -> DateTime<Utc> {
        self.connect_time
    }

    /// Last time a publish was successfully enqueued.
    #[must_use]
    pub fn last_send(&self) -> DateTime<Utc> {
        *self.last_send.read().expect("last_send lock poisoned")
    }

    /// Check-and-set the subscriber's one-shot closed flag. Returns `true`
    /// only for the caller that wins the race to close it; all eviction
    /// paths must use this before dropping the sender, guaranteeing a
    /// subscriber's queue is closed exactly once.
    fn mark_closed(&self) -> bool {
        self.closed
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Whether this subscriber has already been evicted/unsubscribed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

struct Topic {
    subscribers: HashMap<String, Arc<Subscriber>>,
    last_update: Option<DateTime<Utc>>,
}

impl Topic {
    const fn new() -> Self {
        Self {
            subscribers: HashMap::new(),
            last_update: None,
        }
    }
}

/// Outcome of a single subscriber delivery attempt during `publish`.
enum SendOutcome {
    Delivered,
    Dropped,
    Evicted,
}

/// Fan-out hub: non-blocking publish to many per-symbol subscribers, with
/// slow-consumer eviction and a zombie sweeper.
///
/// Locking discipline: map-lock -> topic-lock -> subscriber operations; no
/// lock is held across a send attempt. `publish` takes a read lock on the
/// topic map, clones the subscriber list, releases the lock, then sends.
pub struct Hub {
    config: FanoutConfig,
    topics: RwLock<HashMap<Symbol, RwLock<Topic>>>,
    dropped_messages: AtomicU64,
    active_subscribers: AtomicU64,
    on_delivery: RwLock<Option<Arc<dyn Fn(&str, &str) + Send + Sync>>>,
}

impl Hub {
    /// Construct an empty hub with the given configuration.
    #[must_use]
    pub fn new(config: FanoutConfig) -> Self {
        Self {
            config,
            topics: RwLock::new(HashMap::new()),
            dropped_messages: AtomicU64::new(0),
            active_subscribers: AtomicU64::new(0),
            on_delivery: RwLock::new(None),
        }
    }

    /// Register a callback invoked with `(tenant_id, key_id)` after every
    /// successfully delivered message, e.g. to feed usage accounting.
    /// Must not block; it runs inline with `publish`.
    pub fn set_on_delivery(&self, callback: Arc<dyn Fn(&str, &str) + Send + Sync>) {
        *self.on_delivery.write().expect("hub on_delivery lock poisoned") = Some(callback);
    }

    /// Total messages dropped hub-wide due to full subscriber queues.
    #[must_use]
    pub fn dropped_messages(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }

    /// Current count of subscribers registered across all topics.
    #[must_use]
    pub fn active_subscribers(&self) -> u64 {
        self.active_subscribers.load(Ordering::Relaxed)
    }

    /// Allocate a subscriber with a bounded queue, returning the shared
    /// handle (for Hub bookkeeping) and the receiving end (for the
    /// transport layer to pump until closed).
    #[must_use]
    pub fn create_subscriber(
        &self,
        id: impl Into<String>,
        tenant_id: impl Into<String>,
        key_id: impl Into<String>,
    ) -> (Arc<Subscriber>, mpsc::Receiver<MarketDataUpdate>) {
        let (tx, rx) = mpsc::channel(self.config.subscriber_buffer_size);
        let sub = Arc::new(Subscriber::new(
            id.into(),
            tenant_id.into(),
            key_id.into(),
            tx,
            Utc::now(),
        ));
        (sub, rx)
    }

    /// Add `sub` to the topic for `symbol`, creating the topic lazily.
    pub fn subscribe(&self, symbol: &str, sub: Arc<Subscriber>) {
        self.with_topic_mut(symbol, |topic| {
            topic.subscribers.insert(sub.id.clone(), sub);
        });
        self.active_subscribers.fetch_add(1, Ordering::Relaxed);
    }

    /// Remove the subscriber `id` from `symbol`'s topic, closing its
    /// queue exactly once.
    pub fn unsubscribe(&self, symbol: &str, id: &str) {
        let removed = self.with_topic_mut(symbol, |topic| topic.subscribers.remove(id));
        if let Some(sub) = removed {
            self.close_subscriber(&sub);
        }
    }

    /// Deliver `update` to every current subscriber of `symbol`. Never
    /// suspends: each delivery is a non-blocking `try_send`.
    pub fn publish(&self, symbol: &str, update: MarketDataUpdate) {
        let subs: Vec<Arc<Subscriber>> = {
            let topics = self.topics.read().expect("hub topics lock poisoned");
            match topics.get(symbol) {
                Some(topic_lock) => {
                    let topic = topic_lock.read().expect("hub topic lock poisoned");
                    topic.subscribers.values().cloned().collect()
                }
                None => return,
            }
        };

        let callback = self
            .on_delivery
            .read()
            .expect("hub on_delivery lock poisoned")
            .clone();

        let mut evicted = Vec::new();
        for sub in &subs {
            match self.try_deliver(sub, &update) {
                SendOutcome::Delivered => {
                    if let Some(cb) = &callback {
                        cb(&sub.tenant_id, &sub.key_id);
                    }
                }
                SendOutcome::Dropped => {
                    self.dropped_messages.fetch_add(1, Ordering::Relaxed);
                }
                SendOutcome::Evicted => {
                    self.dropped_messages.fetch_add(1, Ordering::Relaxed);
                    evicted.push(sub.id.clone());
                }
            }
        }

        for id in evicted {
            self.unsubscribe(symbol, &id);
        }

        self.with_topic_mut(symbol, |topic| {
            topic.last_update = Some(Utc::now());
        });
    }

    fn try_deliver(&self, sub: &Arc<Subscriber>, update: &MarketDataUpdate) -> SendOutcome {
        let sender = sub.sender.lock().expect("subscriber sender lock poisoned");
        let Some(tx) = sender.as_ref() else {
            return SendOutcome::Evicted;
        };
        match tx.try_send(update.clone()) {
            Ok(()) => {
                drop(sender);
                *sub.last_send.write().expect("last_send lock poisoned") = Utc::now();
                SendOutcome::Delivered
            }
            Err(_) => {
                drop(sender);
                let dropped = sub.dropped_count.fetch_add(1, Ordering::Relaxed) + 1;
                if dropped > self.config.slow_consumer_threshold {
                    SendOutcome::Evicted
                } else {
                    SendOutcome::Dropped
                }
            }
        }
    }

    /// Remove subscribers across all topics whose `last_send` predates
    /// `now - zombie_timeout`.
    pub fn cleanup_zombies(&self, now: DateTime<Utc>) {
        let cutoff = now - self.config.zombie_timeout;
        let topics = self.topics.read().expect("hub topics lock poisoned");
        for (symbol, topic_lock) in topics.iter() {
            let zombies: Vec<String> = {
                let topic = topic_lock.read().expect("hub topic lock poisoned");
                topic
                    .subscribers
                    .values()
                    .filter(|s| s.last_send() < cutoff)
                    .map(|s| s.id.clone())
                    .collect()
            };
            for id in zombies {
                let removed = {
                    let mut topic = topic_lock.write().expect("hub topic lock poisoned");
                    topic.subscribers.remove(&id)
                };
                if let Some(sub) = removed {
                    debug!(symbol = %symbol, subscriber = %id, "sweeping zombie subscriber");
                    self.close_subscriber(&sub);
                }
            }
        }
    }

    fn close_subscriber(&self, sub: &Arc<Subscriber>) {
        if sub.mark_closed() {
            // The hub is the sole owner of the sender; dropping it here
            // closes the channel for the receiving end even though other
            // `Arc<Subscriber>` clones (e.g. held by the transport layer)
            // may still be alive.
            sub.sender.lock().expect("subscriber sender lock poisoned").take();
            self.active_subscribers.fetch_sub(1, Ordering::Relaxed);
        }
    }

    fn with_topic_mut<T>(&self, symbol: &str, f: impl FnOnce(&mut Topic) -> T) -> T {
        {
            let topics = self.topics.read().expect("hub topics lock poisoned");
            if let Some(topic_lock) = topics.get(symbol) {
                let mut topic = topic_lock.write().expect("hub topic lock poisoned");
                return f(&mut topic);
            }
        }
        let mut topics = self.topics.write().expect("hub topics lock poisoned");
        let topic_lock = topics
            .entry(symbol.to_string())
            .or_insert_with(|| RwLock::new(Topic::new()));
        let mut topic = topic_lock.write().expect("hub topic lock poisoned");
        f(&mut topic)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_types::{MarketDataPayload, OrderbookSnapshot};

    fn update(symbol: &str, seq: u64) -> MarketDataUpdate {
        MarketDataUpdate {
            symbol: symbol.to_string(),
            timestamp: Utc::now(),
            sequence: seq,
            is_snapshot: true,
            payload: MarketDataPayload::Orderbook(OrderbookSnapshot {
                symbol: symbol.to_string(),
                timestamp: Utc::now(),
                sequence: seq,
                asks: vec![],
                bids: vec![],
            }),
        }
    }

    #[test]
    fn publish_delivers_to_subscriber() {
        let hub = Hub::new(FanoutConfig::default());
        let (sub, mut rx) = hub.create_subscriber("s1", "t1", "k1");
        hub.subscribe("XYZ", sub);
        hub.publish("XYZ", update("XYZ", 1));
        let got = rx.try_recv().expect("expected a delivered update");
        assert_eq!(got.sequence, 1);
    }

    #[tokio::test]
    async fn slow_consumer_is_evicted_and_queue_closed() {
        let mut cfg = FanoutConfig::default();
        cfg.subscriber_buffer_size = 4;
        cfg.slow_consumer_threshold = 3;
        let hub = Hub::new(cfg);
        let (sub, mut rx) = hub.create_subscriber("s1", "t1", "k1");
        hub.subscribe("XYZ", sub);

        // never read from rx: 4 fill the buffer, then 4 more are dropped,
        // the 8th tips dropped_count (5th drop) over slow_consumer_threshold=3
        for i in 0..8 {
            hub.publish("XYZ", update("XYZ", i));
        }

        assert!(hub.dropped_messages() >= 4);
        // queue should now be closed: recv returns None once buffered items drain
        for _ in 0..4 {
            rx.recv().await;
        }
        assert!(rx.recv().await.is_none());
    }

    #[test]
    fn unsubscribe_removes_from_topic() {
        let hub = Hub::new(FanoutConfig::default());
        let (sub, _rx) = hub.create_subscriber("s1", "t1", "k1");
        hub.subscribe("XYZ", sub);
        assert_eq!(hub.active_subscribers(), 1);
        hub.unsubscribe("XYZ", "s1");
        assert_eq!(hub.active_subscribers(), 0);
    }

    #[tokio::test]
    async fn unsubscribe_closes_receiver_even_with_external_subscriber_clone() {
        // The transport layer keeps its own clone of the `Arc<Subscriber>`
        // for the life of the connection; that clone alone must not keep
        // the channel open once the hub evicts it.
        let hub = Hub::new(FanoutConfig::default());
        let (sub, mut rx) = hub.create_subscriber("s1", "t1", "k1");
        let held_by_transport = Arc::clone(&sub);
        hub.subscribe("XYZ", sub);

        hub.unsubscribe("XYZ", "s1");

        assert!(rx.recv().await.is_none());
        assert!(held_by_transport.is_closed());
    }

    #[tokio::test]
    async fn zombie_sweep_closes_receiver_even_with_external_subscriber_clone() {
        let mut cfg = FanoutConfig::default();
        cfg.zombie_timeout = std::time::Duration::from_secs(60);
        let hub = Hub::new(cfg);
        let (sub, mut rx) = hub.create_subscriber("s1", "t1", "k1");
        let held_by_transport = Arc::clone(&sub);
        hub.subscribe("XYZ", sub);

        hub.cleanup_zombies(Utc::now() + chrono::Duration::seconds(120));

        assert!(rx.recv().await.is_none());
        assert!(held_by_transport.is_closed());
    }
}
