//! Usage accounting: accumulates per-`(tenant_id, key_id)` counters in
//! memory and flushes them to the repository on a timer, rather than
//! hitting persistence on every request.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use relay_core::{Repository, UsageDelta};
use tracing::warn;

/// Accumulates usage deltas between flushes and upserts them into the
/// repository. Safe to call from any request path; the in-memory
/// accumulator never blocks on I/O.
pub struct UsageTracker {
    repository: Arc<dyn Repository>,
    pending: Mutex<HashMap<(String, String), UsageDelta>>,
}

impl UsageTracker {
    /// Construct a tracker over the given repository.
    #[must_use]
    pub fn new(repository: Arc<dyn Repository>) -> Self {
        Self {
            repository,
            pending: Mutex::new(HashMap::new()),
        }
    }

    fn merge(&self, tenant_id: &str, key_id: &str, f: impl FnOnce(&mut UsageDelta)) {
        let mut pending = self.pending.lock().expect("usage tracker mutex poisoned");
        let entry = pending
            .entry((tenant_id.to_string(), key_id.to_string()))
            .or_default();
        f(entry);
    }

    /// Record one successfully admitted request.
    pub fn record_request(&self, tenant_id: &str, key_id: &str) {
        self.merge(tenant_id, key_id, |d| d.requests += 1);
    }

    /// Record one rejected request or a failed operation.
    pub fn record_error(&self, tenant_id: &str, key_id: &str) {
        self.merge(tenant_id, key_id, |d| d.errors += 1);
    }

    /// Record `n` messages delivered to this key's subscribers.
    pub fn record_messages(&self, tenant_id: &str, key_id: &str, n: u64) {
        self.merge(tenant_id, key_id, |d| d.messages += n);
    }

    /// Report a concurrent-stream count observed for this key; only the
    /// maximum across a flush window is kept.
    pub fn observe_active_streams(&self, tenant_id: &str, key_id: &str, count: u32) {
        self.merge(tenant_id, key_id, |d| d.peak_streams = d.peak_streams.max(count));
    }

    /// Drain the accumulator and upsert each key's deltas into the
    /// repository for today's date. Failures are logged and skipped; the
    /// delta for a failed key is dropped rather than retried indefinitely,
    /// matching the repository's best-effort `touch_last_used` contract.
    pub async fn flush(&self) {
        let batch: Vec<((String, String), UsageDelta)> = {
            let mut pending = self.pending.lock().expect("usage tracker mutex poisoned");
            pending.drain().collect()
        };
        if batch.is_empty() {
            return;
        }
        let today = Utc::now().date_naive();
        for ((tenant_id, key_id), delta) in batch {
            if let Err(err) = self
                .repository
                .increment_usage(&tenant_id, &key_id, today, delta)
                .await
            {
                warn!(tenant_id, key_id, %err, "failed to flush usage accounting");
            }
        }
    }

    /// Number of distinct keys with unflushed usage. Exposed for tests.
    #[must_use]
    pub fn pending_keys(&self) -> usize {
        self.pending.lock().expect("usage tracker mutex poisoned").len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_mock::InMemoryRepository;

    #[tokio::test]
    async fn flush_upserts_accumulated_deltas_and_clears_pending() {
        let repo = Arc::new(InMemoryRepository::new());
        let tracker = UsageTracker::new(repo.clone());

        tracker.record_request("tenant-1", "key-1");
        tracker.record_request("tenant-1", "key-1");
        tracker.record_error("tenant-1", "key-1");
        tracker.record_messages("tenant-1", "key-1", 5);
        tracker.observe_active_streams("tenant-1", "key-1", 3);

        assert_eq!(tracker.pending_keys(), 1);
        tracker.flush().await;
        assert_eq!(tracker.pending_keys(), 0);

        let today = Utc::now().date_naive();
        let usage = repo.usage("tenant-1", "key-1", today).unwrap();
        assert_eq!(usage.requests, 2);
        assert_eq!(usage.errors, 1);
        assert_eq!(usage.messages, 5);
        assert_eq!(usage.peak_streams, 3);
    }

    #[tokio::test]
    async fn flush_with_nothing_pending_is_a_no_op() {
        let repo = Arc::new(InMemoryRepository::new());
        let tracker = UsageTracker::new(repo);
        tracker.flush().await;
        assert_eq!(tracker.pending_keys(), 0);
    }
}
