//! In-memory [`Repository`] fixture. Seeded synchronously, never touches
//! the network or filesystem, deterministic across runs.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use relay_core::{Repository, RepositoryError, UsageDelta};
use relay_types::AuthRecord;
use sha2::{Digest, Sha256};

fn hash_credential(credential: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(credential.as_bytes());
    hasher.finalize().iter().map(|b| format!("{b:02x}")).collect()
}

#[derive(Default)]
struct State {
    by_hash: HashMap<String, AuthRecord>,
    touched: HashMap<String, DateTime<Utc>>,
    usage: HashMap<(String, String, NaiveDate), UsageDelta>,
}

/// A `Repository` backed by an in-memory map, for use in tests and
/// examples in place of a real relational store.
#[derive(Default)]
pub struct InMemoryRepository {
    state: Mutex<State>,
}

impl InMemoryRepository {
    /// Construct an empty repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a record reachable by the plaintext credential that hashes to
    /// it, mirroring how a real client would present it.
    pub fn seed(&self, credential: &str, record: AuthRecord) {
        let hash = hash_credential(credential);
        self.state.lock().expect("repository mutex poisoned").by_hash.insert(hash, record);
    }

    /// Last `touch_last_used` timestamp recorded for `key_id`, if any.
    #[must_use]
    pub fn last_touched(&self, key_id: &str) -> Option<DateTime<Utc>> {
        self.state.lock().expect("repository mutex poisoned").touched.get(key_id).copied()
    }

    /// Accumulated usage for `(tenant_id, key_id, date)`, if any usage has
    /// been recorded.
    #[must_use]
    pub fn usage(&self, tenant_id: &str, key_id: &str, date: NaiveDate) -> Option<UsageDelta> {
        self.state
            .lock()
            .expect("repository mutex poisoned")
            .usage
            .get(&(tenant_id.to_string(), key_id.to_string(), date))
            .copied()
    }
}

#[async_trait]
impl Repository for InMemoryRepository {
    async fn find_auth_by_hash(&self, hash: &str) -> Result<AuthRecord, RepositoryError> {
        self.state
            .lock()
            .expect("repository mutex poisoned")
            .by_hash
            .get(hash)
            .cloned()
            .ok_or(RepositoryError::NotFound)
    }

    async fn touch_last_used(&self, key_id: &str, ts: DateTime<Utc>) -> Result<(), RepositoryError> {
        self.state
            .lock()
            .expect("repository mutex poisoned")
            .touched
            .insert(key_id.to_string(), ts);
        Ok(())
    }

    async fn increment_usage(
        &self,
        tenant_id: &str,
        key_id: &str,
        date: NaiveDate,
        delta: UsageDelta,
    ) -> Result<(), RepositoryError> {
        let mut state = self.state.lock().expect("repository mutex poisoned");
        let entry = state
            .usage
            .entry((tenant_id.to_string(), key_id.to_string(), date))
            .or_default();
        entry.requests += delta.requests;
        entry.messages += delta.messages;
        entry.errors += delta.errors;
        entry.peak_streams = entry.peak_streams.max(delta.peak_streams);
        entry.latency_ms = entry.latency_ms.max(delta.latency_ms);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_types::{KeyStatus, TenantStatus};

    fn record() -> AuthRecord {
        AuthRecord {
            tenant_id: "tenant-1".to_string(),
            tenant_status: TenantStatus::Active,
            key_id: "key-1".to_string(),
            key_status: KeyStatus::Active,
            plan_id: "pro".to_string(),
            max_concurrent_streams: 10,
            max_rps: 100,
            max_symbols: 50,
            max_daily_requests: 10_000,
            expires_at: None,
            cached_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn seeded_credential_is_found_by_hash() {
        let repo = InMemoryRepository::new();
        repo.seed("sk-live-1", record());
        let hash = hash_credential("sk-live-1");
        let found = repo.find_auth_by_hash(&hash).await.unwrap();
        assert_eq!(found.key_id, "key-1");
    }

    #[tokio::test]
    async fn unseeded_hash_is_not_found() {
        let repo = InMemoryRepository::new();
        assert!(matches!(
            repo.find_auth_by_hash("deadbeef").await,
            Err(RepositoryError::NotFound)
        ));
    }

    #[tokio::test]
    async fn increment_usage_sums_counters_and_maxes_peaks() {
        let repo = InMemoryRepository::new();
        let date = Utc::now().date_naive();
        repo.increment_usage(
            "tenant-1",
            "key-1",
            date,
            UsageDelta { requests: 5, messages: 10, errors: 1, peak_streams: 3, latency_ms: 20 },
        )
        .await
        .unwrap();
        repo.increment_usage(
            "tenant-1",
            "key-1",
            date,
            UsageDelta { requests: 2, messages: 1, errors: 0, peak_streams: 7, latency_ms: 5 },
        )
        .await
        .unwrap();

        let usage = repo.usage("tenant-1", "key-1", date).unwrap();
        assert_eq!(usage.requests, 7);
        assert_eq!(usage.messages, 11);
        assert_eq!(usage.errors, 1);
        assert_eq!(usage.peak_streams, 7);
        assert_eq!(usage.latency_ms, 20);
    }
}
