//! Auth Gate: validates an opaque credential string against a hashed
//! lookup, backed by an in-process TTL cache in front of an optional
//! distributed cache and, ultimately, the repository.
//!
//! Credentials are never stored or logged in plaintext; only their SHA-256
//! hex digest crosses the cache and repository boundary.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use moka::future::Cache as MokaCache;
use relay_core::Repository;
use relay_types::{AuthRecord, KeyStatus, RelayError, TenantStatus};
use sha2::{Digest, Sha256};

/// A second-tier cache shared across relay instances, consulted between the
/// in-process cache and the repository. Implemented outside this crate
/// (e.g. by a Redis-backed adapter); `relay-mock` provides an in-memory
/// fixture for tests.
#[async_trait]
pub trait DistributedCache: Send + Sync {
    /// Fetch a cached record by credential hash, if present and (by the
    /// implementation's own convention) not expired.
    async fn get(&self, hash: &str) -> Option<AuthRecord>;

    /// Store a record under its credential hash with the given TTL.
    async fn put(&self, hash: &str, record: AuthRecord, ttl: std::time::Duration);

    /// Remove a cached record, e.g. on administrative revocation.
    async fn invalidate(&self, hash: &str);
}

fn hash_credential(credential: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(credential.as_bytes());
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

fn classify(record: &AuthRecord) -> Result<(), RelayError> {
    let now = Utc::now();
    if record.tenant_status == TenantStatus::Suspended {
        return Err(RelayError::SuspendedTenant);
    }
    match record.key_status {
        KeyStatus::Revoked => return Err(RelayError::RevokedCredential),
        KeyStatus::Expired => return Err(RelayError::ExpiredCredential),
        KeyStatus::Active => {}
    }
    if let Some(expires_at) = record.expires_at {
        if expires_at <= now {
            return Err(RelayError::ExpiredCredential);
        }
    }
    Ok(())
}

/// Validates credentials and caches the result, so repeat calls on a hot
/// key avoid round-tripping to the repository.
pub struct AuthGate {
    repository: Arc<dyn Repository>,
    distributed: Option<Arc<dyn DistributedCache>>,
    local: MokaCache<String, AuthRecord>,
    ttl: std::time::Duration,
}

impl AuthGate {
    /// Build an Auth Gate backed by `repository`, with an in-process cache
    /// sized for `capacity` entries and the given TTL. `distributed` is an
    /// optional second tier consulted before falling back to `repository`.
    #[must_use]
    pub fn new(
        repository: Arc<dyn Repository>,
        distributed: Option<Arc<dyn DistributedCache>>,
        ttl: std::time::Duration,
        capacity: u64,
    ) -> Self {
        let local = MokaCache::builder()
            .max_capacity(capacity)
            .time_to_live(ttl)
            .build();
        Self {
            repository,
            distributed,
            local,
            ttl,
        }
    }

    /// Validate an opaque credential string, returning the authorization
    /// record on success.
    ///
    /// An empty credential is rejected before any hashing or lookup.
    /// Records are checked in order: in-process cache, distributed cache (if
    /// configured), then the repository. A record freshly loaded from the
    /// distributed cache or repository is classified before it is written
    /// back into either cache tier, so an invalid record (suspended tenant,
    /// revoked or expired key) is never cached; the next lookup re-checks
    /// the repository instead of being stuck with a stale verdict for the
    /// full cache TTL. A best-effort last-used touch is fired without
    /// blocking the caller once a record is found valid.
    pub async fn authenticate(&self, credential: &str) -> Result<AuthRecord, RelayError> {
        if credential.is_empty() {
            return Err(RelayError::MissingCredential);
        }
        let hash = hash_credential(credential);

        if let Some(record) = self.local.get(&hash).await {
            classify(&record)?;
            return Ok(record);
        }

        if let Some(distributed) = &self.distributed {
            if let Some(record) = distributed.get(&hash).await {
                classify(&record)?;
                self.local.insert(hash.clone(), record.clone()).await;
                return Ok(record);
            }
        }

        let mut record = self
            .repository
            .find_auth_by_hash(&hash)
            .await
            .map_err(|err| {
                tracing::debug!(%err, "auth gate repository lookup miss");
                RelayError::InvalidCredential
            })?;
        record.cached_at = Utc::now();

        classify(&record)?;

        self.local.insert(hash.clone(), record.clone()).await;
        if let Some(distributed) = &self.distributed {
            distributed.put(&hash, record.clone(), self.ttl).await;
        }

        let repository = Arc::clone(&self.repository);
        let key_id = record.key_id.clone();
        let touched_at = record.cached_at;
        tokio::spawn(async move {
            let _ = repository.touch_last_used(&key_id, touched_at).await;
        });

        Ok(record)
    }

    /// Purge a credential's cached record from both cache tiers, e.g. after
    /// an administrative revocation that must take effect immediately
    /// rather than waiting out the TTL.
    pub async fn invalidate_cache(&self, credential: &str) {
        let hash = hash_credential(credential);
        self.local.invalidate(&hash).await;
        if let Some(distributed) = &self.distributed {
            distributed.invalidate(&hash).await;
        }
    }

    /// Run the in-process cache's pending maintenance tasks. `moka`
    /// performs most eviction inline, but this drains any deferred
    /// housekeeping; intended to run on a periodic tick alongside the
    /// repository's own scrub jobs.
    pub async fn run_pending_maintenance(&self) {
        self.local.run_pending_tasks().await;
    }

    /// Number of records currently resident in the in-process cache.
    /// Approximate: `moka` updates this count asynchronously.
    #[must_use]
    pub fn local_cache_len(&self) -> u64 {
        self.local.entry_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use relay_core::{RepositoryError, UsageDelta};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn valid_record(key_id: &str) -> AuthRecord {
        AuthRecord {
            tenant_id: "tenant-1".to_string(),
            tenant_status: TenantStatus::Active,
            key_id: key_id.to_string(),
            key_status: KeyStatus::Active,
            plan_id: "pro".to_string(),
            max_concurrent_streams: 10,
            max_rps: 100,
            max_symbols: 50,
            max_daily_requests: 100_000,
            expires_at: None,
            cached_at: Utc::now(),
        }
    }

    struct CountingRepository {
        record: AuthRecord,
        lookups: AtomicUsize,
    }

    #[async_trait]
    impl Repository for CountingRepository {
        async fn find_auth_by_hash(&self, _hash: &str) -> Result<AuthRecord, RepositoryError> {
            self.lookups.fetch_add(1, Ordering::Relaxed);
            Ok(self.record.clone())
        }

        async fn touch_last_used(
            &self,
            _key_id: &str,
            _ts: chrono::DateTime<Utc>,
        ) -> Result<(), RepositoryError> {
            Ok(())
        }

        async fn increment_usage(
            &self,
            _tenant_id: &str,
            _key_id: &str,
            _date: chrono::NaiveDate,
            _delta: UsageDelta,
        ) -> Result<(), RepositoryError> {
            Ok(())
        }
    }

    struct NotFoundRepository;

    #[async_trait]
    impl Repository for NotFoundRepository {
        async fn find_auth_by_hash(&self, _hash: &str) -> Result<AuthRecord, RepositoryError> {
            Err(RepositoryError::NotFound)
        }

        async fn touch_last_used(
            &self,
            _key_id: &str,
            _ts: chrono::DateTime<Utc>,
        ) -> Result<(), RepositoryError> {
            Ok(())
        }

        async fn increment_usage(
            &self,
            _tenant_id: &str,
            _key_id: &str,
            _date: chrono::NaiveDate,
            _delta: UsageDelta,
        ) -> Result<(), RepositoryError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn empty_credential_is_rejected_before_any_lookup() {
        let repo = Arc::new(NotFoundRepository);
        let gate = AuthGate::new(repo, None, Duration::from_secs(60), 100);
        let err = gate.authenticate("").await.unwrap_err();
        assert_eq!(err, RelayError::MissingCredential);
    }

    #[tokio::test]
    async fn unknown_credential_maps_to_invalid_credential() {
        let repo = Arc::new(NotFoundRepository);
        let gate = AuthGate::new(repo, None, Duration::from_secs(60), 100);
        let err = gate.authenticate("sk-does-not-exist").await.unwrap_err();
        assert_eq!(err, RelayError::InvalidCredential);
    }

    #[tokio::test]
    async fn valid_credential_is_cached_after_first_lookup() {
        let repo = Arc::new(CountingRepository {
            record: valid_record("key-1"),
            lookups: AtomicUsize::new(0),
        });
        let gate = AuthGate::new(Arc::clone(&repo) as Arc<dyn Repository>, None, Duration::from_secs(60), 100);

        let first = gate.authenticate("sk-live-1").await.unwrap();
        assert_eq!(first.key_id, "key-1");
        let second = gate.authenticate("sk-live-1").await.unwrap();
        assert_eq!(second.key_id, "key-1");

        assert_eq!(repo.lookups.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn suspended_tenant_is_rejected() {
        let mut record = valid_record("key-1");
        record.tenant_status = TenantStatus::Suspended;
        let repo = Arc::new(CountingRepository {
            record,
            lookups: AtomicUsize::new(0),
        });
        let gate = AuthGate::new(repo, None, Duration::from_secs(60), 100);
        let err = gate.authenticate("sk-suspended").await.unwrap_err();
        assert_eq!(err, RelayError::SuspendedTenant);
    }

    #[tokio::test]
    async fn revoked_key_is_rejected() {
        let mut record = valid_record("key-1");
        record.key_status = KeyStatus::Revoked;
        let repo = Arc::new(CountingRepository {
            record,
            lookups: AtomicUsize::new(0),
        });
        let gate = AuthGate::new(repo, None, Duration::from_secs(60), 100);
        let err = gate.authenticate("sk-revoked").await.unwrap_err();
        assert_eq!(err, RelayError::RevokedCredential);
    }

    #[tokio::test]
    async fn expired_key_is_rejected() {
        let mut record = valid_record("key-1");
        record.expires_at = Some(Utc::now() - ChronoDuration::seconds(1));
        let repo = Arc::new(CountingRepository {
            record,
            lookups: AtomicUsize::new(0),
        });
        let gate = AuthGate::new(repo, None, Duration::from_secs(60), 100);
        let err = gate.authenticate("sk-expired").await.unwrap_err();
        assert_eq!(err, RelayError::ExpiredCredential);
    }

    #[tokio::test]
    async fn suspended_tenant_is_not_cached_and_rechecks_repository_each_time() {
        let mut record = valid_record("key-1");
        record.tenant_status = TenantStatus::Suspended;
        let repo = Arc::new(CountingRepository {
            record,
            lookups: AtomicUsize::new(0),
        });
        let gate = AuthGate::new(Arc::clone(&repo) as Arc<dyn Repository>, None, Duration::from_secs(60), 100);

        assert!(gate.authenticate("sk-suspended").await.is_err());
        assert!(gate.authenticate("sk-suspended").await.is_err());

        assert_eq!(repo.lookups.load(Ordering::Relaxed), 2);
        assert_eq!(gate.local_cache_len(), 0);
    }

    #[tokio::test]
    async fn invalidate_cache_forces_a_fresh_repository_lookup() {
        let repo = Arc::new(CountingRepository {
            record: valid_record("key-1"),
            lookups: AtomicUsize::new(0),
        });
        let gate = AuthGate::new(Arc::clone(&repo) as Arc<dyn Repository>, None, Duration::from_secs(60), 100);

        gate.authenticate("sk-live-1").await.unwrap();
        gate.invalidate_cache("sk-live-1").await;
        gate.authenticate("sk-live-1").await.unwrap();

        assert_eq!(repo.lookups.load(Ordering::Relaxed), 2);
    }
}
