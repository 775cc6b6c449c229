//! The repository seam: persistence of tenants, keys, plans, and usage is
//! implemented outside this crate (typically backed by a relational store).
//! The core only ever sees this narrow interface.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use relay_types::AuthRecord;

/// Per-day usage counters reported via [`Repository::increment_usage`].
#[derive(Debug, Clone, Copy, Default)]
pub struct UsageDelta {
    /// Number of requests to add.
    pub requests: u64,
    /// Number of messages delivered to add.
    pub messages: u64,
    /// Number of errors to add.
    pub errors: u64,
    /// Candidate for the day's peak concurrent-stream count; the
    /// repository takes the max with the existing value.
    pub peak_streams: u32,
    /// Candidate latency sample in milliseconds; the repository takes the
    /// max with the existing value.
    pub latency_ms: u64,
}

/// Errors a repository implementation can return. Distinguishing
/// not-found from transport failure is required by the external
/// interface contract so the Auth Gate can classify outcomes correctly.
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    /// No row matched the lookup key.
    #[error("not found")]
    NotFound,
    /// The repository could not be reached or returned an unexpected error.
    #[error("repository unavailable: {0}")]
    Unavailable(String),
}

/// Narrow persistence interface consumed by the Auth Gate. Implemented
/// outside this crate; `relay-mock` provides an in-memory fixture for
/// tests.
#[async_trait]
pub trait Repository: Send + Sync {
    /// Look up the joined tenant/key/plan record by the credential's
    /// SHA-256 hex hash.
    async fn find_auth_by_hash(&self, hash: &str) -> Result<AuthRecord, RepositoryError>;

    /// Best-effort update of the key's last-used timestamp. Failures here
    /// are logged by the caller, never surfaced to the authenticating
    /// client.
    async fn touch_last_used(
        &self,
        key_id: &str,
        ts: DateTime<Utc>,
    ) -> Result<(), RepositoryError>;

    /// Idempotent upsert of a day's usage counters for `(tenant_id,
    /// key_id, date)`, summing counters and taking the max of peak values.
    async fn increment_usage(
        &self,
        tenant_id: &str,
        key_id: &str,
        date: NaiveDate,
        delta: UsageDelta,
    ) -> Result<(), RepositoryError>;
}
