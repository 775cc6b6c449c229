use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Unified error type surfaced to the transport layer and used internally
/// across the relay's data-plane crates.
///
/// Variants map directly onto the error codes named in the external
/// interface contract: credential failures, quota rejections, upstream
/// unavailability, protocol/decode failures, and internal invariant
/// violations that should be impossible by construction but are kept as a
/// typed escape hatch rather than a panic.
#[derive(Debug, Error, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum RelayError {
    /// No credential was supplied.
    #[error("missing credential")]
    MissingCredential,

    /// The credential hash did not match any known API key.
    #[error("invalid credential")]
    InvalidCredential,

    /// The API key has passed its `expires_at` timestamp.
    #[error("expired credential")]
    ExpiredCredential,

    /// The API key has been administratively revoked.
    #[error("revoked credential")]
    RevokedCredential,

    /// The owning tenant has been suspended.
    #[error("suspended tenant")]
    SuspendedTenant,

    /// The caller's request-rate token bucket is exhausted.
    #[error("rate limit exceeded")]
    QuotaExceededRps,

    /// The caller has reached its concurrent-stream limit.
    #[error("concurrent stream limit exceeded")]
    QuotaExceededStreams,

    /// The caller has reached its daily request budget.
    #[error("daily quota exceeded")]
    QuotaExceededDaily,

    /// A dependency (upstream gateway, repository, distributed cache) is
    /// unavailable and no cached answer could be returned instead.
    #[error("unavailable: {reason}")]
    Unavailable {
        /// Human-readable description of what was unavailable.
        reason: String,
    },

    /// The requested symbol has no cached state yet.
    #[error("not found: {what}")]
    NotFound {
        /// Description of the missing resource, e.g. "orderbook for XYZ".
        what: String,
    },

    /// Invalid input argument from a caller.
    #[error("invalid argument: {0}")]
    InvalidArg(String),

    /// An internal invariant was violated. Presence of this variant at a
    /// call site indicates a bug, not a normal failure mode.
    #[error("internal invariant violation: {0}")]
    Internal(String),
}

impl RelayError {
    /// Build an [`RelayError::Unavailable`] with the given reason.
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::Unavailable {
            reason: reason.into(),
        }
    }

    /// Build a [`RelayError::NotFound`] for a description of the missing resource.
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }

    /// Build a [`RelayError::InvalidArg`].
    pub fn invalid_arg(msg: impl Into<String>) -> Self {
        Self::InvalidArg(msg.into())
    }

    /// Build an [`RelayError::Internal`] invariant violation.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// True if this error represents a credential problem (as opposed to a
    /// quota, availability, or internal problem).
    #[must_use]
    pub const fn is_credential_error(&self) -> bool {
        matches!(
            self,
            Self::MissingCredential
                | Self::InvalidCredential
                | Self::ExpiredCredential
                | Self::RevokedCredential
                | Self::SuspendedTenant
        )
    }

    /// True if this error represents a quota rejection.
    #[must_use]
    pub const fn is_quota_error(&self) -> bool {
        matches!(
            self,
            Self::QuotaExceededRps | Self::QuotaExceededStreams | Self::QuotaExceededDaily
        )
    }
}
