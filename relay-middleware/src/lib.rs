//! relay-middleware
//!
//! The Rate Limiter and Auth Gate: per-key token-bucket rate limiting with
//! a concurrent-stream semaphore, credential validation backed by a tiered
//! cache in front of the repository, and usage accounting flushed to the
//! same repository on a timer.
#![warn(missing_docs)]

mod auth;
mod rate_limiter;
mod usage;

pub use crate::auth::{AuthGate, DistributedCache};
pub use crate::rate_limiter::RateLimiter;
pub use crate::usage::UsageTracker;
