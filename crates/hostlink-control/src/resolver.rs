//! Rate-limit resolution seam

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ResolveError {
    /// No record exists for the owner in the backing store.
    #[error("unknown tunnel owner {0}")]
    UnknownOwner(i64),

    /// The backing store could not be reached or answered garbage.
    #[error("rate limit lookup failed: {0}")]
    Lookup(String),
}

/// Resolves a tunnel owner's configured bandwidth cap in KB/s, where 0
/// means unlimited.
///
/// Backed by persistent owner records outside this core; injected so the
/// bridge never knows where the numbers come from.
#[async_trait]
pub trait RateLimitResolver: Send + Sync {
    async fn resolve_rate_limit(&self, owner_id: i64) -> Result<u32, ResolveError>;
}
