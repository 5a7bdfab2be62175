//! Cache contract shared by the limiter and the operation store
//!
//! Everything opgate coordinates lives in an external key/value cache with
//! TTL semantics. This module defines the narrow capability both components
//! depend on ([`CacheClient`]) and the in-crate implementations:
//!
//! - [`MemoryCache`]: in-process TTL map, for tests and single-node setups
//! - [`TimeoutCache`]: decorator that bounds every call with a deadline
//!
//! No compare-and-swap, increment or transaction primitive is assumed. Callers
//! read, compute and write back, and live with the races that implies.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

mod memory;
mod timeout;


pub use memory::{MemoryCache, MemoryCacheBuilder};
pub use timeout::TimeoutCache;

/// Errors reported by a cache backend
///
/// A cache miss is not an error: [`CacheClient::get`] reports it as
/// `Ok(None)`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    /// The backend could not be reached
    #[error("cache unavailable: {0}")]
    Unavailable(String),

    /// The call did not complete before its deadline
    #[error("cache operation timed out after {0:?}")]
    Timeout(Duration),

    /// The backend answered with an error
    #[error("cache backend error: {0}")]
    Backend(String),
}

/// Capability interface over a distributed TTL key/value store
///
/// Implementations must be safe to share between request tasks. A `ttl` of
/// [`Duration::ZERO`] means the entry never expires, matching memcached.
#[async_trait]
pub trait CacheClient: Send + Sync {
    /// Fetch the value stored under `key`, `Ok(None)` on a miss
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;

    /// Store `value` under `key` for `ttl`
    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), CacheError>;

    /// Whether the backend currently answers requests
    async fn health_check(&self) -> bool;

    /// Short backend name used in log lines
    fn provider_name(&self) -> &'static str {
        "cache"
    }
}

#[async_trait]
impl<C: CacheClient + ?Sized> CacheClient for Arc<C> {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        (**self).get(key).await
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), CacheError> {
        (**self).set(key, value, ttl).await
    }

    async fn health_check(&self) -> bool {
        (**self).health_check().await
    }

    fn provider_name(&self) -> &'static str {
        (**self).provider_name()
    }
}
