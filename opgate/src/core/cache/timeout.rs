use super::{CacheClient, CacheError};
use async_trait::async_trait;
use std::time::Duration;
use tokio::time::timeout;

/// Deadline decorator for any [`CacheClient`]
///
/// Every `get` and `set` must finish within the configured duration or it
/// fails with [`CacheError::Timeout`]. A health check that runs out of time
/// reports the backend as unhealthy. Callers therefore see a slow backend
/// exactly like an unreachable one.
pub struct TimeoutCache<C> {
    inner: C,
    timeout: Duration,
}

impl<C: CacheClient> TimeoutCache<C> {
    pub fn new(inner: C, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }
}

#[async_trait]
impl<C: CacheClient> CacheClient for TimeoutCache<C> {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        timeout(self.timeout, self.inner.get(key))
            .await
            .map_err(|_| CacheError::Timeout(self.timeout))?
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), CacheError> {
        timeout(self.timeout, self.inner.set(key, value, ttl))
            .await
            .map_err(|_| CacheError::Timeout(self.timeout))?
    }

    async fn health_check(&self) -> bool {
        timeout(self.timeout, self.inner.health_check())
            .await
            .unwrap_or(false)
    }

    fn provider_name(&self) -> &'static str {
        self.inner.provider_name()
    }
}
