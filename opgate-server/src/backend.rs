//! Cache backend selection and coordinator assembly
//!
//! The server picks one cache backend at startup and shares it between the
//! rate limiter and the operation store:
//!
//! ## Memory
//! - In-process [`MemoryCache`]
//! - Limits and operations are local to this instance
//! - Best for: development, tests, single-instance deployments
//!
//! ## Memcached
//! - Shared memcached server, behind the `memcached` feature
//! - Every instance pointing at it enforces the same limits and sees the same
//!   operations
//!
//! Either way the backend is wrapped in a [`TimeoutCache`] so a slow cache is
//! treated like an unavailable one.

use crate::config::{CacheConfig, Config};
use anyhow::{Context, Result};
use async_trait::async_trait;
use opgate::{
    CacheClient, CacheError, Coordinator, MemoryCache, OperationStore, StorageBackend,
    TimeoutCache, TokenBucketLimiter,
};
use std::sync::Arc;
use std::time::Duration;

#[cfg(feature = "memcached")]
use crate::memcached::MemcachedCache;

/// Cache backend chosen at startup
pub enum CacheBackend {
    Memory(MemoryCache),
    #[cfg(feature = "memcached")]
    Memcached(MemcachedCache),
}

#[async_trait]
impl CacheClient for CacheBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        match self {
            CacheBackend::Memory(cache) => cache.get(key).await,
            #[cfg(feature = "memcached")]
            CacheBackend::Memcached(cache) => cache.get(key).await,
        }
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), CacheError> {
        match self {
            CacheBackend::Memory(cache) => cache.set(key, value, ttl).await,
            #[cfg(feature = "memcached")]
            CacheBackend::Memcached(cache) => cache.set(key, value, ttl).await,
        }
    }

    async fn health_check(&self) -> bool {
        match self {
            CacheBackend::Memory(cache) => cache.health_check().await,
            #[cfg(feature = "memcached")]
            CacheBackend::Memcached(cache) => cache.health_check().await,
        }
    }

    fn provider_name(&self) -> &'static str {
        match self {
            CacheBackend::Memory(cache) => cache.provider_name(),
            #[cfg(feature = "memcached")]
            CacheBackend::Memcached(cache) => cache.provider_name(),
        }
    }
}

/// Cache handle shared by the limiter and the store
pub type SharedCache = Arc<TimeoutCache<CacheBackend>>;

/// Coordinator as run by the server
pub type AppCoordinator = Coordinator<SharedCache>;

/// Open the configured cache backend
///
/// # Errors
///
/// Fails when memcached cannot be reached, or when it is requested from a
/// build without the `memcached` feature.
pub async fn connect_cache(config: &CacheConfig) -> Result<CacheBackend> {
    match config.backend {
        StorageBackend::Memory => Ok(CacheBackend::Memory(
            MemoryCache::builder()
                .capacity(config.capacity)
                .cleanup_interval(config.cleanup_interval)
                .build(),
        )),
        #[cfg(feature = "memcached")]
        StorageBackend::Memcached => {
            let cache = MemcachedCache::connect(&config.memcached_url)
                .await
                .context("Failed to connect to memcached")?;
            Ok(CacheBackend::Memcached(cache))
        }
        #[cfg(not(feature = "memcached"))]
        StorageBackend::Memcached => Err(anyhow::anyhow!(
            "The memcached backend requires the memcached feature"
        )),
    }
}

/// Assemble the coordinator over an opened backend
pub fn build_coordinator(backend: CacheBackend, config: &Config) -> Result<AppCoordinator> {
    let cache: SharedCache = Arc::new(TimeoutCache::new(backend, config.cache.timeout));

    let limiter = TokenBucketLimiter::new(cache.clone(), config.rate_limit.clone())
        .context("Invalid rate limiter configuration")?;
    let store = OperationStore::new(cache, config.operation_ttl);

    Ok(Coordinator::new(limiter, store, config.coordinator.clone()))
}

/// Open the configured backend and assemble the coordinator
pub async fn create_coordinator(config: &Config) -> Result<Arc<AppCoordinator>> {
    let backend = connect_cache(&config.cache).await?;
    tracing::info!(
        "Using {} cache backend with {:?} timeout",
        backend.provider_name(),
        config.cache.timeout
    );
    Ok(Arc::new(build_coordinator(backend, config)?))
}
