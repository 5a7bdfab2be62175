use super::{CacheClient, CacheError};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::time::{Duration, SystemTime};

#[cfg(feature = "ahash")]
use ahash::AHashMap as HashMap;
#[cfg(not(feature = "ahash"))]
use std::collections::HashMap;

// Configuration constants
const DEFAULT_CAPACITY: usize = 1000;
const CAPACITY_OVERHEAD_FACTOR: f64 = 1.3;
const DEFAULT_CLEANUP_INTERVAL_SECS: u64 = 60;

/// In-process TTL cache with periodic sweeping
///
/// Expired entries are invisible to reads immediately and are physically
/// removed at fixed intervals, piggybacking on writes. Suitable for tests and
/// for running a single server instance without memcached; state is not
/// shared between processes.
///
/// # Example
///
/// ```
/// use opgate::MemoryCache;
/// use std::time::{Duration, SystemTime};
///
/// let cache = MemoryCache::builder()
///     .capacity(10_000)
///     .cleanup_interval(Duration::from_secs(30))
///     .build();
///
/// let now = SystemTime::now();
/// cache.set_at("greeting", b"hello", Duration::from_secs(5), now);
/// assert_eq!(cache.get_at("greeting", now), Some(b"hello".to_vec()));
/// assert_eq!(cache.get_at("greeting", now + Duration::from_secs(6)), None);
/// ```
pub struct MemoryCache {
    inner: Mutex<Inner>,
}

struct Inner {
    data: HashMap<String, Entry>,
    // Track when next cleanup is needed
    next_cleanup: SystemTime,
    cleanup_interval: Duration,
    // Number of entries removed by the last sweep
    expired_count: usize,
}

struct Entry {
    value: Vec<u8>,
    expiry: Option<SystemTime>,
}

impl Entry {
    fn is_live(&self, now: SystemTime) -> bool {
        self.expiry.is_none_or(|exp| exp > now)
    }
}

/// Builder for configuring a [`MemoryCache`]
pub struct MemoryCacheBuilder {
    capacity: usize,
    cleanup_interval: Duration,
}

impl MemoryCache {
    /// Create a cache with a default capacity of 1000 keys and a 60 second sweep
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> MemoryCacheBuilder {
        MemoryCacheBuilder::default()
    }

    fn with_config(capacity: usize, cleanup_interval: Duration) -> Self {
        MemoryCache {
            inner: Mutex::new(Inner {
                // Pre-allocate with overhead to avoid rehashing
                data: HashMap::with_capacity(
                    (capacity as f64 * CAPACITY_OVERHEAD_FACTOR) as usize,
                ),
                next_cleanup: SystemTime::now() + cleanup_interval,
                cleanup_interval,
                expired_count: 0,
            }),
        }
    }

    /// Read `key` as of `now`
    pub fn get_at(&self, key: &str, now: SystemTime) -> Option<Vec<u8>> {
        let inner = self.inner.lock();
        inner
            .data
            .get(key)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.value.clone())
    }

    /// Write `key` as of `now`; a zero `ttl` never expires
    pub fn set_at(&self, key: &str, value: &[u8], ttl: Duration, now: SystemTime) {
        let mut inner = self.inner.lock();
        inner.maybe_clean_expired(now);

        let expiry = if ttl.is_zero() { None } else { Some(now + ttl) };
        inner.data.insert(
            key.to_string(),
            Entry {
                value: value.to_vec(),
                expiry,
            },
        );
    }

    /// Number of stored entries, including expired ones not yet swept
    pub fn len(&self) -> usize {
        self.inner.lock().data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().data.is_empty()
    }

    #[cfg(test)]
    pub(crate) fn expired_count(&self) -> usize {
        self.inner.lock().expired_count
    }
}

impl Inner {
    fn maybe_clean_expired(&mut self, now: SystemTime) {
        if now >= self.next_cleanup {
            let before_count = self.data.len();
            self.data.retain(|_, entry| entry.is_live(now));
            self.expired_count = before_count.saturating_sub(self.data.len());
            self.next_cleanup = now + self.cleanup_interval;
        }
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheClient for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        Ok(self.get_at(key, SystemTime::now()))
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), CacheError> {
        self.set_at(key, value, ttl, SystemTime::now());
        Ok(())
    }

    async fn health_check(&self) -> bool {
        true
    }

    fn provider_name(&self) -> &'static str {
        "memory"
    }
}

impl Default for MemoryCacheBuilder {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            cleanup_interval: Duration::from_secs(DEFAULT_CLEANUP_INTERVAL_SECS),
        }
    }
}

impl MemoryCacheBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the expected number of live keys
    ///
    /// The map allocates 30% more space to reduce rehashing.
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Set the interval between sweeps of expired entries
    pub fn cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = interval;
        self
    }

    pub fn build(self) -> MemoryCache {
        MemoryCache::with_config(self.capacity, self.cleanup_interval)
    }
}
