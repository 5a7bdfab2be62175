//! Fault-injecting caches shared by the unit tests

use super::cache::{CacheClient, CacheError, MemoryCache};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

/// Memory-backed cache whose reads and writes can be switched to fail
pub struct FaultyCache {
    pub memory: MemoryCache,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    /// Writes whose keys match this prefix fail even when `fail_writes` is off
    fail_prefix: parking_lot::Mutex<Option<String>>,
    gets: AtomicUsize,
    sets: AtomicUsize,
}

impl FaultyCache {
    pub fn new() -> Self {
        Self {
            memory: MemoryCache::new(),
            fail_reads: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
            fail_prefix: parking_lot::Mutex::new(None),
            gets: AtomicUsize::new(0),
            sets: AtomicUsize::new(0),
        }
    }

    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn fail_writes_with_prefix(&self, prefix: &str) {
        *self.fail_prefix.lock() = Some(prefix.to_string());
    }

    pub fn get_calls(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    pub fn set_calls(&self) -> usize {
        self.sets.load(Ordering::SeqCst)
    }

    pub fn raw(&self, key: &str) -> Option<String> {
        self.memory
            .get_at(key, std::time::SystemTime::now())
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
    }

    pub fn put_raw(&self, key: &str, value: &str) {
        self.memory.set_at(
            key,
            value.as_bytes(),
            Duration::from_secs(300),
            std::time::SystemTime::now(),
        );
    }
}

#[async_trait]
impl CacheClient for FaultyCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(CacheError::Unavailable("connection refused".into()));
        }
        self.memory.get(key).await
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), CacheError> {
        self.sets.fetch_add(1, Ordering::SeqCst);
        let prefixed = self
            .fail_prefix
            .lock()
            .as_deref()
            .is_some_and(|prefix| key.starts_with(prefix));
        if self.fail_writes.load(Ordering::SeqCst) || prefixed {
            return Err(CacheError::Backend("SERVER_ERROR out of memory".into()));
        }
        self.memory.set(key, value, ttl).await
    }

    async fn health_check(&self) -> bool {
        !self.fail_reads.load(Ordering::SeqCst)
    }
}

/// Cache that answers only after `delay`
pub struct SlowCache {
    pub delay: Duration,
}

#[async_trait]
impl CacheClient for SlowCache {
    async fn get(&self, _key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        tokio::time::sleep(self.delay).await;
        Ok(None)
    }

    async fn set(&self, _key: &str, _value: &[u8], _ttl: Duration) -> Result<(), CacheError> {
        tokio::time::sleep(self.delay).await;
        Ok(())
    }

    async fn health_check(&self) -> bool {
        tokio::time::sleep(self.delay).await;
        true
    }
}
