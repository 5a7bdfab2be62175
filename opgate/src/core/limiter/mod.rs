//! Cache-backed token bucket rate limiter
//!
//! Each client identifier owns a bucket of up to `bucket_capacity` tokens,
//! refilled at `requests_per_minute`. The bucket lives in the shared cache, not
//! in process memory, so every server instance talking to the same cache
//! enforces the same limit.
//!
//! # Failure policy
//!
//! The limiter fails open. When the cache cannot be read the request is
//! allowed with a full `remaining` count; when the updated bucket cannot be
//! written the request is allowed with the decremented count. In both cases
//! the cache error is returned as [`AllowOutcome::warning`] so the caller can
//! log it. A corrupted bucket is replaced by a fresh one.
//!
//! # Races
//!
//! The cache offers no atomic read-modify-write. Two concurrent calls for the
//! same identifier can read the same bucket and both write back a decrement,
//! granting more requests than the capacity in a short burst. The limit is
//! approximate under concurrency.

mod bucket;


pub use bucket::{BucketState, RATE_LIMIT_KEY_PREFIX, bucket_key, refill_interval_secs};

use super::cache::{CacheClient, CacheError};
use std::fmt;
use std::str::FromStr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::{debug, warn};

/// Lifetime of a persisted bucket; an idle identifier's bucket expires and
/// the next request starts from a full bucket
pub const BUCKET_TTL: Duration = Duration::from_secs(120);

/// Lifetime of the empty record written by [`TokenBucketLimiter::reset`]
const RESET_TTL: Duration = Duration::from_secs(1);

/// Errors raised by the limiter outside of the fail-open path
#[derive(Debug, Error)]
pub enum LimiterError {
    #[error("invalid rate limiter configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Cache(#[from] CacheError),
}

/// Backend implementing the bucket store
///
/// The limiter itself only sees a [`CacheClient`]; the backend name is
/// validated here and used by the server to pick the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    /// Shared memcached cluster
    Memcached,
    /// Process-local [`MemoryCache`](crate::MemoryCache)
    Memory,
}

impl StorageBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageBackend::Memcached => "memcached",
            StorageBackend::Memory => "memory",
        }
    }
}

impl fmt::Display for StorageBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StorageBackend {
    type Err = LimiterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "memcached" => Ok(StorageBackend::Memcached),
            "memory" => Ok(StorageBackend::Memory),
            _ => Err(LimiterError::InvalidConfig(format!(
                "unknown storage backend: {s}. Valid options are: memcached, memory"
            ))),
        }
    }
}

/// Limiter settings
#[derive(Debug, Clone)]
pub struct LimiterConfig {
    /// Refill rate
    pub requests_per_minute: u32,
    /// Burst allowance
    pub bucket_capacity: u32,
    /// Global switch; a disabled limiter allows everything
    pub enabled: bool,
    pub storage_backend: StorageBackend,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: 60,
            bucket_capacity: 60,
            enabled: true,
            storage_backend: StorageBackend::Memcached,
        }
    }
}

/// Decision for one request
#[derive(Debug, Clone)]
pub struct AllowOutcome {
    /// Whether the request may proceed
    pub allowed: bool,
    /// Bucket capacity
    pub limit: i64,
    /// Tokens left after this request
    pub remaining: i64,
    /// Time until the next token, zero when allowed
    pub retry_after: Duration,
    /// Cache failure that was absorbed by failing open
    pub warning: Option<CacheError>,
}

impl AllowOutcome {
    fn allowed(limit: i64, remaining: i64) -> Self {
        Self {
            allowed: true,
            limit,
            remaining,
            retry_after: Duration::ZERO,
            warning: None,
        }
    }

    fn rejected(limit: i64, retry_after: Duration) -> Self {
        Self {
            allowed: false,
            limit,
            remaining: 0,
            retry_after,
            warning: None,
        }
    }

    fn with_warning(mut self, warning: CacheError) -> Self {
        self.warning = Some(warning);
        self
    }
}

/// Token bucket limiter over a shared cache
///
/// # Example
///
/// ```
/// use opgate::{LimiterConfig, MemoryCache, TokenBucketLimiter};
///
/// # tokio::runtime::Runtime::new().unwrap().block_on(async {
/// let config = LimiterConfig {
///     requests_per_minute: 60,
///     bucket_capacity: 2,
///     ..LimiterConfig::default()
/// };
/// let limiter = TokenBucketLimiter::new(MemoryCache::new(), config).unwrap();
///
/// assert!(limiter.allow("10.0.0.1").await.allowed);
/// assert!(limiter.allow("10.0.0.1").await.allowed);
/// assert!(!limiter.allow("10.0.0.1").await.allowed);
/// # });
/// ```
pub struct TokenBucketLimiter<C> {
    cache: C,
    config: LimiterConfig,
    refill_interval: i64,
}

impl<C: CacheClient> TokenBucketLimiter<C> {
    /// Create a limiter storing its buckets in `cache`
    ///
    /// # Errors
    ///
    /// [`LimiterError::InvalidConfig`] when the rate or the capacity is zero.
    pub fn new(cache: C, config: LimiterConfig) -> Result<Self, LimiterError> {
        if config.requests_per_minute == 0 {
            return Err(LimiterError::InvalidConfig(
                "requests_per_minute must be greater than zero".into(),
            ));
        }
        if config.bucket_capacity == 0 {
            return Err(LimiterError::InvalidConfig(
                "bucket_capacity must be greater than zero".into(),
            ));
        }

        let refill_interval = refill_interval_secs(config.requests_per_minute);
        Ok(Self {
            cache,
            config,
            refill_interval,
        })
    }

    pub fn config(&self) -> &LimiterConfig {
        &self.config
    }

    pub fn capacity(&self) -> i64 {
        i64::from(self.config.bucket_capacity)
    }

    /// Time for a single token to be replenished
    pub fn refill_interval(&self) -> Duration {
        Duration::from_secs(self.refill_interval as u64)
    }

    pub fn cache(&self) -> &C {
        &self.cache
    }

    /// Decide whether `identifier` may proceed now
    pub async fn allow(&self, identifier: &str) -> AllowOutcome {
        self.allow_at(identifier, SystemTime::now()).await
    }

    /// Decide whether `identifier` may proceed at `now`
    pub async fn allow_at(&self, identifier: &str, now: SystemTime) -> AllowOutcome {
        let capacity = self.capacity();
        if !self.config.enabled {
            return AllowOutcome::allowed(capacity, capacity);
        }

        let key = bucket_key(identifier);
        let now = unix_seconds(now);

        let state = match self.cache.get(&key).await {
            Ok(None) => BucketState::full(capacity, now),
            Ok(Some(raw)) => match BucketState::decode(&raw) {
                Some(state) => state.clamp(capacity),
                None => {
                    warn!(
                        identifier,
                        "Corrupted rate limit bucket, resetting to a fresh bucket"
                    );
                    // The fresh bucket already pays for this request
                    let recovered = BucketState {
                        tokens: capacity - 1,
                        last_refill: now,
                    };
                    return self.persist(&key, identifier, recovered).await;
                }
            },
            Err(e) => {
                warn!(identifier, error = %e, "Rate limit read failed, allowing request");
                return AllowOutcome::allowed(capacity, capacity).with_warning(e);
            }
        };

        let state = state.refill(now, self.refill_interval, capacity);

        if state.tokens <= 0 {
            debug!(identifier, "Rate limit exceeded");
            return AllowOutcome::rejected(capacity, self.refill_interval());
        }

        let next = BucketState {
            tokens: state.tokens - 1,
            ..state
        };
        self.persist(&key, identifier, next).await
    }

    async fn persist(&self, key: &str, identifier: &str, state: BucketState) -> AllowOutcome {
        let outcome = AllowOutcome::allowed(self.capacity(), state.tokens);

        match self
            .cache
            .set(key, state.encode().as_bytes(), BUCKET_TTL)
            .await
        {
            Ok(()) => outcome,
            Err(e) => {
                warn!(identifier, error = %e, "Rate limit write failed, allowing request");
                outcome.with_warning(e)
            }
        }
    }

    /// Empty the bucket of `identifier`
    ///
    /// Writes a zero-token record whose refill epoch is zero, so the next
    /// request refills the bucket to capacity; the record itself expires after
    /// one second.
    pub async fn reset(&self, identifier: &str) -> Result<(), LimiterError> {
        let empty = BucketState {
            tokens: 0,
            last_refill: 0,
        };
        self.cache
            .set(&bucket_key(identifier), empty.encode().as_bytes(), RESET_TTL)
            .await?;
        Ok(())
    }

    /// Tokens `identifier` could spend now
    pub async fn remaining_tokens(&self, identifier: &str) -> Result<i64, LimiterError> {
        self.remaining_tokens_at(identifier, SystemTime::now()).await
    }

    /// Tokens `identifier` could spend at `now`, refill included
    ///
    /// Unknown and corrupted buckets count as full. Read errors propagate:
    /// unlike [`allow`](Self::allow) this is an inspection call with no safe
    /// default.
    pub async fn remaining_tokens_at(
        &self,
        identifier: &str,
        now: SystemTime,
    ) -> Result<i64, LimiterError> {
        let capacity = self.capacity();
        if !self.config.enabled {
            return Ok(capacity);
        }

        let remaining = match self.cache.get(&bucket_key(identifier)).await? {
            None => capacity,
            Some(raw) => match BucketState::decode(&raw) {
                Some(state) => {
                    state
                        .clamp(capacity)
                        .refill(unix_seconds(now), self.refill_interval, capacity)
                        .tokens
                }
                None => capacity,
            },
        };
        Ok(remaining)
    }
}

fn unix_seconds(time: SystemTime) -> i64 {
    // Times before the epoch are treated as the epoch
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
