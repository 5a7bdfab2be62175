//! # opgate
//!
//! Rate limiting and idempotent operation tracking over a shared TTL cache.
//!
//! ## Overview
//!
//! opgate uses an external key/value cache such as memcached as its only
//! coordination point. On top of it sit two components:
//! - **A token bucket rate limiter**: per-client buckets stored in the cache,
//!   so every server instance enforces the same limit
//! - **An operation store**: asynchronous operations created at most once per
//!   client-supplied operation key, with status and progress that outlive the
//!   request that created them
//!
//! The cache offers no transactions and may be slow or down. The limiter fails
//! open; the store reports the cache as unavailable and lets the client retry.
//!
//! ## Quick Start
//!
//! ```
//! use opgate::{LimiterConfig, MemoryCache, OperationStore, TokenBucketLimiter};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let cache = Arc::new(MemoryCache::new());
//!
//! // 60 requests per minute, bursts of up to 10
//! let limiter = TokenBucketLimiter::new(
//!     cache.clone(),
//!     LimiterConfig {
//!         requests_per_minute: 60,
//!         bucket_capacity: 10,
//!         ..LimiterConfig::default()
//!     },
//! )
//! .unwrap();
//!
//! let outcome = limiter.allow("203.0.113.7").await;
//! assert!(outcome.allowed);
//! assert_eq!(outcome.remaining, 9);
//!
//! // Operations are keyed by the client's idempotency key
//! let store = OperationStore::new(cache, Duration::from_secs(3600));
//! let created = store
//!     .create_operation("upload-42", vec!["before.pdf".into(), "after.pdf".into()])
//!     .await
//!     .unwrap();
//! assert_eq!(created.pairs_count, 1);
//! assert!(store.create_operation("upload-42", vec![]).await.is_err());
//! # });
//! ```
//!
//! ## Cache Backends
//!
//! Anything implementing [`CacheClient`] can back both components:
//!
//! ### [`MemoryCache`]
//! In-process map with TTLs and periodic sweeping. State is not shared between
//! processes, so use it for tests and single-instance deployments.
//!
//! ```
//! use opgate::MemoryCache;
//!
//! let cache = MemoryCache::builder()
//!     .capacity(100_000)
//!     .cleanup_interval(std::time::Duration::from_secs(60))
//!     .build();
//! ```
//!
//! ### [`TimeoutCache`]
//! Wraps another client and bounds every call with a deadline.
//!
//! ```
//! use opgate::{MemoryCache, TimeoutCache};
//! use std::time::Duration;
//!
//! let cache = TimeoutCache::new(MemoryCache::new(), Duration::from_millis(200));
//! ```
//!
//! A memcached client lives in the `opgate-server` crate.
//!
//! ## Coordinator
//!
//! [`Coordinator`] combines the limiter and the store with upload validation
//! and maps every failure to an [`ErrorCode`]. Transports call it and render
//! the returned views.
//!
//! ## Thread Safety
//!
//! All components are `Send + Sync` and hold no mutable state of their own;
//! share them behind an `Arc`. Concurrent requests for the same bucket or the
//! same operation key race through the cache; see [`core::limiter`] and
//! [`core::operation`] for the consequences.
//!
//! ## Features
//!
//! - `ahash` (default): Use AHash for faster hashing in [`MemoryCache`]

pub mod core;

pub use core::{
    AllowOutcome, CacheClient, CacheError, CompleteView, Coordinator, CoordinatorConfig,
    CreatedOperation, DuplicateOperation, ErrorBody, ErrorCode, FailedView, InProgressView,
    LimiterConfig, LimiterError, MemoryCache, MemoryCacheBuilder, OperationRecord,
    OperationStatus, OperationStore, Progress, RateLimitStatus, RateLimited, StatusError,
    StatusView, StorageBackend, StoreError, TimeoutCache, TokenBucketLimiter, UploadAccepted,
    UploadError, UploadPolicy, UploadedFile, ValidationError, estimated_completion_seconds,
};
