//! Core components of the opgate library
//!
//! This module contains the building blocks, leaves first:
//! - [`cache`]: the cache contract and the in-process implementations
//! - [`limiter`]: the token bucket rate limiter
//! - [`operation`]: operation records and idempotent creation
//! - [`views`]: client-facing response payloads
//! - [`coordinator`]: request handling over the limiter and the store

pub mod cache;
pub mod coordinator;
pub mod limiter;
pub mod operation;
pub mod views;

#[cfg(test)]
mod test_support;

pub use cache::{CacheClient, CacheError, MemoryCache, MemoryCacheBuilder, TimeoutCache};
pub use coordinator::{
    Coordinator, CoordinatorConfig, RateLimitStatus, RateLimited, StatusError, UploadError,
    UploadPolicy, UploadedFile, ValidationError,
};
pub use limiter::{AllowOutcome, LimiterConfig, LimiterError, StorageBackend, TokenBucketLimiter};
pub use operation::{
    CreatedOperation, OperationRecord, OperationStatus, OperationStore, Progress, StoreError,
    estimated_completion_seconds,
};
pub use views::{
    CompleteView, DuplicateOperation, ErrorBody, ErrorCode, FailedView, InProgressView,
    StatusView, UploadAccepted,
};
