//! Request coordination over the limiter and the operation store
//!
//! The [`Coordinator`] is what a transport talks to. It owns the policy that
//! sits between the raw components and the client:
//!
//! - uploads are validated before anything touches the cache
//! - store failures are mapped to a small set of client-facing errors
//! - limiter failures never block a request; they are logged and absorbed
//!
//! Nothing backend specific crosses this boundary. A transport only needs the
//! error `code()`s and the view types to build its responses.

mod upload;


pub use upload::{
    MAX_OPERATION_KEY_LEN, SNIFF_LEN, StatusError, UploadError, UploadPolicy, UploadedFile,
    ValidationError, sniff_mime_type, validate_files, validate_operation_key,
};

use super::cache::CacheClient;
use super::limiter::TokenBucketLimiter;
use super::operation::{OperationStore, StoreError};
use super::views::{StatusView, UploadAccepted};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, warn};
use uuid::Uuid;

const DEFAULT_SECONDS_PER_PAIR: u64 = 10;

/// Settings for request handling
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Average processing time of one file pair, used for wait estimates
    pub average_seconds_per_pair: u64,
    pub upload: UploadPolicy,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            average_seconds_per_pair: DEFAULT_SECONDS_PER_PAIR,
            upload: UploadPolicy::default(),
        }
    }
}

/// Rate limit headroom of an admitted request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitStatus {
    pub limit: i64,
    pub remaining: i64,
}

/// A request turned away by the limiter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("rate limit exceeded, retry after {}s", retry_after.as_secs())]
pub struct RateLimited {
    pub limit: i64,
    pub remaining: i64,
    pub retry_after: Duration,
}

/// Entry point for transports
pub struct Coordinator<C> {
    limiter: TokenBucketLimiter<C>,
    store: OperationStore<C>,
    config: CoordinatorConfig,
}

impl<C: CacheClient> Coordinator<C> {
    pub fn new(
        limiter: TokenBucketLimiter<C>,
        store: OperationStore<C>,
        config: CoordinatorConfig,
    ) -> Self {
        Self {
            limiter,
            store,
            config,
        }
    }

    pub fn limiter(&self) -> &TokenBucketLimiter<C> {
        &self.limiter
    }

    pub fn store(&self) -> &OperationStore<C> {
        &self.store
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Validate an upload and create its operation
    ///
    /// # Errors
    ///
    /// - [`UploadError::Validation`] when the key or the files are rejected;
    ///   nothing is written in that case
    /// - [`UploadError::Duplicate`] when the key maps to a live operation
    /// - [`UploadError::Internal`] when the cache fails
    pub async fn handle_upload(
        &self,
        operation_key: &str,
        files: &[UploadedFile],
    ) -> Result<UploadAccepted, UploadError> {
        validate_operation_key(operation_key)?;
        validate_files(&self.config.upload, files)?;

        let names = files.iter().map(|file| file.name.clone()).collect();
        match self.store.create_operation(operation_key, names).await {
            Ok(created) => {
                debug!(
                    operation_id = %created.operation_id,
                    pairs_count = created.pairs_count,
                    "Upload accepted"
                );
                Ok(UploadAccepted::new(
                    created.operation_id,
                    created.pairs_count,
                ))
            }
            Err(StoreError::Duplicate {
                existing_operation_id,
            }) => Err(UploadError::Duplicate {
                existing_operation_id,
            }),
            Err(e) => {
                error!(operation_key, error = %e, "Failed to create operation");
                Err(UploadError::Internal(e))
            }
        }
    }

    /// Look up the client view of `operation_id`
    pub async fn handle_status(&self, operation_id: &str) -> Result<StatusView, StatusError> {
        if operation_id.is_empty() {
            return Err(StatusError::MissingId);
        }
        let id = Uuid::parse_str(operation_id).map_err(|_| StatusError::InvalidId)?;

        match self.store.get_operation(&id).await {
            Ok(record) => Ok(StatusView::from_record(
                record,
                self.config.average_seconds_per_pair,
            )),
            Err(StoreError::NotFound) => Err(StatusError::NotFound),
            Err(e) => {
                error!(operation_id, error = %e, "Failed to get operation");
                Err(StatusError::Internal(e))
            }
        }
    }

    /// Charge one request to `identifier`
    ///
    /// Cache trouble inside the limiter is logged here and never rejects the
    /// request.
    pub async fn check_rate_limit(&self, identifier: &str) -> Result<RateLimitStatus, RateLimited> {
        let outcome = self.limiter.allow(identifier).await;

        if let Some(warning) = &outcome.warning {
            warn!(
                identifier,
                provider = self.limiter.cache().provider_name(),
                error = %warning,
                "Rate limiter error, allowing request"
            );
        }

        if outcome.allowed {
            Ok(RateLimitStatus {
                limit: outcome.limit,
                remaining: outcome.remaining,
            })
        } else {
            Err(RateLimited {
                limit: outcome.limit,
                remaining: 0,
                retry_after: outcome.retry_after,
            })
        }
    }

    /// Run `next` if `identifier` is within its limit
    ///
    /// `next` is not called for a rejected request.
    pub async fn handle_rate_limit<F, Fut, T>(
        &self,
        identifier: &str,
        next: F,
    ) -> Result<(T, RateLimitStatus), RateLimited>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let status = self.check_rate_limit(identifier).await?;
        Ok((next().await, status))
    }

    /// Whether the shared cache answers
    pub async fn cache_healthy(&self) -> bool {
        self.store.cache().health_check().await
    }
}
