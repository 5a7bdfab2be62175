//! Operation records and idempotent creation over the shared cache
//!
//! An operation is stored under its own id as a JSON [`OperationRecord`].
//! Creation also writes an idempotency index entry, `opkey:<operation key>`,
//! holding the operation id, so a second submission with the same key can be
//! turned away while the entry lives. Both entries share the same TTL; once
//! they expire the key may be reused for a new operation.
//!
//! # Races and partial writes
//!
//! The index lookup and the writes are not atomic. Two concurrent creations
//! with the same key can both miss the index and create two operations. If
//! the index write fails after the record write succeeded, the operation
//! exists but a retry with the same key is not recognised as a duplicate.
//! Both outcomes are accepted; callers pick key granularity accordingly.

mod record;

#[cfg(test)]
mod tests;

pub use record::{
    DEFAULT_ESTIMATE_SECONDS, OperationRecord, OperationStatus, Progress,
    estimated_completion_seconds,
};

use super::cache::{CacheClient, CacheError};
use record::SuccessorError;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, warn};
use uuid::Uuid;

/// Namespace for idempotency index entries
pub const OPERATION_KEY_PREFIX: &str = "opkey:";

/// Cache key of the index entry for `operation_key`
pub fn index_key(operation_key: &str) -> String {
    format!("{OPERATION_KEY_PREFIX}{operation_key}")
}

/// Closed set of outcomes the store reports to its callers
#[derive(Debug, Error)]
pub enum StoreError {
    /// Unknown, expired or unreadable operation
    #[error("operation not found")]
    NotFound,

    /// The operation key is still mapped to a live operation
    #[error("operation key already used by operation {existing_operation_id}")]
    Duplicate { existing_operation_id: Uuid },

    /// The cache failed or timed out; retrying may succeed
    #[error("operation storage unavailable: {0}")]
    Unavailable(#[source] CacheError),

    /// The requested status change is not allowed by the state machine
    #[error("invalid status transition from {from} to {to}")]
    InvalidTransition {
        from: OperationStatus,
        to: OperationStatus,
    },

    /// The new record is inconsistent with the stored one
    #[error("invalid operation record: {0}")]
    InvalidRecord(String),
}

impl StoreError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

impl From<CacheError> for StoreError {
    fn from(e: CacheError) -> Self {
        StoreError::Unavailable(e)
    }
}

/// Result of a successful creation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CreatedOperation {
    pub operation_id: Uuid,
    pub pairs_count: u32,
}

/// Creates, updates and serves operation records
pub struct OperationStore<C> {
    cache: C,
    record_ttl: Duration,
}

impl<C: CacheClient> OperationStore<C> {
    pub fn new(cache: C, record_ttl: Duration) -> Self {
        Self { cache, record_ttl }
    }

    pub fn record_ttl(&self) -> Duration {
        self.record_ttl
    }

    pub fn cache(&self) -> &C {
        &self.cache
    }

    /// Create a `NEW` operation for `files` unless `operation_key` is taken
    ///
    /// Files are processed in before/after pairs, so the operation covers
    /// `files.len() / 2` pairs.
    ///
    /// # Errors
    ///
    /// - [`StoreError::Duplicate`] with the existing id when the key is live
    /// - [`StoreError::Unavailable`] when the index lookup or the record write
    ///   fails
    pub async fn create_operation(
        &self,
        operation_key: &str,
        files: Vec<String>,
    ) -> Result<CreatedOperation, StoreError> {
        if let Some(existing_operation_id) = self.lookup_index(operation_key).await? {
            debug!(operation_key, %existing_operation_id, "Duplicate operation key");
            return Err(StoreError::Duplicate {
                existing_operation_id,
            });
        }

        let operation_id = Uuid::new_v4();
        let pairs_count = (files.len() / 2) as u32;
        let record = OperationRecord::new(operation_id, files, pairs_count);

        self.write_record(&record).await?;

        // The operation exists from here on; a lost index entry only weakens
        // duplicate detection for this key.
        if let Err(e) = self
            .cache
            .set(
                &index_key(operation_key),
                operation_id.to_string().as_bytes(),
                self.record_ttl,
            )
            .await
        {
            warn!(operation_key, %operation_id, error = %e, "Failed to save operation key");
        }

        debug!(%operation_id, pairs_count, "Operation created");
        Ok(CreatedOperation {
            operation_id,
            pairs_count,
        })
    }

    /// Fetch the current record of `operation_id`
    ///
    /// A record that cannot be decoded is reported as not found rather than
    /// guessed at.
    pub async fn get_operation(&self, operation_id: &Uuid) -> Result<OperationRecord, StoreError> {
        let raw = self
            .cache
            .get(&operation_id.to_string())
            .await?
            .ok_or(StoreError::NotFound)?;

        match serde_json::from_slice::<OperationRecord>(&raw) {
            Ok(record) if record.operation_id == *operation_id => Ok(record),
            Ok(record) => {
                warn!(
                    %operation_id,
                    stored_id = %record.operation_id,
                    "Operation record stored under a foreign id"
                );
                Err(StoreError::NotFound)
            }
            Err(e) => {
                warn!(%operation_id, error = %e, "Corrupted operation record");
                Err(StoreError::NotFound)
            }
        }
    }

    /// Replace the stored record with `next`, refreshing its TTL
    ///
    /// Used by the processing pipeline to publish progress and outcomes. The
    /// change must follow the status state machine, keep the immutable fields
    /// and never move `processed` backwards.
    pub async fn update_operation(&self, next: OperationRecord) -> Result<(), StoreError> {
        let current = self.get_operation(&next.operation_id).await?;

        current.check_successor(&next).map_err(|e| match e {
            SuccessorError::Transition => StoreError::InvalidTransition {
                from: current.status,
                to: next.status,
            },
            SuccessorError::Record(reason) => StoreError::InvalidRecord(reason),
        })?;

        self.write_record(&next).await
    }

    /// Move `operation_id` to `PROGRESS` with `processed` pairs done
    pub async fn mark_progress(
        &self,
        operation_id: &Uuid,
        processed: u32,
    ) -> Result<OperationRecord, StoreError> {
        let mut record = self.get_operation(operation_id).await?;
        let total = record
            .progress
            .map(|p| p.total)
            .ok_or_else(|| StoreError::InvalidRecord("operation has no progress total".into()))?;

        record.status = OperationStatus::Progress;
        record.progress = Some(Progress { processed, total });
        self.update_operation(record.clone()).await?;
        Ok(record)
    }

    /// Complete `operation_id` with `results`
    pub async fn mark_done(
        &self,
        operation_id: &Uuid,
        results: Vec<serde_json::Value>,
    ) -> Result<OperationRecord, StoreError> {
        let mut record = self.get_operation(operation_id).await?;
        record.status = OperationStatus::Done;
        record.progress = record.progress.map(|p| Progress {
            processed: p.total,
            total: p.total,
        });
        record.results = results;
        self.update_operation(record.clone()).await?;
        Ok(record)
    }

    /// Fail `operation_id`
    pub async fn mark_failed(
        &self,
        operation_id: &Uuid,
        error: impl Into<String>,
        error_code: Option<String>,
        failed_files: Vec<String>,
    ) -> Result<OperationRecord, StoreError> {
        let mut record = self.get_operation(operation_id).await?;
        record.status = OperationStatus::Error;
        record.error = Some(error.into());
        record.error_code = error_code;
        record.failed_files = failed_files;
        self.update_operation(record.clone()).await?;
        Ok(record)
    }

    async fn lookup_index(&self, operation_key: &str) -> Result<Option<Uuid>, StoreError> {
        let Some(raw) = self.cache.get(&index_key(operation_key)).await? else {
            return Ok(None);
        };

        let parsed = std::str::from_utf8(&raw)
            .ok()
            .and_then(|text| Uuid::parse_str(text.trim()).ok());
        if parsed.is_none() {
            warn!(operation_key, "Corrupted operation key entry, ignoring it");
        }
        Ok(parsed)
    }

    async fn write_record(&self, record: &OperationRecord) -> Result<(), StoreError> {
        let payload = serde_json::to_vec(record)
            .map_err(|e| StoreError::InvalidRecord(format!("failed to encode record: {e}")))?;

        self.cache
            .set(&record.operation_id.to_string(), &payload, self.record_ttl)
            .await
            .map_err(|e| {
                error!(operation_id = %record.operation_id, error = %e, "Failed to save operation");
                StoreError::Unavailable(e)
            })
    }
}
