//! Operation records and their status state machine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Wait estimate reported when nothing is known about the workload
pub const DEFAULT_ESTIMATE_SECONDS: u64 = 60;

/// Lifecycle of an operation
///
/// ```text
/// NEW ──► PROGRESS ──► DONE
///  │         │
///  └─────────┴───────► ERROR
/// ```
///
/// `DONE` and `ERROR` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OperationStatus {
    /// Accepted, processing not started
    New,
    /// Processing pairs
    Progress,
    /// All pairs processed, results available
    Done,
    /// Processing failed
    Error,
}

impl OperationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationStatus::New => "NEW",
            OperationStatus::Progress => "PROGRESS",
            OperationStatus::Done => "DONE",
            OperationStatus::Error => "ERROR",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, OperationStatus::Done | OperationStatus::Error)
    }

    /// Whether a record in this status may be replaced by one in `next`
    ///
    /// `PROGRESS -> PROGRESS` is allowed so the pipeline can advance the
    /// processed count.
    ///
    /// ```
    /// use opgate::OperationStatus::*;
    ///
    /// assert!(New.can_transition_to(Progress));
    /// assert!(Progress.can_transition_to(Done));
    /// assert!(!New.can_transition_to(Done));
    /// assert!(!Done.can_transition_to(Progress));
    /// ```
    pub fn can_transition_to(&self, next: OperationStatus) -> bool {
        use OperationStatus::*;
        matches!(
            (self, next),
            (New, Progress) | (New, Error) | (Progress, Progress) | (Progress, Done) | (Progress, Error)
        )
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pairs processed so far out of the total
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    pub processed: u32,
    pub total: u32,
}

impl Progress {
    pub fn new(total: u32) -> Self {
        Self {
            processed: 0,
            total,
        }
    }
}

/// Full persisted state of one operation
///
/// `results` is only meaningful in `DONE`; `error`, `error_code` and
/// `failed_files` only in `ERROR`. Results are opaque JSON produced by the
/// processing pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationRecord {
    pub operation_id: Uuid,
    pub status: OperationStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<Progress>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub results: Vec<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failed_files: Vec<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<String>,
}

impl OperationRecord {
    /// A `NEW` record with `progress = {0, pairs}`
    pub fn new(operation_id: Uuid, files: Vec<String>, pairs: u32) -> Self {
        Self {
            operation_id,
            status: OperationStatus::New,
            progress: Some(Progress::new(pairs)),
            results: Vec::new(),
            error: None,
            error_code: None,
            failed_files: Vec::new(),
            created_at: Utc::now(),
            files,
        }
    }

    /// Check that `next` is a legal successor of this record
    ///
    /// Returns a description of the first violation found.
    pub(crate) fn check_successor(&self, next: &OperationRecord) -> Result<(), SuccessorError> {
        if next.operation_id != self.operation_id
            || next.created_at != self.created_at
            || next.files != self.files
        {
            return Err(SuccessorError::Record(
                "operation_id, created_at and files are immutable".into(),
            ));
        }

        if !self.status.can_transition_to(next.status) {
            return Err(SuccessorError::Transition);
        }

        if let Some(progress) = next.progress {
            if progress.processed > progress.total {
                return Err(SuccessorError::Record(format!(
                    "processed {} exceeds total {}",
                    progress.processed, progress.total
                )));
            }
            if let Some(previous) = self.progress {
                if progress.processed < previous.processed {
                    return Err(SuccessorError::Record(format!(
                        "processed went backwards from {} to {}",
                        previous.processed, progress.processed
                    )));
                }
            }
        }

        if next.status == OperationStatus::Error && next.error.is_none() {
            return Err(SuccessorError::Record(
                "an ERROR record needs an error message".into(),
            ));
        }

        Ok(())
    }
}

#[derive(Debug)]
pub(crate) enum SuccessorError {
    Transition,
    Record(String),
}

/// Advisory seconds until an operation completes
///
/// ```
/// use opgate::{Progress, estimated_completion_seconds};
///
/// assert_eq!(estimated_completion_seconds(None, 10), 60);
/// assert_eq!(estimated_completion_seconds(Some(&Progress { processed: 0, total: 4 }), 10), 40);
/// assert_eq!(estimated_completion_seconds(Some(&Progress { processed: 3, total: 4 }), 10), 10);
/// ```
pub fn estimated_completion_seconds(progress: Option<&Progress>, seconds_per_pair: u64) -> u64 {
    match progress {
        None => DEFAULT_ESTIMATE_SECONDS,
        Some(p) if p.total == 0 => DEFAULT_ESTIMATE_SECONDS,
        Some(p) if p.processed == 0 => u64::from(p.total).saturating_mul(seconds_per_pair),
        Some(p) => {
            u64::from(p.total.saturating_sub(p.processed)).saturating_mul(seconds_per_pair)
        }
    }
}
