//! Response payloads produced by the coordinator
//!
//! These are the JSON bodies a transport returns to clients. The core builds
//! them so every transport renders operations the same way.

use super::operation::{OperationRecord, OperationStatus, Progress, estimated_completion_seconds};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Machine-readable error codes returned to clients
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    MissingOperationKey,
    InvalidOperationKey,
    InvalidFormData,
    NoFiles,
    FileLimitExceeded,
    InsufficientFiles,
    InvalidFileCount,
    InvalidFileType,
    FileTooLarge,
    DuplicateOperationKey,
    MissingId,
    InvalidIdFormat,
    OperationNotFound,
    RateLimitExceeded,
    InternalError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::MissingOperationKey => "MISSING_OPERATION_KEY",
            ErrorCode::InvalidOperationKey => "INVALID_OPERATION_KEY",
            ErrorCode::InvalidFormData => "INVALID_FORM_DATA",
            ErrorCode::NoFiles => "NO_FILES",
            ErrorCode::FileLimitExceeded => "FILE_LIMIT_EXCEEDED",
            ErrorCode::InsufficientFiles => "INSUFFICIENT_FILES",
            ErrorCode::InvalidFileCount => "INVALID_FILE_COUNT",
            ErrorCode::InvalidFileType => "INVALID_FILE_TYPE",
            ErrorCode::FileTooLarge => "FILE_TOO_LARGE",
            ErrorCode::DuplicateOperationKey => "DUPLICATE_OPERATION_KEY",
            ErrorCode::MissingId => "MISSING_ID",
            ErrorCode::InvalidIdFormat => "INVALID_ID_FORMAT",
            ErrorCode::OperationNotFound => "OPERATION_NOT_FOUND",
            ErrorCode::RateLimitExceeded => "RATE_LIMIT_EXCEEDED",
            ErrorCode::InternalError => "INTERNAL_ERROR",
        }
    }
}

/// Generic error body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub code: ErrorCode,
}

impl ErrorBody {
    pub fn new(code: ErrorCode, error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            code,
        }
    }
}

/// Body of an accepted upload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadAccepted {
    pub operation_id: Uuid,
    pub status: OperationStatus,
    pub pairs_count: u32,
    pub message: String,
}

impl UploadAccepted {
    pub fn new(operation_id: Uuid, pairs_count: u32) -> Self {
        Self {
            operation_id,
            status: OperationStatus::New,
            pairs_count,
            message: format!("{pairs_count} pairs of files accepted for processing"),
        }
    }
}

/// Body returned when an operation key is reused while still live
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DuplicateOperation {
    pub error: String,
    pub code: ErrorCode,
    pub existing_operation_id: Uuid,
}

impl DuplicateOperation {
    pub fn new(existing_operation_id: Uuid) -> Self {
        Self {
            error: "Operation with this key already exists".to_string(),
            code: ErrorCode::DuplicateOperationKey,
            existing_operation_id,
        }
    }
}

/// `NEW` or `PROGRESS` operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InProgressView {
    pub operation_id: Uuid,
    pub status: OperationStatus,
    pub progress: Progress,
    pub estimated_completion_seconds: u64,
}

/// `DONE` operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompleteView {
    pub operation_id: Uuid,
    pub status: OperationStatus,
    pub results: Vec<serde_json::Value>,
}

/// `ERROR` operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedView {
    pub operation_id: Uuid,
    pub status: OperationStatus,
    pub error: String,
    pub error_code: Option<String>,
    pub failed_files: Vec<String>,
}

/// Status of an operation as shown to clients
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum StatusView {
    InProgress(InProgressView),
    Complete(CompleteView),
    Failed(FailedView),
}

impl StatusView {
    /// Project `record` onto the client view for its status
    pub fn from_record(record: OperationRecord, seconds_per_pair: u64) -> Self {
        match record.status {
            OperationStatus::New | OperationStatus::Progress => {
                let estimated_completion_seconds =
                    estimated_completion_seconds(record.progress.as_ref(), seconds_per_pair);
                StatusView::InProgress(InProgressView {
                    operation_id: record.operation_id,
                    status: record.status,
                    progress: record.progress.unwrap_or(Progress::new(0)),
                    estimated_completion_seconds,
                })
            }
            OperationStatus::Done => StatusView::Complete(CompleteView {
                operation_id: record.operation_id,
                status: record.status,
                results: record.results,
            }),
            OperationStatus::Error => StatusView::Failed(FailedView {
                operation_id: record.operation_id,
                status: record.status,
                error: record
                    .error
                    .unwrap_or_else(|| "operation failed".to_string()),
                error_code: record.error_code,
                failed_files: record.failed_files,
            }),
        }
    }

    pub fn operation_id(&self) -> Uuid {
        match self {
            StatusView::InProgress(view) => view.operation_id,
            StatusView::Complete(view) => view.operation_id,
            StatusView::Failed(view) => view.operation_id,
        }
    }

    pub fn status(&self) -> OperationStatus {
        match self {
            StatusView::InProgress(view) => view.status,
            StatusView::Complete(view) => view.status,
            StatusView::Failed(view) => view.status,
        }
    }
}
