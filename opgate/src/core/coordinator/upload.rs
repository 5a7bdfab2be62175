//! Upload validation
//!
//! Checks run in a fixed order so a request with several problems always
//! reports the same one: operation key, file count, then each file's type and
//! size in upload order.

use crate::core::operation::StoreError;
use crate::core::views::ErrorCode;
use thiserror::Error;
use uuid::Uuid;

/// Longest accepted operation key, leaving room for the index prefix within
/// memcached's 250 byte key limit
pub const MAX_OPERATION_KEY_LEN: usize = 200;

/// Bytes inspected when detecting a file's content type
pub const SNIFF_LEN: usize = 512;

const DEFAULT_MAX_FILES: usize = 20;
const DEFAULT_MAX_FILE_SIZE: u64 = 10 * 1024 * 1024;
// Room for multipart boundaries and part headers
const MULTIPART_OVERHEAD: u64 = 1024 * 1024;

/// Limits applied to an upload request
#[derive(Debug, Clone)]
pub struct UploadPolicy {
    pub max_files: usize,
    /// Per-file limit in bytes
    pub max_file_size: u64,
    /// Detected types are accepted when equal to, or prefixed by, an entry
    pub allowed_mime_types: Vec<String>,
}

impl Default for UploadPolicy {
    fn default() -> Self {
        Self {
            max_files: DEFAULT_MAX_FILES,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            allowed_mime_types: vec!["application/pdf".to_string()],
        }
    }
}

impl UploadPolicy {
    /// Upper bound for a whole request body that can still pass validation
    pub fn max_request_bytes(&self) -> u64 {
        (self.max_files as u64)
            .saturating_mul(self.max_file_size)
            .saturating_add(MULTIPART_OVERHEAD)
    }

    pub fn is_allowed_mime_type(&self, mime_type: &str) -> bool {
        self.allowed_mime_types
            .iter()
            .any(|allowed| mime_type == allowed || mime_type.starts_with(allowed.as_str()))
    }
}

/// What the coordinator needs to know about one uploaded file
///
/// Only the head of the content is kept; it is enough to detect the type.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub name: String,
    pub size: u64,
    head: Vec<u8>,
}

impl UploadedFile {
    pub fn new(name: impl Into<String>, content: &[u8]) -> Self {
        let head_len = content.len().min(SNIFF_LEN);
        Self {
            name: name.into(),
            size: content.len() as u64,
            head: content[..head_len].to_vec(),
        }
    }

    /// Build from a streamed file: its first bytes and its total size
    pub fn from_parts(name: impl Into<String>, head: &[u8], size: u64) -> Self {
        let head_len = head.len().min(SNIFF_LEN);
        Self {
            name: name.into(),
            size,
            head: head[..head_len].to_vec(),
        }
    }

    pub fn mime_type(&self) -> &'static str {
        sniff_mime_type(&self.head)
    }
}

/// Detect a content type from the leading bytes of a file
///
/// ```
/// use opgate::core::coordinator::sniff_mime_type;
///
/// assert_eq!(sniff_mime_type(b"%PDF-1.7\n"), "application/pdf");
/// assert_eq!(sniff_mime_type(b"hello"), "text/plain; charset=utf-8");
/// assert_eq!(sniff_mime_type(&[0x00, 0x01, 0xfe]), "application/octet-stream");
/// ```
pub fn sniff_mime_type(head: &[u8]) -> &'static str {
    let head = &head[..head.len().min(SNIFF_LEN)];

    if head.starts_with(b"%PDF-") {
        "application/pdf"
    } else if head.starts_with(b"\x89PNG\r\n\x1a\n") {
        "image/png"
    } else if head.starts_with(&[0xff, 0xd8, 0xff]) {
        "image/jpeg"
    } else if head.starts_with(b"GIF87a") || head.starts_with(b"GIF89a") {
        "image/gif"
    } else if head.starts_with(b"PK\x03\x04") {
        "application/zip"
    } else if looks_like_text(head) {
        "text/plain; charset=utf-8"
    } else {
        "application/octet-stream"
    }
}

fn looks_like_text(head: &[u8]) -> bool {
    // A multi-byte sequence may be cut at the sniff boundary
    let text = match std::str::from_utf8(head) {
        Ok(text) => text,
        Err(e) if e.error_len().is_none() => match std::str::from_utf8(&head[..e.valid_up_to()]) {
            Ok(text) => text,
            Err(_) => return false,
        },
        Err(_) => return false,
    };
    !text
        .chars()
        .any(|c| c.is_control() && !matches!(c, '\n' | '\r' | '\t' | '\x0c'))
}

/// A request rejected before anything was stored
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("X-Operation-Key header is required")]
    MissingOperationKey,

    #[error("invalid operation key: {0}")]
    InvalidOperationKey(String),

    #[error("No files provided")]
    NoFiles,

    #[error("Maximum {max} files allowed per request. Got {got} files")]
    FileLimitExceeded { max: usize, got: usize },

    #[error("At least 2 files required (minimum 1 pair)")]
    InsufficientFiles,

    #[error("Files count must be even (pairs of before/after). Got {0} files")]
    InvalidFileCount(usize),

    #[error("File {name} has invalid MIME type: {mime_type}")]
    InvalidFileType { name: String, mime_type: String },

    #[error("File {name} exceeds maximum size of {max} bytes")]
    FileTooLarge { name: String, max: u64 },
}

impl ValidationError {
    pub fn code(&self) -> ErrorCode {
        match self {
            ValidationError::MissingOperationKey => ErrorCode::MissingOperationKey,
            ValidationError::InvalidOperationKey(_) => ErrorCode::InvalidOperationKey,
            ValidationError::NoFiles => ErrorCode::NoFiles,
            ValidationError::FileLimitExceeded { .. } => ErrorCode::FileLimitExceeded,
            ValidationError::InsufficientFiles => ErrorCode::InsufficientFiles,
            ValidationError::InvalidFileCount(_) => ErrorCode::InvalidFileCount,
            ValidationError::InvalidFileType { .. } => ErrorCode::InvalidFileType,
            ValidationError::FileTooLarge { .. } => ErrorCode::FileTooLarge,
        }
    }
}

/// Check `operation_key` against the cache key rules
pub fn validate_operation_key(operation_key: &str) -> Result<(), ValidationError> {
    if operation_key.is_empty() {
        return Err(ValidationError::MissingOperationKey);
    }
    if operation_key.len() > MAX_OPERATION_KEY_LEN {
        return Err(ValidationError::InvalidOperationKey(format!(
            "longer than {MAX_OPERATION_KEY_LEN} bytes"
        )));
    }
    if operation_key
        .chars()
        .any(|c| c.is_whitespace() || c.is_control())
    {
        return Err(ValidationError::InvalidOperationKey(
            "whitespace and control characters are not allowed".into(),
        ));
    }
    Ok(())
}

/// Check the file set against `policy`
pub fn validate_files(policy: &UploadPolicy, files: &[UploadedFile]) -> Result<(), ValidationError> {
    let count = files.len();
    if count == 0 {
        return Err(ValidationError::NoFiles);
    }
    if count > policy.max_files {
        return Err(ValidationError::FileLimitExceeded {
            max: policy.max_files,
            got: count,
        });
    }
    if count < 2 {
        return Err(ValidationError::InsufficientFiles);
    }
    if count % 2 != 0 {
        return Err(ValidationError::InvalidFileCount(count));
    }

    for file in files {
        let mime_type = file.mime_type();
        if !policy.is_allowed_mime_type(mime_type) {
            return Err(ValidationError::InvalidFileType {
                name: file.name.clone(),
                mime_type: mime_type.to_string(),
            });
        }
        if file.size > policy.max_file_size {
            return Err(ValidationError::FileTooLarge {
                name: file.name.clone(),
                max: policy.max_file_size,
            });
        }
    }
    Ok(())
}

/// Outcome of a rejected upload
#[derive(Debug, Error)]
pub enum UploadError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("operation key already used by operation {existing_operation_id}")]
    Duplicate { existing_operation_id: Uuid },

    #[error("failed to create operation: {0}")]
    Internal(#[source] StoreError),
}

impl UploadError {
    pub fn code(&self) -> ErrorCode {
        match self {
            UploadError::Validation(e) => e.code(),
            UploadError::Duplicate { .. } => ErrorCode::DuplicateOperationKey,
            UploadError::Internal(_) => ErrorCode::InternalError,
        }
    }
}

/// Outcome of a failed status lookup
#[derive(Debug, Error)]
pub enum StatusError {
    #[error("id parameter is required")]
    MissingId,

    #[error("Invalid operation ID format")]
    InvalidId,

    #[error("Operation not found")]
    NotFound,

    #[error("failed to read operation: {0}")]
    Internal(#[source] StoreError),
}

impl StatusError {
    pub fn code(&self) -> ErrorCode {
        match self {
            StatusError::MissingId => ErrorCode::MissingId,
            StatusError::InvalidId => ErrorCode::InvalidIdFormat,
            StatusError::NotFound => ErrorCode::OperationNotFound,
            StatusError::Internal(_) => ErrorCode::InternalError,
        }
    }
}
