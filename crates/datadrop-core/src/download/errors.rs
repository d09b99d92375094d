//! Download error types.
//!
//! `DownloadError` is what callers see: every variant has a stable machine
//! code, a details bag and recovery suggestions. It is serializable and never
//! wraps non-serializable types such as `std::io::Error`.
//!
//! `ArtifactError` is produced by artifact stores at the point of failure and
//! already carries its classification (transient transport problem vs storage
//! problem), so nothing downstream inspects message text.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;
use std::io::ErrorKind;
use thiserror::Error;

use super::record::DownloadStatus;
use crate::domain::{Compression, FileFormat, SharingLevel};
use crate::policy::RateWindow;

/// Error type for download operations.
#[derive(Clone, Debug, Error, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DownloadError {
    #[error("Dataset not found: {dataset_id}")]
    DatasetNotFound { dataset_id: String },

    #[error("Dataset {dataset_id} was deleted at {deleted_at}")]
    DatasetDeleted {
        dataset_id: String,
        deleted_at: DateTime<Utc>,
    },

    #[error("Dataset {dataset_id} is inactive")]
    DatasetInactive { dataset_id: String },

    /// The subject cannot read the dataset at all.
    #[error("Access denied to dataset {dataset_id}")]
    AccessDenied {
        dataset_id: String,
        sharing_level: SharingLevel,
        required_permission: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },

    /// The subject can read the dataset but may not download it.
    #[error("Download not permitted for dataset {dataset_id}: {reason}")]
    DownloadPermissionDenied { dataset_id: String, reason: String },

    #[error("Rate limit exceeded: {used}/{limit} {window} downloads")]
    RateLimitExceeded {
        window: RateWindow,
        limit: u32,
        used: u32,
        retry_after_secs: u64,
    },

    #[error("Format '{requested}' is not available for {origin}")]
    InvalidFileFormat {
        requested: FileFormat,
        /// Native representation of the dataset (e.g. `connector:api`).
        origin: String,
        supported: Vec<FileFormat>,
    },

    #[error("File size {file_size_bytes} bytes exceeds the {max_allowed_mb} MB limit")]
    FileSizeExceeded {
        file_size_bytes: u64,
        max_allowed_mb: u64,
    },

    #[error("Compression '{requested}' is not allowed")]
    InvalidCompression {
        requested: Compression,
        allowed: Vec<Compression>,
    },

    /// Internal fault while validating; details are logged, not exposed.
    #[error("Validation error: {message}")]
    Validation { message: String },

    #[error("Invalid download token: {reason}")]
    TokenInvalid { reason: String },

    #[error("Download token expired at {expired_at}")]
    TokenExpired { expired_at: DateTime<Utc> },

    #[error("Download not found")]
    DownloadNotFound,

    #[error("Download already completed")]
    AlreadyCompleted {
        #[serde(skip_serializing_if = "Option::is_none")]
        completed_at: Option<DateTime<Utc>>,
    },

    #[error("A transfer is already in progress for this token")]
    TransferInProgress,

    #[error("Download in status '{status}' cannot be retried")]
    NotRetryable { status: DownloadStatus },

    #[error("Network interrupted after {bytes_transferred} bytes: {message}")]
    NetworkInterrupted {
        bytes_transferred: u64,
        message: String,
    },

    #[error("Storage error: {message}")]
    Storage { message: String },

    #[error("File corrupted: {message}")]
    FileCorrupted { message: String },

    #[error("Download failed: {message}")]
    DownloadFailed { message: String },
}

impl DownloadError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn token_invalid(reason: impl Into<String>) -> Self {
        Self::TokenInvalid {
            reason: reason.into(),
        }
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    pub fn corrupted(message: impl Into<String>) -> Self {
        Self::FileCorrupted {
            message: message.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self::DownloadFailed {
            message: message.into(),
        }
    }

    /// Stable machine-readable code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::DatasetNotFound { .. } => "DATASET_NOT_FOUND",
            Self::DatasetDeleted { .. } => "DATASET_DELETED",
            Self::DatasetInactive { .. } => "DATASET_INACTIVE",
            Self::AccessDenied { .. } => "ACCESS_DENIED",
            Self::DownloadPermissionDenied { .. } => "DOWNLOAD_PERMISSION_DENIED",
            Self::RateLimitExceeded { .. } => "RATE_LIMIT_EXCEEDED",
            Self::InvalidFileFormat { .. } => "INVALID_FILE_FORMAT",
            Self::FileSizeExceeded { .. } => "FILE_SIZE_EXCEEDED",
            Self::InvalidCompression { .. } => "INVALID_COMPRESSION",
            Self::Validation { .. } => "VALIDATION_ERROR",
            Self::TokenInvalid { .. } => "TOKEN_INVALID",
            Self::TokenExpired { .. } => "TOKEN_EXPIRED",
            Self::DownloadNotFound => "DOWNLOAD_NOT_FOUND",
            Self::AlreadyCompleted { .. } => "DOWNLOAD_ALREADY_COMPLETED",
            Self::TransferInProgress => "TRANSFER_IN_PROGRESS",
            Self::NotRetryable { .. } => "DOWNLOAD_NOT_RETRYABLE",
            Self::NetworkInterrupted { .. } => "NETWORK_INTERRUPTED",
            Self::Storage { .. } => "STORAGE_ERROR",
            Self::FileCorrupted { .. } => "FILE_CORRUPTED",
            Self::DownloadFailed { .. } => "DOWNLOAD_FAILED",
        }
    }

    /// Structured details for the caller (sizes vs limits, windows, etc.).
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn details(&self) -> serde_json::Value {
        match self {
            Self::DatasetNotFound { dataset_id } | Self::DatasetInactive { dataset_id } => {
                json!({ "dataset_id": dataset_id })
            }
            Self::DatasetDeleted {
                dataset_id,
                deleted_at,
            } => json!({ "dataset_id": dataset_id, "deleted_at": deleted_at }),
            Self::AccessDenied {
                dataset_id,
                sharing_level,
                required_permission,
                reason,
            } => json!({
                "dataset_id": dataset_id,
                "sharing_level": sharing_level,
                "required_permission": required_permission,
                "reason": reason,
            }),
            Self::DownloadPermissionDenied { dataset_id, reason } => {
                json!({ "dataset_id": dataset_id, "reason": reason })
            }
            Self::RateLimitExceeded {
                window,
                limit,
                used,
                retry_after_secs,
            } => json!({
                "window": window,
                "limit": limit,
                "used": used,
                "retry_after": retry_after_secs,
            }),
            Self::InvalidFileFormat {
                requested,
                origin,
                supported,
            } => json!({
                "requested_format": requested,
                "source": origin,
                "supported_formats": supported,
            }),
            Self::FileSizeExceeded {
                file_size_bytes,
                max_allowed_mb,
            } => {
                let mb = *file_size_bytes as f64 / (1024.0 * 1024.0);
                json!({
                    "file_size_bytes": file_size_bytes,
                    "file_size_mb": (mb * 100.0).round() / 100.0,
                    "max_allowed_mb": max_allowed_mb,
                })
            }
            Self::InvalidCompression { requested, allowed } => {
                json!({ "requested_compression": requested, "allowed_compressions": allowed })
            }
            Self::TokenExpired { expired_at } => json!({ "expired_at": expired_at }),
            Self::AlreadyCompleted { completed_at } => json!({ "completed_at": completed_at }),
            Self::NotRetryable { status } => json!({ "status": status }),
            Self::NetworkInterrupted {
                bytes_transferred, ..
            } => json!({ "bytes_transferred": bytes_transferred, "resumable": true }),
            Self::TokenInvalid { reason } => json!({ "reason": reason }),
            Self::Validation { .. }
            | Self::DownloadNotFound
            | Self::TransferInProgress
            | Self::Storage { .. }
            | Self::FileCorrupted { .. }
            | Self::DownloadFailed { .. } => json!({}),
        }
    }

    /// Actionable next steps for the caller.
    #[must_use]
    pub fn suggestions(&self) -> Vec<String> {
        let s: &[&str] = match self {
            Self::DatasetNotFound { .. } => &["Check the dataset identifier."],
            Self::DatasetDeleted { .. } => &["Ask the dataset owner to restore the dataset."],
            Self::DatasetInactive { .. } => &["Ask the dataset owner to reactivate the dataset."],
            Self::AccessDenied { .. } => &["Request access from the dataset owner or an organization admin."],
            Self::DownloadPermissionDenied { .. } => {
                &["Ask an organization admin to enable downloads for your account or role."]
            }
            Self::RateLimitExceeded { .. } => &["Wait until the rate-limit window resets and try again."],
            Self::InvalidFileFormat { .. } => &["Choose one of the supported formats."],
            Self::FileSizeExceeded { .. } => &[
                "Request a filtered subset of the dataset.",
                "Ask an organization admin to raise the size limit.",
            ],
            Self::InvalidCompression { .. } => &["Choose an allowed compression or none."],
            Self::Validation { .. } => &["Try again later; contact support if the problem persists."],
            Self::TokenInvalid { .. } | Self::TokenExpired { .. } | Self::DownloadNotFound => {
                &["Request a new download link."]
            }
            Self::AlreadyCompleted { .. } => &["Request a new download link to download again."],
            Self::TransferInProgress => &["Wait for the active transfer to finish or be interrupted."],
            Self::NotRetryable { .. } => &["Check the download progress before retrying."],
            Self::NetworkInterrupted { .. } => &[
                "Check your network connection.",
                "Resume the download with a Range request from the last received byte.",
                "Or retry the download.",
            ],
            Self::Storage { .. } => &[
                "Retry the download in a few minutes.",
                "Contact support if the problem persists.",
            ],
            Self::FileCorrupted { .. } => &[
                "Retry the download; the artifact may be regenerated.",
                "Contact the dataset owner if the problem persists.",
            ],
            Self::DownloadFailed { .. } => &["Retry the download."],
        };
        s.iter().map(ToString::to_string).collect()
    }

    /// Whether retrying the download may succeed.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::NetworkInterrupted { .. } | Self::Storage { .. } | Self::FileCorrupted { .. }
        )
    }

    /// Whether this error came from a transfer (as opposed to validation).
    #[must_use]
    pub const fn is_transfer_failure(&self) -> bool {
        matches!(
            self,
            Self::NetworkInterrupted { .. }
                | Self::Storage { .. }
                | Self::FileCorrupted { .. }
                | Self::DownloadFailed { .. }
        )
    }

    /// Convert to a user-friendly message.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::Validation { .. } => {
                "The download request could not be validated. Please try again.".to_string()
            }
            Self::RateLimitExceeded {
                window,
                limit,
                retry_after_secs,
                ..
            } => format!(
                "You have reached your {window} limit of {limit} downloads. Try again in {retry_after_secs} seconds."
            ),
            Self::FileSizeExceeded { max_allowed_mb, .. } => {
                format!("This dataset exceeds your organization's {max_allowed_mb} MB download limit.")
            }
            Self::NetworkInterrupted { .. } => {
                "The download was interrupted. You can resume it.".to_string()
            }
            other => other.to_string(),
        }
    }
}

/// Convenience result type for download operations.
pub type DownloadResult<T> = Result<T, DownloadError>;

/// Category of a transient transport failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransientKind {
    ConnectionReset,
    TimedOut,
    Interrupted,
    /// The client stopped consuming or went away.
    ClientDisconnected,
    /// The server is shutting down.
    Cancelled,
}

impl fmt::Display for TransientKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::ConnectionReset => "connection reset",
            Self::TimedOut => "timed out",
            Self::Interrupted => "interrupted",
            Self::ClientDisconnected => "client disconnected",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Classified failure raised by an artifact store or the transport.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ArtifactError {
    /// Worth resuming: the bytes are fine, the path to the client is not.
    #[error("transient failure ({kind}): {message}")]
    Transient { kind: TransientKind, message: String },

    /// The storage backend failed.
    #[error("storage failure: {message}")]
    Persistent { message: String },

    /// The artifact does not match what was recorded about it.
    #[error("artifact corrupted: {message}")]
    Corrupted { message: String },

    #[error("artifact not found: {path}")]
    NotFound { path: String },
}

impl ArtifactError {
    pub fn transient(kind: TransientKind, message: impl Into<String>) -> Self {
        Self::Transient {
            kind,
            message: message.into(),
        }
    }

    pub fn corrupted(message: impl Into<String>) -> Self {
        Self::Corrupted {
            message: message.into(),
        }
    }

    /// Classify an I/O error by its kind.
    #[must_use]
    pub fn from_io_error(err: &std::io::Error, path: &str) -> Self {
        let message = err.to_string();
        match err.kind() {
            ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::BrokenPipe
            | ErrorKind::NotConnected => Self::transient(TransientKind::ConnectionReset, message),
            ErrorKind::TimedOut | ErrorKind::WouldBlock => {
                Self::transient(TransientKind::TimedOut, message)
            }
            ErrorKind::Interrupted => Self::transient(TransientKind::Interrupted, message),
            ErrorKind::NotFound => Self::NotFound {
                path: path.to_string(),
            },
            ErrorKind::UnexpectedEof | ErrorKind::InvalidData => Self::Corrupted { message },
            _ => Self::Persistent { message },
        }
    }

    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    /// Caller-facing error for this failure after `bytes_transferred` bytes.
    #[must_use]
    pub fn into_download_error(self, bytes_transferred: u64) -> DownloadError {
        match self {
            Self::Transient { kind, message } => DownloadError::NetworkInterrupted {
                bytes_transferred,
                message: format!("{kind}: {message}"),
            },
            Self::Persistent { message } => DownloadError::Storage { message },
            Self::NotFound { path } => DownloadError::Storage {
                message: format!("artifact missing at {path}"),
            },
            Self::Corrupted { message } => DownloadError::FileCorrupted { message },
        }
    }
}
