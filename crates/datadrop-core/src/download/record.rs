//! The durable download record and its lifecycle.
//!
//! ```text
//! pending ──begin──▶ in_progress ──complete──▶ completed
//!    ▲                  │  │
//!    │                  │  └──fail──────▶ failed ──┐
//!    │                  └─────interrupt──▶ interrupted
//!    └────────────reopen (retry)──────────────────┘
//! any non-terminal state past expires_at ──▶ expired
//! ```
//!
//! Transitions are pure; repositories persist them with a compare-and-set on
//! the status and revision the record was loaded with.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::{Compression, DatasetId, FileFormat, SubjectId};

/// Lifecycle status of a download record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Interrupted,
    Expired,
}

impl DownloadStatus {
    /// Convert to string representation for database storage.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Interrupted => "interrupted",
            Self::Expired => "expired",
        }
    }

    /// No further transfers will ever be served.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Expired)
    }

    /// The retry coordinator may reopen the record.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Failed | Self::Interrupted | Self::Expired)
    }

    /// A transfer may start from this status.
    #[must_use]
    pub const fn can_begin(&self) -> bool {
        matches!(self, Self::Pending | Self::Interrupted)
    }

    /// `completed_at` is set exactly in these statuses.
    #[must_use]
    pub const fn is_finished(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Expired)
    }
}

impl fmt::Display for DownloadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DownloadStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "in_progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "interrupted" => Ok(Self::Interrupted),
            "expired" => Ok(Self::Expired),
            other => Err(format!("unknown download status '{other}'")),
        }
    }
}

/// Illegal transition attempted on a record.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("cannot {action} a download that is {from}")]
    Illegal {
        action: &'static str,
        from: DownloadStatus,
    },

    #[error("progress may not go backwards ({current} -> {requested} bytes)")]
    ProgressRegressed { current: u64, requested: u64 },

    #[error("{bytes} bytes exceeds the artifact size of {total} bytes")]
    ExceedsSize { bytes: u64, total: u64 },
}

impl From<TransitionError> for super::DownloadError {
    fn from(err: TransitionError) -> Self {
        Self::validation(err.to_string())
    }
}

/// Client details captured when a transfer starts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
}

/// Durable per-attempt download entity, keyed by its token id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadRecord {
    pub id: Uuid,
    /// `jti` of the capability token bound to this record.
    pub token_id: Uuid,
    pub dataset_id: DatasetId,
    pub subject_id: Option<SubjectId>,
    pub format: FileFormat,
    pub compression: Option<Compression>,
    pub original_filename: String,
    pub file_size_bytes: Option<u64>,
    /// Byte offset reached so far; the resume point.
    pub bytes_transferred: u64,
    /// Offset the current attempt started from.
    pub resume_offset: u64,
    pub status: DownloadStatus,
    pub progress_percentage: f64,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_seconds: Option<f64>,
    pub transfer_rate_mbps: Option<f64>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub client: ClientMetadata,
    pub attempt_count: u32,
    /// Number of persisted writes. A copy whose revision no longer matches
    /// the stored one is stale and cannot be saved.
    #[serde(default)]
    pub revision: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DownloadRecord {
    /// Create a `pending` record for a freshly issued token.
    pub fn new(
        token_id: Uuid,
        dataset_id: DatasetId,
        format: FileFormat,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            token_id,
            dataset_id,
            subject_id: None,
            format,
            compression: None,
            original_filename: String::new(),
            file_size_bytes: None,
            bytes_transferred: 0,
            resume_offset: 0,
            status: DownloadStatus::Pending,
            progress_percentage: 0.0,
            started_at: None,
            completed_at: None,
            duration_seconds: None,
            transfer_rate_mbps: None,
            error_code: None,
            error_message: None,
            expires_at,
            client: ClientMetadata::default(),
            attempt_count: 1,
            revision: 0,
            created_at: now,
            updated_at: now,
        }
    }

    #[must_use]
    pub fn with_subject(mut self, subject_id: Option<SubjectId>) -> Self {
        self.subject_id = subject_id;
        self
    }

    #[must_use]
    pub const fn with_compression(mut self, compression: Option<Compression>) -> Self {
        self.compression = compression;
        self
    }

    #[must_use]
    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.original_filename = filename.into();
        self
    }

    #[must_use]
    pub const fn with_file_size(mut self, size: Option<u64>) -> Self {
        self.file_size_bytes = size;
        self
    }

    #[must_use]
    pub fn with_client(mut self, client: ClientMetadata) -> Self {
        self.client = client;
        self
    }

    /// Whether the attempt window has closed.
    #[must_use]
    pub fn is_past_expiry(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// A byte-range continuation from `bytes_transferred` is meaningful.
    #[must_use]
    pub const fn is_resumable(&self) -> bool {
        match self.status {
            DownloadStatus::Interrupted => true,
            DownloadStatus::Pending => self.bytes_transferred > 0,
            _ => false,
        }
    }

    /// Mark the record `expired` if its window closed. Returns whether it changed.
    pub fn expire_if_due(&mut self, now: DateTime<Utc>) -> bool {
        if self.status.is_terminal() || !self.is_past_expiry(now) {
            return false;
        }
        self.status = DownloadStatus::Expired;
        self.completed_at = Some(now);
        self.error_code = Some("TOKEN_EXPIRED".to_string());
        self.error_message = Some("Download window expired".to_string());
        self.updated_at = now;
        true
    }

    /// `pending|interrupted -> in_progress`, starting at `offset` of `total` bytes.
    pub fn begin(
        &mut self,
        offset: u64,
        total: u64,
        now: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        if !self.status.can_begin() {
            return Err(self.illegal("start"));
        }
        if offset > total {
            return Err(TransitionError::ExceedsSize {
                bytes: offset,
                total,
            });
        }
        self.status = DownloadStatus::InProgress;
        self.file_size_bytes = Some(total);
        self.bytes_transferred = offset;
        self.resume_offset = offset;
        self.progress_percentage = percentage(offset, total);
        self.started_at = Some(now);
        self.completed_at = None;
        self.duration_seconds = None;
        self.transfer_rate_mbps = None;
        self.error_code = None;
        self.error_message = None;
        self.updated_at = now;
        Ok(())
    }

    /// Record that the transfer reached `bytes`. Progress never goes backwards.
    pub fn advance(&mut self, bytes: u64, now: DateTime<Utc>) -> Result<(), TransitionError> {
        if self.status != DownloadStatus::InProgress {
            return Err(self.illegal("advance"));
        }
        if bytes < self.bytes_transferred {
            return Err(TransitionError::ProgressRegressed {
                current: self.bytes_transferred,
                requested: bytes,
            });
        }
        let total = self.file_size_bytes.unwrap_or(bytes);
        if bytes > total {
            return Err(TransitionError::ExceedsSize { bytes, total });
        }
        self.bytes_transferred = bytes;
        self.progress_percentage = percentage(bytes, total);
        self.updated_at = now;
        Ok(())
    }

    /// `in_progress -> completed`. Progress is forced to 100.
    #[allow(clippy::cast_precision_loss)]
    pub fn complete(&mut self, now: DateTime<Utc>) -> Result<(), TransitionError> {
        if self.status != DownloadStatus::InProgress {
            return Err(self.illegal("complete"));
        }
        let total = self.file_size_bytes.unwrap_or(self.bytes_transferred);
        self.status = DownloadStatus::Completed;
        self.bytes_transferred = total;
        self.progress_percentage = 100.0;
        self.completed_at = Some(now);

        let duration = self.attempt_elapsed(now);
        self.duration_seconds = Some(duration);
        let served = total.saturating_sub(self.resume_offset);
        self.transfer_rate_mbps = (duration > 0.0).then(|| megabits(served) / duration);
        self.updated_at = now;
        Ok(())
    }

    /// `in_progress -> interrupted`, keeping the byte offset for resumption.
    pub fn interrupt(
        &mut self,
        bytes: u64,
        message: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        if self.status != DownloadStatus::InProgress {
            return Err(self.illegal("interrupt"));
        }
        self.bytes_transferred = self.bytes_transferred.max(bytes);
        if let Some(total) = self.file_size_bytes {
            self.progress_percentage = percentage(self.bytes_transferred, total);
        }
        self.status = DownloadStatus::Interrupted;
        self.duration_seconds = Some(self.attempt_elapsed(now));
        self.error_code = Some("NETWORK_INTERRUPTED".to_string());
        self.error_message = Some(message.into());
        self.updated_at = now;
        Ok(())
    }

    /// `pending|in_progress|interrupted -> failed` for non-transient failures.
    ///
    /// An interrupted record fails when its artifact turns out to be unusable
    /// before the resumed transfer could start.
    pub fn fail(
        &mut self,
        code: &str,
        message: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        if !matches!(
            self.status,
            DownloadStatus::Pending | DownloadStatus::InProgress | DownloadStatus::Interrupted
        ) {
            return Err(self.illegal("fail"));
        }
        if self.started_at.is_some() {
            self.duration_seconds = Some(self.attempt_elapsed(now));
        }
        self.status = DownloadStatus::Failed;
        self.completed_at = Some(now);
        self.error_code = Some(code.to_string());
        self.error_message = Some(message.into());
        self.updated_at = now;
        Ok(())
    }

    /// `failed|interrupted|expired -> pending` with a fresh attempt window.
    ///
    /// Failed records restart from zero; interrupted and expired records keep
    /// their offset so the next transfer can resume.
    pub fn reopen(&mut self, ttl: Duration, now: DateTime<Utc>) -> Result<(), TransitionError> {
        if !self.status.is_retryable() {
            return Err(self.illegal("retry"));
        }
        if self.status == DownloadStatus::Failed {
            self.bytes_transferred = 0;
            self.progress_percentage = 0.0;
        }
        self.status = DownloadStatus::Pending;
        self.resume_offset = self.bytes_transferred;
        self.started_at = None;
        self.completed_at = None;
        self.duration_seconds = None;
        self.transfer_rate_mbps = None;
        self.error_code = None;
        self.error_message = None;
        self.expires_at = now + ttl;
        self.attempt_count += 1;
        self.updated_at = now;
        Ok(())
    }

    /// Seconds since the current attempt started.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn attempt_elapsed(&self, now: DateTime<Utc>) -> f64 {
        self.started_at
            .map_or(0.0, |start| (now - start).num_milliseconds().max(0) as f64 / 1000.0)
    }

    const fn illegal(&self, action: &'static str) -> TransitionError {
        TransitionError::Illegal {
            action,
            from: self.status,
        }
    }
}

/// Percentage of `total` covered by `bytes`, clamped to [0, 100].
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn percentage(bytes: u64, total: u64) -> f64 {
    if total == 0 {
        return 100.0;
    }
    ((bytes as f64 / total as f64) * 100.0).clamp(0.0, 100.0)
}

#[allow(clippy::cast_precision_loss)]
fn megabits(bytes: u64) -> f64 {
    bytes as f64 * 8.0 / 1_000_000.0
}
