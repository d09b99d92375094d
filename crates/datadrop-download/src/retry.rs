//! Reopening failed, interrupted and expired downloads without a new token.

use std::sync::Arc;

use chrono::Duration;
use serde::Serialize;

use datadrop_core::{
    Clock, DownloadError, DownloadRecordRepository, DownloadResult, DownloadStatus,
};

use crate::lookup::{load_current, storage_error};
use crate::token::TokenIssuer;

/// Result of a retry request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RetryOutcome {
    pub status: DownloadStatus,
    /// Whether the next transfer can resume from a non-zero offset.
    pub retryable: bool,
    pub resume_offset: u64,
}

/// Moves retryable records back to `pending` with a fresh attempt window.
pub struct RetryCoordinator {
    issuer: Arc<TokenIssuer>,
    repo: Arc<dyn DownloadRecordRepository>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
}

impl RetryCoordinator {
    pub fn new(
        issuer: Arc<TokenIssuer>,
        repo: Arc<dyn DownloadRecordRepository>,
        clock: Arc<dyn Clock>,
        ttl: Duration,
    ) -> Self {
        Self {
            issuer,
            repo,
            clock,
            ttl,
        }
    }

    /// Reopen the download behind `token`.
    ///
    /// The new attempt window never extends past the lifetime signed into the
    /// token; once that has passed a new download must be initiated.
    pub async fn retry(&self, token: &str) -> DownloadResult<RetryOutcome> {
        let claims = self.issuer.inspect(token)?;
        let now = self.clock.now();
        let mut record = load_current(self.repo.as_ref(), &claims.jti, now).await?;

        if !record.status.is_retryable() {
            return Err(DownloadError::NotRetryable {
                status: record.status,
            });
        }
        if claims.is_expired_at(now) {
            return Err(DownloadError::TokenExpired {
                expired_at: claims.expires_at(),
            });
        }

        let ttl = self.ttl.min(claims.expires_at() - now);
        let loaded_status = record.status;
        record.reopen(ttl, now)?;

        if !self
            .repo
            .save_transition(&mut record, loaded_status)
            .await
            .map_err(storage_error)?
        {
            // Someone else moved the record first; report what it is now.
            let current = self
                .repo
                .find_by_token(&claims.jti)
                .await
                .map_err(storage_error)?
                .ok_or(DownloadError::DownloadNotFound)?;
            return Err(DownloadError::NotRetryable {
                status: current.status,
            });
        }

        tracing::info!(
            target: "datadrop.transfer",
            token_id = %claims.jti,
            from = %loaded_status,
            resume_offset = record.resume_offset,
            attempt = record.attempt_count,
            expires_at = %record.expires_at,
            "download reopened"
        );

        Ok(RetryOutcome {
            status: record.status,
            retryable: record.is_resumable(),
            resume_offset: record.resume_offset,
        })
    }
}
