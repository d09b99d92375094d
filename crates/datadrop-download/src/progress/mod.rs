//! Progress tracking for download tokens.
//!
//! Readers get a [`ProgressSnapshot`] built from the persisted record, with the
//! byte offset overlaid from the live channel of a transfer running in this
//! process. Persisted progress lags by at most the persist interval.

mod live;
mod throttle;

use std::sync::Arc;

use datadrop_core::{
    Clock, DownloadError, DownloadRecordRepository, DownloadResult, ProgressSnapshot,
};

use crate::lookup::load_current;
use crate::token::TokenIssuer;

pub use live::{LiveProgress, LiveProgressRegistry, ProgressUpdate};
pub use throttle::ProgressThrottle;

/// Path callers use to reopen a failed, interrupted or expired download.
pub fn retry_endpoint(token: &str) -> String {
    format!("/api/downloads/{token}/retry")
}

/// Answers "how far along is this token?".
pub struct ProgressTracker {
    issuer: Arc<TokenIssuer>,
    repo: Arc<dyn DownloadRecordRepository>,
    live: Arc<LiveProgressRegistry>,
    clock: Arc<dyn Clock>,
}

impl ProgressTracker {
    pub fn new(
        issuer: Arc<TokenIssuer>,
        repo: Arc<dyn DownloadRecordRepository>,
        live: Arc<LiveProgressRegistry>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            issuer,
            repo,
            live,
            clock,
        }
    }

    /// Current progress of the download behind `token`.
    ///
    /// Tokens past their signed lifetime can still be inspected. Tokens that
    /// fail signature checks are reported as unknown downloads.
    pub async fn get_progress(&self, token: &str) -> DownloadResult<ProgressSnapshot> {
        let claims = self.issuer.inspect(token).map_err(|err| match err {
            DownloadError::TokenInvalid { .. } => DownloadError::DownloadNotFound,
            other => other,
        })?;

        let now = self.clock.now();
        let record = load_current(self.repo.as_ref(), &claims.jti, now).await?;
        let live_bytes = self.live.current(&claims.jti).map(|p| p.transferred);

        Ok(ProgressSnapshot::from_record(
            &record,
            live_bytes,
            Some(retry_endpoint(token)),
            now,
        ))
    }
}
