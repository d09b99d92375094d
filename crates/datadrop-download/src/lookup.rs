//! Record lookup shared by every token-facing operation.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use datadrop_core::{DownloadError, DownloadRecord, DownloadRecordRepository, DownloadResult, RepositoryError};

/// Map a repository failure to the caller-facing storage error.
pub fn storage_error(err: RepositoryError) -> DownloadError {
    tracing::error!(target: "datadrop.transfer", error = %err, "download record store failed");
    DownloadError::storage(err.to_string())
}

/// Load the record for `token_id`, expiring it first if its window closed.
///
/// Expiry is persisted with a compare-and-set; if another caller changed the
/// record meanwhile, the fresh state is returned instead.
pub async fn load_current(
    repo: &dyn DownloadRecordRepository,
    token_id: &Uuid,
    now: DateTime<Utc>,
) -> DownloadResult<DownloadRecord> {
    let mut record = repo
        .find_by_token(token_id)
        .await
        .map_err(storage_error)?
        .ok_or(DownloadError::DownloadNotFound)?;

    let loaded_status = record.status;
    if record.expire_if_due(now) {
        if repo
            .save_transition(&mut record, loaded_status)
            .await
            .map_err(storage_error)?
        {
            tracing::info!(
                target: "datadrop.transfer",
                token_id = %token_id,
                from = %loaded_status,
                "download window closed, record expired"
            );
        } else {
            record = repo
                .find_by_token(token_id)
                .await
                .map_err(storage_error)?
                .ok_or(DownloadError::DownloadNotFound)?;
        }
    }
    Ok(record)
}
