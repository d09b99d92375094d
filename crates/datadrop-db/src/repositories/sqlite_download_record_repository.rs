//! `SQLite` implementation of the `DownloadRecordRepository` trait.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use datadrop_core::{DownloadRecord, DownloadRecordRepository, DownloadStatus, RepositoryError};

use super::row_mappers::{RECORD_SELECT_COLUMNS, row_to_record, to_db_int, to_millis};

/// `SQLite` implementation of the `DownloadRecordRepository` trait.
///
/// Every status change goes through a conditional
/// `UPDATE ... WHERE status = ? AND revision = ?` so two requests racing on one
/// token cannot both win, and a writer holding a copy from an earlier attempt
/// cannot overwrite a later one.
pub struct SqliteDownloadRecordRepository {
    pool: SqlitePool,
}

impl SqliteDownloadRecordRepository {
    /// Create a new `SQLite` download record repository.
    pub const fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Get a reference to the underlying pool (for testing only).
    #[cfg(test)]
    pub const fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl DownloadRecordRepository for SqliteDownloadRecordRepository {
    async fn insert(&self, record: &DownloadRecord) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            r"
            INSERT INTO download_records (
                id, token_id, dataset_id, subject_id, format, compression,
                original_filename, file_size_bytes, bytes_transferred, resume_offset,
                status, progress_percentage, started_at, completed_at,
                duration_seconds, transfer_rate_mbps, error_code, error_message,
                expires_at, ip_address, user_agent, attempt_count, revision, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ",
        )
        .bind(record.id.to_string())
        .bind(record.token_id.to_string())
        .bind(record.dataset_id.as_str())
        .bind(record.subject_id.as_ref().map(|s| s.as_str().to_string()))
        .bind(record.format.as_str())
        .bind(record.compression.map(|c| c.as_str()))
        .bind(&record.original_filename)
        .bind(record.file_size_bytes.map(to_db_int))
        .bind(to_db_int(record.bytes_transferred))
        .bind(to_db_int(record.resume_offset))
        .bind(record.status.as_str())
        .bind(record.progress_percentage)
        .bind(record.started_at.map(to_millis))
        .bind(record.completed_at.map(to_millis))
        .bind(record.duration_seconds)
        .bind(record.transfer_rate_mbps)
        .bind(&record.error_code)
        .bind(&record.error_message)
        .bind(to_millis(record.expires_at))
        .bind(&record.client.ip_address)
        .bind(&record.client.user_agent)
        .bind(i64::from(record.attempt_count))
        .bind(to_db_int(record.revision))
        .bind(to_millis(record.created_at))
        .bind(to_millis(record.updated_at))
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => Err(
                RepositoryError::AlreadyExists(format!("Download record for token '{}'", record.token_id)),
            ),
            Err(e) => Err(RepositoryError::Storage(e.to_string())),
        }
    }

    async fn find_by_token(&self, token_id: &Uuid) -> Result<Option<DownloadRecord>, RepositoryError> {
        let sql = format!("SELECT {RECORD_SELECT_COLUMNS} FROM download_records WHERE token_id = ?");
        let row = sqlx::query(&sql)
            .bind(token_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| RepositoryError::Storage(e.to_string()))?;

        row.as_ref().map(row_to_record).transpose()
    }

    async fn save_transition(
        &self,
        record: &mut DownloadRecord,
        expected: DownloadStatus,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            r"
            UPDATE download_records SET
                file_size_bytes = ?,
                bytes_transferred = ?,
                resume_offset = ?,
                status = ?,
                progress_percentage = ?,
                started_at = ?,
                completed_at = ?,
                duration_seconds = ?,
                transfer_rate_mbps = ?,
                error_code = ?,
                error_message = ?,
                expires_at = ?,
                ip_address = ?,
                user_agent = ?,
                attempt_count = ?,
                revision = revision + 1,
                updated_at = ?
            WHERE token_id = ? AND status = ? AND revision = ?
            ",
        )
        .bind(record.file_size_bytes.map(to_db_int))
        .bind(to_db_int(record.bytes_transferred))
        .bind(to_db_int(record.resume_offset))
        .bind(record.status.as_str())
        .bind(record.progress_percentage)
        .bind(record.started_at.map(to_millis))
        .bind(record.completed_at.map(to_millis))
        .bind(record.duration_seconds)
        .bind(record.transfer_rate_mbps)
        .bind(&record.error_code)
        .bind(&record.error_message)
        .bind(to_millis(record.expires_at))
        .bind(&record.client.ip_address)
        .bind(&record.client.user_agent)
        .bind(i64::from(record.attempt_count))
        .bind(to_millis(record.updated_at))
        .bind(record.token_id.to_string())
        .bind(expected.as_str())
        .bind(to_db_int(record.revision))
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryError::Storage(e.to_string()))?;

        if result.rows_affected() != 1 {
            return Ok(false);
        }
        record.revision += 1;
        Ok(true)
    }

    async fn expire_due(&self, now: DateTime<Utc>) -> Result<u64, RepositoryError> {
        let now = to_millis(now);
        let result = sqlx::query(
            r"
            UPDATE download_records
            SET status = 'expired',
                completed_at = ?,
                error_code = 'TOKEN_EXPIRED',
                error_message = 'Download window expired',
                revision = revision + 1,
                updated_at = ?
            WHERE status IN ('pending', 'in_progress') AND expires_at <= ?
            ",
        )
        .bind(now)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryError::Storage(e.to_string()))?;

        Ok(result.rows_affected())
    }

    async fn interrupt_stale(
        &self,
        stale_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<u64, RepositoryError> {
        let result = sqlx::query(
            r"
            UPDATE download_records
            SET status = 'interrupted',
                error_code = 'NETWORK_INTERRUPTED',
                error_message = 'Transfer stalled without progress',
                revision = revision + 1,
                updated_at = ?
            WHERE status = 'in_progress' AND updated_at < ?
            ",
        )
        .bind(to_millis(now))
        .bind(to_millis(stale_before))
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryError::Storage(e.to_string()))?;

        Ok(result.rows_affected())
    }
}
