//! Row mapping helpers for `SQLite` queries.

use chrono::{DateTime, Utc};
use datadrop_core::{
    ClientMetadata, Compression, DatasetId, DownloadRecord, DownloadStatus, FileFormat,
    RepositoryError, SubjectId,
};
use sqlx::Row;
use uuid::Uuid;

/// Shared SELECT column list for record queries.
pub const RECORD_SELECT_COLUMNS: &str = "id, token_id, dataset_id, subject_id, format, compression, original_filename, file_size_bytes, bytes_transferred, resume_offset, status, progress_percentage, started_at, completed_at, duration_seconds, transfer_rate_mbps, error_code, error_message, expires_at, ip_address, user_agent, attempt_count, revision, created_at, updated_at";

/// Timestamps are stored as epoch milliseconds.
pub fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

pub fn from_millis(millis: i64) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| RepositoryError::Serialization(format!("timestamp out of range: {millis}")))
}

/// Byte counts are non-negative and fit in `i64` for any real artifact.
pub fn to_db_int(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn from_db_int(value: i64, column: &str) -> Result<u64, RepositoryError> {
    u64::try_from(value)
        .map_err(|_| RepositoryError::Serialization(format!("negative value in {column}: {value}")))
}

fn map_column_error(e: sqlx::Error) -> RepositoryError {
    RepositoryError::Storage(format!("Column read error: {e}"))
}

fn parse_uuid(raw: &str) -> Result<Uuid, RepositoryError> {
    Uuid::parse_str(raw).map_err(|e| RepositoryError::Serialization(format!("bad uuid '{raw}': {e}")))
}

/// Parse a database row into a `DownloadRecord`.
pub fn row_to_record(row: &sqlx::sqlite::SqliteRow) -> Result<DownloadRecord, RepositoryError> {
    let id: String = row.try_get("id").map_err(map_column_error)?;
    let token_id: String = row.try_get("token_id").map_err(map_column_error)?;
    let dataset_id: String = row.try_get("dataset_id").map_err(map_column_error)?;
    let subject_id: Option<String> = row.try_get("subject_id").map_err(map_column_error)?;
    let format: String = row.try_get("format").map_err(map_column_error)?;
    let compression: Option<String> = row.try_get("compression").map_err(map_column_error)?;
    let file_size_bytes: Option<i64> = row.try_get("file_size_bytes").map_err(map_column_error)?;
    let bytes_transferred: i64 = row.try_get("bytes_transferred").map_err(map_column_error)?;
    let resume_offset: i64 = row.try_get("resume_offset").map_err(map_column_error)?;
    let status: String = row.try_get("status").map_err(map_column_error)?;
    let started_at: Option<i64> = row.try_get("started_at").map_err(map_column_error)?;
    let completed_at: Option<i64> = row.try_get("completed_at").map_err(map_column_error)?;
    let expires_at: i64 = row.try_get("expires_at").map_err(map_column_error)?;
    let attempt_count: i64 = row.try_get("attempt_count").map_err(map_column_error)?;
    let revision: i64 = row.try_get("revision").map_err(map_column_error)?;
    let created_at: i64 = row.try_get("created_at").map_err(map_column_error)?;
    let updated_at: i64 = row.try_get("updated_at").map_err(map_column_error)?;

    Ok(DownloadRecord {
        id: parse_uuid(&id)?,
        token_id: parse_uuid(&token_id)?,
        dataset_id: DatasetId::new(dataset_id),
        subject_id: subject_id.map(SubjectId::new),
        format: format
            .parse::<FileFormat>()
            .map_err(RepositoryError::Serialization)?,
        compression: compression
            .map(|c| c.parse::<Compression>())
            .transpose()
            .map_err(RepositoryError::Serialization)?,
        original_filename: row.try_get("original_filename").map_err(map_column_error)?,
        file_size_bytes: file_size_bytes
            .map(|v| from_db_int(v, "file_size_bytes"))
            .transpose()?,
        bytes_transferred: from_db_int(bytes_transferred, "bytes_transferred")?,
        resume_offset: from_db_int(resume_offset, "resume_offset")?,
        status: status
            .parse::<DownloadStatus>()
            .map_err(RepositoryError::Serialization)?,
        progress_percentage: row.try_get("progress_percentage").map_err(map_column_error)?,
        started_at: started_at.map(from_millis).transpose()?,
        completed_at: completed_at.map(from_millis).transpose()?,
        duration_seconds: row.try_get("duration_seconds").map_err(map_column_error)?,
        transfer_rate_mbps: row.try_get("transfer_rate_mbps").map_err(map_column_error)?,
        error_code: row.try_get("error_code").map_err(map_column_error)?,
        error_message: row.try_get("error_message").map_err(map_column_error)?,
        expires_at: from_millis(expires_at)?,
        client: ClientMetadata {
            ip_address: row.try_get("ip_address").map_err(map_column_error)?,
            user_agent: row.try_get("user_agent").map_err(map_column_error)?,
        },
        attempt_count: u32::try_from(attempt_count).map_err(|_| {
            RepositoryError::Serialization(format!("bad attempt_count: {attempt_count}"))
        })?,
        revision: from_db_int(revision, "revision")?,
        created_at: from_millis(created_at)?,
        updated_at: from_millis(updated_at)?,
    })
}
