//! Database setup and initialization.
//!
//! Entry points call [`setup_database`] with the resolved database path.

use anyhow::Result;
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode};
use std::path::Path;
use std::time::Duration;

/// Sets up the `SQLite` database connection and ensures the schema exists.
///
/// This function:
/// 1. Creates the parent directory and database file if they don't exist
/// 2. Enables WAL so progress writes don't block readers
/// 3. Creates the `download_records` table and its indexes
///
/// # Example
///
/// ```rust,no_run
/// use datadrop_db::setup_database;
/// use std::path::Path;
///
/// # async fn example() -> anyhow::Result<()> {
/// let pool = setup_database(Path::new("/var/lib/datadrop/datadrop.db")).await?;
/// # Ok(())
/// # }
/// ```
pub async fn setup_database(db_path: &Path) -> Result<SqlitePool> {
    // Ensure parent directory exists
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let pool = SqlitePool::connect_with(
        SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5)),
    )
    .await?;

    create_schema(&pool).await?;

    tracing::debug!(target: "datadrop.db", path = %db_path.display(), "database ready");
    Ok(pool)
}

/// Sets up an in-memory `SQLite` database for testing.
///
/// A single long-lived connection is used: every `sqlite::memory:`
/// connection would otherwise see its own empty database.
#[cfg(any(test, feature = "test-utils"))]
pub async fn setup_test_database() -> Result<SqlitePool> {
    use sqlx::sqlite::SqlitePoolOptions;

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await?;
    create_schema(&pool).await?;
    Ok(pool)
}

/// Creates the complete database schema.
///
/// Safe to call multiple times as all operations use IF NOT EXISTS.
/// Timestamps are epoch milliseconds so range comparisons stay numeric.
async fn create_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS download_records (
            id TEXT PRIMARY KEY NOT NULL,
            token_id TEXT NOT NULL UNIQUE,
            dataset_id TEXT NOT NULL,
            subject_id TEXT,
            format TEXT NOT NULL,
            compression TEXT,
            original_filename TEXT NOT NULL,
            file_size_bytes INTEGER,
            bytes_transferred INTEGER NOT NULL DEFAULT 0,
            resume_offset INTEGER NOT NULL DEFAULT 0,
            status TEXT NOT NULL DEFAULT 'pending'
                CHECK (status IN ('pending', 'in_progress', 'completed', 'failed', 'interrupted', 'expired')),
            progress_percentage REAL NOT NULL DEFAULT 0
                CHECK (progress_percentage >= 0 AND progress_percentage <= 100),
            started_at INTEGER,
            completed_at INTEGER,
            duration_seconds REAL,
            transfer_rate_mbps REAL,
            error_code TEXT,
            error_message TEXT,
            expires_at INTEGER NOT NULL,
            ip_address TEXT,
            user_agent TEXT,
            attempt_count INTEGER NOT NULL DEFAULT 1,
            revision INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        ",
    )
    .execute(pool)
    .await?;

    // Per-dataset history
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_download_records_dataset ON download_records(dataset_id, created_at)",
    )
    .execute(pool)
    .await?;

    // Per-subject history
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_download_records_subject ON download_records(subject_id, created_at)",
    )
    .execute(pool)
    .await?;

    // Retention sweeps scan by status and deadline
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_download_records_sweep ON download_records(status, expires_at, updated_at)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn schema_setup_is_idempotent() {
        let pool = setup_test_database().await.unwrap();
        create_schema(&pool).await.unwrap();

        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM download_records")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count.0, 0);
    }

    #[tokio::test]
    async fn file_database_is_created_with_parents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("datadrop.db");
        let pool = setup_database(&path).await.unwrap();
        assert!(path.exists());
        pool.close().await;
    }
}
