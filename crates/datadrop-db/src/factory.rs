//! Composition utilities for wiring `SQLite` repositories.
//!
//! Construction only; no domain logic lives here.

use sqlx::SqlitePool;
use std::sync::Arc;

use datadrop_core::DownloadRecordRepository;

use crate::repositories::SqliteDownloadRecordRepository;

/// Factory for creating repository instances with `SQLite` backends.
pub struct CoreFactory;

impl CoreFactory {
    /// Create a download record repository from a pool.
    pub fn download_record_repository(pool: SqlitePool) -> Arc<SqliteDownloadRecordRepository> {
        Arc::new(SqliteDownloadRecordRepository::new(pool))
    }

    /// Same as [`Self::download_record_repository`], erased to the port trait.
    ///
    /// This is the recommended way for adapters to obtain the repository.
    pub fn build_record_port(pool: SqlitePool) -> Arc<dyn DownloadRecordRepository> {
        Self::download_record_repository(pool)
    }
}
