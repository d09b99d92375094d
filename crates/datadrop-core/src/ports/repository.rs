//! Download record repository port definition.
//!
//! Records are keyed by the token id they are bound to. Every state change is
//! persisted with a compare-and-set on the status and revision the caller
//! loaded, which is the single serialization point for concurrent requests
//! against one token.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::RepositoryError;
use crate::download::{DownloadRecord, DownloadStatus};

/// Port for durable download records.
///
/// This trait is implemented by `datadrop-db` and injected into the download
/// service. Records are never hard-deleted.
#[async_trait]
pub trait DownloadRecordRepository: Send + Sync {
    /// Persist a freshly created record.
    ///
    /// Fails with `AlreadyExists` if a record for the same token exists.
    async fn insert(&self, record: &DownloadRecord) -> Result<(), RepositoryError>;

    /// Load the record bound to a token id.
    async fn find_by_token(&self, token_id: &Uuid) -> Result<Option<DownloadRecord>, RepositoryError>;

    /// Write `record` only if the stored status is still `expected` and the
    /// stored revision is still `record.revision`.
    ///
    /// On success `record.revision` is advanced to the stored one. Returns
    /// `false` when another writer changed the record first, even if it has
    /// since returned to the same status.
    async fn save_transition(
        &self,
        record: &mut DownloadRecord,
        expected: DownloadStatus,
    ) -> Result<bool, RepositoryError>;

    /// Mark `pending`/`in_progress` records whose window closed before `now`
    /// as `expired`, bumping their revision. Returns the number of records changed.
    async fn expire_due(&self, now: DateTime<Utc>) -> Result<u64, RepositoryError>;

    /// Mark `in_progress` records not updated since `stale_before` as
    /// `interrupted`, bumping their revision. Returns the number of records changed.
    async fn interrupt_stale(
        &self,
        stale_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<u64, RepositoryError>;
}
