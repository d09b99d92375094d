//! The transfer engine: serves artifact bytes for a download token.
//!
//! `stream` does every check and the `pending|interrupted -> in_progress`
//! transition up front, so a caller either gets an error before any byte is
//! sent or a session whose body is fed by a spawned worker.
//!
//! # Structure
//!
//! - `disposition` - download filename and `Content-Disposition`
//! - `worker` - the per-transfer task

mod disposition;
mod worker;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use uuid::Uuid;

use datadrop_core::{
    ArtifactError, ArtifactStore, ByteRange, ClientMetadata, Clock, DatasetCatalog, DownloadError,
    DownloadRecord, DownloadRecordRepository, DownloadResult, DownloadSettings, DownloadStatus,
    RangeRequest,
};

use crate::lookup::{load_current, storage_error};
use crate::progress::LiveProgressRegistry;
use crate::token::TokenIssuer;

pub use disposition::{artifact_extension, content_disposition, download_filename};
pub use worker::{BodyChunk, TransferOutcome};

use worker::{TransferJob, WorkerDeps, run_job};

/// Collaborators of the transfer engine.
#[derive(Clone)]
pub struct EngineDeps {
    pub issuer: Arc<TokenIssuer>,
    pub repo: Arc<dyn DownloadRecordRepository>,
    pub catalog: Arc<dyn DatasetCatalog>,
    pub store: Arc<dyn ArtifactStore>,
    pub live: Arc<LiveProgressRegistry>,
    pub clock: Arc<dyn Clock>,
}

/// Response metadata of a started transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferMeta {
    pub download_id: Uuid,
    pub filename: String,
    pub range: ByteRange,
    pub started_at: DateTime<Utc>,
}

impl TransferMeta {
    /// Response headers, in a transport-neutral form.
    pub fn headers(&self) -> Vec<(&'static str, String)> {
        let mut headers = vec![
            ("Accept-Ranges", "bytes".to_string()),
            ("Content-Disposition", content_disposition(&self.filename)),
            ("Content-Length", self.range.len().to_string()),
        ];
        if let Some(content_range) = self.range.content_range() {
            headers.push(("Content-Range", content_range));
        }
        headers.push(("X-Download-Id", self.download_id.to_string()));
        headers.push(("X-Download-Time", self.started_at.to_rfc3339()));
        headers
    }
}

/// Handle to the worker feeding a session's body.
///
/// Dropping it detaches the worker; the transfer carries on.
pub struct TransferHandle {
    join: JoinHandle<TransferOutcome>,
}

impl TransferHandle {
    /// Wait until the worker has persisted the outcome.
    pub async fn finished(self) -> TransferOutcome {
        self.join.await.unwrap_or_else(|err| {
            tracing::error!(target: "datadrop.transfer", error = %err, "transfer worker panicked");
            TransferOutcome::Failed {
                code: "DOWNLOAD_FAILED",
            }
        })
    }
}

/// A transfer in flight: headers, body and worker handle.
pub struct TransferSession {
    pub meta: TransferMeta,
    pub body: ReceiverStream<BodyChunk>,
    pub handle: TransferHandle,
}

/// Serves bytes for validated tokens.
pub struct TransferEngine {
    deps: EngineDeps,
    settings: DownloadSettings,
    shutdown: CancellationToken,
    tasks: TaskTracker,
}

impl TransferEngine {
    pub fn new(deps: EngineDeps, settings: DownloadSettings) -> Self {
        Self {
            deps,
            settings,
            shutdown: CancellationToken::new(),
            tasks: TaskTracker::new(),
        }
    }

    /// Start serving the artifact behind `token`.
    ///
    /// `range` is the raw `Range` header. Ranges that cannot be honoured are
    /// logged and the whole artifact is served instead.
    pub async fn stream(
        &self,
        token: &str,
        range: Option<&str>,
        client: ClientMetadata,
    ) -> DownloadResult<TransferSession> {
        if self.shutdown.is_cancelled() {
            return Err(DownloadError::failed("server is shutting down"));
        }
        let claims = self.deps.issuer.validate_structure(token)?;
        let now = self.deps.clock.now();
        let mut record = load_current(self.deps.repo.as_ref(), &claims.jti, now).await?;

        match record.status {
            DownloadStatus::Pending | DownloadStatus::Interrupted => {}
            DownloadStatus::Expired => {
                return Err(DownloadError::TokenExpired {
                    expired_at: record.expires_at,
                });
            }
            DownloadStatus::Completed => {
                return Err(DownloadError::AlreadyCompleted {
                    completed_at: record.completed_at,
                });
            }
            DownloadStatus::InProgress => return Err(DownloadError::TransferInProgress),
            DownloadStatus::Failed => {
                return Err(DownloadError::failed(
                    "the previous attempt failed; retry the download first",
                ));
            }
        }

        let dataset = self
            .deps
            .catalog
            .get_dataset(&record.dataset_id)
            .await
            .map_err(|e| DownloadError::storage(format!("dataset catalog: {e}")))?
            .ok_or_else(|| DownloadError::DatasetNotFound {
                dataset_id: record.dataset_id.to_string(),
            })?;
        let Some(artifact_path) = dataset.artifact_path.clone() else {
            let err = ArtifactError::Persistent {
                message: format!("dataset {} has no materialized artifact", dataset.id),
            };
            return Err(self.settle_early_failure(&mut record, err).await);
        };

        let meta = match self.deps.store.stat(&artifact_path).await {
            Ok(meta) => meta,
            Err(err) => return Err(self.settle_early_failure(&mut record, err).await),
        };
        let span = resolve_range(range, meta.size, &claims.jti);

        // pending|interrupted -> in_progress; losing the race means another
        // request started (or expired) this record first.
        let loaded_status = record.status;
        record.begin(span.start, span.total, now)?;
        if client != ClientMetadata::default() {
            record.client = client;
        }
        if !self
            .deps
            .repo
            .save_transition(&mut record, loaded_status)
            .await
            .map_err(storage_error)?
        {
            return Err(DownloadError::TransferInProgress);
        }

        let chunks = match self.deps.store.open_for_read(&artifact_path, span.start).await {
            Ok(chunks) => chunks,
            Err(err) => return Err(self.settle_early_failure(&mut record, err).await),
        };

        tracing::info!(
            target: "datadrop.transfer",
            token_id = %claims.jti,
            dataset_id = %record.dataset_id,
            start = span.start,
            total = span.total,
            partial = span.partial,
            attempt = record.attempt_count,
            "transfer started"
        );

        let (tx, rx) = mpsc::channel(self.settings.channel_capacity.max(1));
        let live = self.deps.live.register(claims.jti, span.start, span.total);
        let meta = TransferMeta {
            download_id: record.id,
            filename: download_filename(&dataset.name, &artifact_path, record.format),
            range: span,
            started_at: now,
        };
        let job = TransferJob {
            record,
            range: span,
            chunks,
            tx,
            live,
            cancel: self.shutdown.child_token(),
        };
        let worker_deps = WorkerDeps {
            repo: Arc::clone(&self.deps.repo),
            clock: Arc::clone(&self.deps.clock),
            idle_timeout: self.settings.idle_timeout(),
            persist_interval: self.settings.progress_persist_interval(),
        };
        let join = self
            .tasks
            .spawn(async move { run_job(job, &worker_deps).await });

        Ok(TransferSession {
            meta,
            body: ReceiverStream::new(rx),
            handle: TransferHandle { join },
        })
    }

    /// Number of transfers currently running.
    pub fn active_transfers(&self) -> usize {
        self.tasks.len()
    }

    /// Cancel every running transfer and wait for the workers to record
    /// their records as `interrupted`.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.tasks.close();
        self.tasks.wait().await;
        tracing::info!(target: "datadrop.transfer", "transfer engine stopped");
    }

    /// Record a failure that happened before the worker took over.
    ///
    /// Storage problems fail the record; transient problems leave it as it was
    /// (or interrupt it, once it is already `in_progress`).
    async fn settle_early_failure(
        &self,
        record: &mut DownloadRecord,
        err: ArtifactError,
    ) -> DownloadError {
        let now = self.deps.clock.now();
        let expected = record.status;
        let error = err.clone().into_download_error(record.bytes_transferred);

        let changed = if err.is_transient() {
            expected == DownloadStatus::InProgress
                && record
                    .interrupt(record.bytes_transferred, err.to_string(), now)
                    .is_ok()
        } else {
            record.fail(error.code(), error.to_string(), now).is_ok()
        };
        if changed {
            if let Err(repo_err) = self.deps.repo.save_transition(record, expected).await {
                tracing::error!(target: "datadrop.transfer", error = %repo_err, "failed to record transfer failure");
            }
        }

        tracing::warn!(
            target: "datadrop.transfer",
            token_id = %record.token_id,
            code = error.code(),
            error = %err,
            "transfer could not start"
        );
        error
    }
}

/// Resolve a `Range` header against the artifact size, falling back to the
/// full artifact.
fn resolve_range(header: Option<&str>, size: u64, token_id: &Uuid) -> ByteRange {
    let Some(raw) = header else {
        return ByteRange::full(size);
    };
    match RangeRequest::parse(raw).and_then(|r| r.resolve(size)) {
        Ok(span) => span,
        Err(rejection) => {
            tracing::warn!(
                target: "datadrop.transfer",
                token_id = %token_id,
                range = raw,
                %rejection,
                "range not honoured, serving the full artifact"
            );
            ByteRange::full(size)
        }
    }
}
