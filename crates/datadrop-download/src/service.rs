//! The download service: one facade over validation, tokens, transfers,
//! progress, retries and retention.
//!
//! Adapters (HTTP, CLI) talk to this type only. It owns the long-lived pieces
//! (rate limiter, live progress registry, worker tracker) and wires the
//! collaborator ports into them.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use datadrop_core::{
    ArtifactStore, ClientMetadata, Clock, Compression, DatasetCatalog, DownloadError,
    DownloadRecord, DownloadRecordRepository, DownloadResult, DownloadSettings, FileFormat,
    PolicyOracle, ProgressSnapshot, RepositoryError, Subject, SubjectDirectory, SubjectId,
};

use crate::lookup::storage_error;
use crate::progress::{LiveProgressRegistry, ProgressTracker};
use crate::rate_limit::WindowedRateLimiter;
use crate::retention::{RetentionSweeper, SweepReport};
use crate::retry::{RetryCoordinator, RetryOutcome};
use crate::token::{TokenConfigError, TokenGrant, TokenIssuer};
use crate::transfer::{EngineDeps, TransferEngine, TransferSession, download_filename};
use crate::validator::{DownloadRequest, RequestValidator};

/// Collaborator ports the service is built from.
#[derive(Clone)]
pub struct ServiceDeps {
    pub repo: Arc<dyn DownloadRecordRepository>,
    pub oracle: Arc<dyn PolicyOracle>,
    pub catalog: Arc<dyn DatasetCatalog>,
    pub directory: Arc<dyn SubjectDirectory>,
    pub store: Arc<dyn ArtifactStore>,
    pub clock: Arc<dyn Clock>,
}

/// Answer to a successful download request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InitiatedDownload {
    pub token: String,
    pub download_id: Uuid,
    /// End of the attempt window.
    pub expires_at: DateTime<Utc>,
    pub estimated_size_bytes: Option<u64>,
    pub filename: String,
    pub format: FileFormat,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compression: Option<Compression>,
}

pub struct DownloadService {
    validator: RequestValidator,
    issuer: Arc<TokenIssuer>,
    repo: Arc<dyn DownloadRecordRepository>,
    directory: Arc<dyn SubjectDirectory>,
    clock: Arc<dyn Clock>,
    engine: TransferEngine,
    tracker: ProgressTracker,
    retries: RetryCoordinator,
    sweeper: Arc<RetentionSweeper>,
    settings: DownloadSettings,
}

impl DownloadService {
    /// Wire the service. Fails only when the token secret is unusable.
    pub fn new(
        deps: ServiceDeps,
        settings: DownloadSettings,
        token_secret: &[u8],
    ) -> Result<Self, TokenConfigError> {
        let issuer = Arc::new(TokenIssuer::new(
            token_secret,
            settings.token_max_lifetime(),
            Arc::clone(&deps.clock),
        )?);
        let limiter = Arc::new(WindowedRateLimiter::new(Arc::clone(&deps.clock)));
        let live = Arc::new(LiveProgressRegistry::new());

        let validator = RequestValidator::new(
            Arc::clone(&deps.catalog),
            Arc::clone(&deps.oracle),
            limiter,
        );
        let engine = TransferEngine::new(
            EngineDeps {
                issuer: Arc::clone(&issuer),
                repo: Arc::clone(&deps.repo),
                catalog: Arc::clone(&deps.catalog),
                store: Arc::clone(&deps.store),
                live: Arc::clone(&live),
                clock: Arc::clone(&deps.clock),
            },
            settings.clone(),
        );
        let tracker = ProgressTracker::new(
            Arc::clone(&issuer),
            Arc::clone(&deps.repo),
            live,
            Arc::clone(&deps.clock),
        );
        let retries = RetryCoordinator::new(
            Arc::clone(&issuer),
            Arc::clone(&deps.repo),
            Arc::clone(&deps.clock),
            settings.token_ttl_chrono(),
        );
        let sweeper = Arc::new(RetentionSweeper::new(
            Arc::clone(&deps.repo),
            Arc::clone(&deps.clock),
            settings.stale_transfer_after(),
        ));

        Ok(Self {
            validator,
            issuer,
            repo: deps.repo,
            directory: deps.directory,
            clock: deps.clock,
            engine,
            tracker,
            retries,
            sweeper,
            settings,
        })
    }

    pub const fn settings(&self) -> &DownloadSettings {
        &self.settings
    }

    /// Resolve a caller id. Missing or unknown ids are served as anonymous.
    pub async fn resolve_subject(&self, subject_id: Option<&str>) -> DownloadResult<Subject> {
        let Some(raw) = subject_id.map(str::trim).filter(|s| !s.is_empty()) else {
            return Ok(Subject::anonymous());
        };
        let id = SubjectId::new(raw);
        match self.directory.find_subject(&id).await {
            Ok(Some(subject)) => Ok(subject),
            Ok(None) => {
                tracing::warn!(target: "datadrop.validation", subject_id = %id, "unknown subject, treating as anonymous");
                Ok(Subject::anonymous())
            }
            Err(err) => {
                tracing::warn!(target: "datadrop.validation", error = %err, "subject directory failed");
                Err(DownloadError::validation(err.to_string()))
            }
        }
    }

    /// Validate a request, mint its token and create the `pending` record.
    pub async fn initiate(
        &self,
        request: DownloadRequest,
        client: ClientMetadata,
    ) -> DownloadResult<InitiatedDownload> {
        let validated = self.validator.validate(&request).await?;
        let dataset = &validated.dataset;

        let grant = TokenGrant {
            dataset_id: dataset.id.clone(),
            subject_id: request.subject.id.clone(),
            format: request.format,
            compression: request.compression,
        };
        let issued = match self.issuer.issue(grant, self.settings.token_ttl()) {
            Ok(issued) => issued,
            Err(err) => {
                self.validator.release(&validated);
                return Err(err);
            }
        };

        let now = self.clock.now();
        let filename = download_filename(
            &dataset.name,
            dataset.artifact_path.as_deref().unwrap_or_default(),
            request.format,
        );
        let record = DownloadRecord::new(
            issued.claims.jti,
            dataset.id.clone(),
            request.format,
            now + self.settings.token_ttl_chrono(),
            now,
        )
        .with_subject(request.subject.id.clone())
        .with_compression(request.compression)
        .with_filename(filename.clone())
        .with_file_size(dataset.size_bytes)
        .with_client(client);

        if let Err(err) = self.repo.insert(&record).await {
            // Nothing was handed out, so the request does not count.
            self.validator.release(&validated);
            return Err(match err {
                RepositoryError::AlreadyExists(_) => DownloadError::failed("token collision"),
                other => storage_error(other),
            });
        }

        tracing::info!(
            target: "datadrop.token",
            token_id = %record.token_id,
            dataset_id = %record.dataset_id,
            subject_id = record.subject_id.as_ref().map_or("anonymous", |s| s.as_str()),
            format = %record.format,
            "download initiated"
        );

        Ok(InitiatedDownload {
            token: issued.token,
            download_id: record.id,
            expires_at: record.expires_at,
            estimated_size_bytes: dataset.size_bytes,
            filename,
            format: record.format,
            compression: record.compression,
        })
    }

    /// Start serving the artifact behind `token`.
    pub async fn execute(
        &self,
        token: &str,
        range: Option<&str>,
        client: ClientMetadata,
    ) -> DownloadResult<TransferSession> {
        self.engine.stream(token, range, client).await
    }

    pub async fn progress(&self, token: &str) -> DownloadResult<ProgressSnapshot> {
        self.tracker.get_progress(token).await
    }

    pub async fn retry(&self, token: &str) -> DownloadResult<RetryOutcome> {
        self.retries.retry(token).await
    }

    /// Check a token without touching storage.
    pub fn is_token_valid(&self, token: &str) -> bool {
        self.issuer.is_structurally_valid(token)
    }

    pub async fn sweep(&self) -> Result<SweepReport, RepositoryError> {
        self.sweeper.sweep_once().await
    }

    /// Run the retention sweeper in the background until `cancel` fires.
    pub fn spawn_sweeper(&self, cancel: CancellationToken) -> JoinHandle<()> {
        Arc::clone(&self.sweeper).spawn(self.settings.sweep_interval(), cancel)
    }

    pub fn active_transfers(&self) -> usize {
        self.engine.active_transfers()
    }

    /// Interrupt every running transfer and wait for the workers to settle.
    pub async fn shutdown(&self) {
        self.engine.shutdown().await;
    }
}
