//! Shared fixtures for datadrop-download integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use futures_util::StreamExt;
use tempfile::TempDir;

use datadrop_core::{
    ArtifactStore, ClientMetadata, Dataset, DatasetId, DatasetSource, DownloadRecordRepository,
    DownloadSettings, FileFormat, FileType, ManualClock, OrganizationId, Role, SharingLevel,
    Subject,
};
use datadrop_db::{CoreFactory, setup_test_database};
use datadrop_download::{
    DownloadRequest, DownloadService, LocalArtifactStore, ServiceDeps, StaticPolicyOracle,
    TransferSession,
};

pub const SECRET: &[u8] = b"integration-test-secret-0123456789";
pub const ORG: &str = "acme";

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 9, 2, 10, 15, 0).unwrap()
}

pub fn settings() -> DownloadSettings {
    DownloadSettings::with_defaults()
        .with_token_ttl(Duration::from_secs(24 * 3_600))
        .with_idle_timeout(Duration::from_secs(5))
        .with_progress_persist_interval(Duration::ZERO)
        .with_channel_capacity(1)
}

/// Deterministic artifact content of `len` bytes.
pub fn artifact_bytes(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

pub fn csv_dataset(id: &str, artifact_path: &str, size: u64) -> Dataset {
    Dataset {
        id: DatasetId::new(id),
        name: "Quarterly Orders".into(),
        organization_id: OrganizationId::new(ORG),
        department: None,
        owner_id: None,
        sharing_level: SharingLevel::Organization,
        is_active: true,
        deleted_at: None,
        source: DatasetSource::Upload {
            file_type: FileType::Csv,
        },
        size_bytes: Some(size),
        artifact_path: Some(artifact_path.into()),
    }
}

pub fn analyst() -> Subject {
    Subject::member("u-analyst", ORG, Role::Analyst)
}

pub fn request(dataset_id: &str, subject: Subject, format: FileFormat) -> DownloadRequest {
    DownloadRequest {
        dataset_id: DatasetId::new(dataset_id),
        subject,
        format,
        compression: None,
    }
}

pub struct Harness {
    pub service: DownloadService,
    pub clock: Arc<ManualClock>,
    pub repo: Arc<dyn DownloadRecordRepository>,
    pub dir: TempDir,
}

impl Harness {
    /// Service over an in-memory database and a temp artifact directory
    /// containing `files`, read in 16-byte chunks.
    pub async fn new(oracle: StaticPolicyOracle, files: &[(&str, &[u8])]) -> Self {
        let store = |dir: &TempDir| -> Arc<dyn ArtifactStore> {
            Arc::new(LocalArtifactStore::new(dir.path(), 16))
        };
        Self::with_store(oracle, files, settings(), store).await
    }

    pub async fn with_store(
        oracle: StaticPolicyOracle,
        files: &[(&str, &[u8])],
        settings: DownloadSettings,
        store: impl FnOnce(&TempDir) -> Arc<dyn ArtifactStore>,
    ) -> Self {
        let dir = TempDir::new().unwrap();
        for (name, content) in files {
            let path = dir.path().join(name);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, content).unwrap();
        }

        let clock = Arc::new(ManualClock::new(t0()));
        let repo = CoreFactory::build_record_port(setup_test_database().await.unwrap());
        let oracle = Arc::new(oracle);
        let deps = ServiceDeps {
            repo: Arc::clone(&repo),
            oracle: oracle.clone(),
            catalog: oracle.clone(),
            directory: oracle,
            store: store(&dir),
            clock: clock.clone(),
        };
        let service = DownloadService::new(deps, settings, SECRET).unwrap();
        Self {
            service,
            clock,
            repo,
            dir,
        }
    }

    pub async fn initiate(&self, req: DownloadRequest) -> String {
        self.service
            .initiate(req, ClientMetadata::default())
            .await
            .unwrap()
            .token
    }

    pub async fn execute(&self, token: &str, range: Option<&str>) -> TransferSession {
        self.service
            .execute(token, range, ClientMetadata::default())
            .await
            .unwrap()
    }
}

/// Drain a session body, returning the bytes and whether it ended in an error.
pub async fn drain(session: &mut TransferSession) -> (Vec<u8>, bool) {
    let mut bytes = Vec::new();
    while let Some(item) = session.body.next().await {
        match item {
            Ok(chunk) => bytes.extend_from_slice(&chunk),
            Err(_) => return (bytes, true),
        }
    }
    (bytes, false)
}
