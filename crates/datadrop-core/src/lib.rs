//! Core domain types and port definitions for the datadrop download subsystem.
//!
//! This crate is pure: no networking, filesystem or database access. It holds
//! the dataset/subject model, the download record state machine, the error
//! taxonomy surfaced to callers, and the traits (ports) that adapters implement.
//!
//! # Structure
//!
//! - `domain` - datasets, subjects, formats and compression selectors
//! - `download` - tokens, records, progress snapshots, byte ranges, errors
//! - `policy` - organization policy, rate limits and policy decisions
//! - `ports` - collaborator traits (oracle, catalog, artifact store, repository, clock)
//! - `settings` - tunables for token lifetime, chunking and liveness

#![deny(unused_crate_dependencies)]

pub mod domain;
pub mod download;
pub mod policy;
pub mod ports;
pub mod settings;

// Re-export commonly used types for convenience
pub use domain::{
    Compression, ConnectorType, Dataset, DatasetId, DatasetSource, FileFormat, FileType,
    OrganizationId, Role, SharingLevel, Subject, SubjectId,
};
pub use download::{
    ArtifactError, ByteRange, ClientMetadata, DownloadError, DownloadRecord, DownloadResult,
    DownloadStatus, ProgressSnapshot, RangeRejection, RangeRequest, TokenClaims, TransientKind,
    TransitionError,
};
pub use policy::{
    AccessDecision, OrgDownloadPolicy, PolicyDecision, RateLimitKey, RateLimitStatus, RateLimits,
    RateWindow,
};
pub use ports::{
    ArtifactChunks, ArtifactMeta, ArtifactStore, Clock, DatasetCatalog, DownloadRecordRepository,
    PolicyError, PolicyOracle, RepositoryError, SubjectDirectory, SystemClock,
};
pub use settings::{DownloadSettings, SettingsError, validate_settings};

#[cfg(any(test, feature = "test-utils"))]
pub use ports::ManualClock;
