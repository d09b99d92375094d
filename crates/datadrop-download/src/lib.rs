//! Token issuance, request validation and resumable transfers for datadrop.
//!
//! This crate implements the download subsystem on top of the ports defined in
//! `datadrop-core`. Adapters construct a [`DownloadService`] and call it; the
//! individual components are public for composition and testing.
//!
//! # Structure
//!
//! - `validator` - ordered validation pipeline and format compatibility tables
//! - `rate_limit` - in-memory fixed-window rate limiter
//! - `token` - signed capability tokens
//! - `transfer` - transfer engine and per-transfer worker
//! - `progress` - live progress registry and progress tracker
//! - `retry` - reopening failed, interrupted and expired downloads
//! - `retention` - periodic expiry and stale-transfer sweep
//! - `store` - artifact store over a local directory
//! - `policy` - fixture-backed oracle, catalog and subject directory
//! - `service` - the facade adapters talk to

#![deny(unused_crate_dependencies)]

#[cfg(test)]
use datadrop_db as _;

mod lookup;

pub mod policy;
pub mod progress;
pub mod rate_limit;
pub mod retention;
pub mod retry;
pub mod service;
pub mod store;
pub mod token;
pub mod transfer;
pub mod validator;

// Re-export core types for convenience
pub use datadrop_core::{
    ClientMetadata, DownloadError, DownloadResult, DownloadSettings, DownloadStatus,
    ProgressSnapshot,
};

pub use policy::StaticPolicyOracle;
pub use progress::{LiveProgressRegistry, ProgressThrottle, ProgressTracker};
pub use rate_limit::{RateLimitGrant, WindowedRateLimiter};
pub use retention::{RetentionSweeper, SweepReport};
pub use retry::{RetryCoordinator, RetryOutcome};
pub use service::{DownloadService, InitiatedDownload, ServiceDeps};
pub use store::LocalArtifactStore;
pub use token::{IssuedToken, TokenConfigError, TokenGrant, TokenIssuer};
pub use transfer::{TransferEngine, TransferHandle, TransferMeta, TransferOutcome, TransferSession};
pub use validator::{DownloadRequest, RequestValidator, ValidatedRequest};
