//! Port definitions (trait abstractions) for external systems.
//!
//! Ports define the interfaces that the download subsystem expects from
//! infrastructure. They contain no implementation details and use only
//! domain types.
//!
//! # Design Rules
//!
//! - No `sqlx` or `axum` types in any signature
//! - Artifact failures cross the boundary already classified
//! - Time is always read through [`Clock`]

pub mod artifact;
pub mod clock;
pub mod policy;
pub mod repository;

use thiserror::Error;

pub use artifact::{ArtifactChunks, ArtifactMeta, ArtifactStore};
pub use clock::{Clock, SystemClock};
pub use policy::{DatasetCatalog, PolicyOracle, SubjectDirectory};
pub use repository::DownloadRecordRepository;

#[cfg(any(test, feature = "test-utils"))]
pub use clock::ManualClock;

/// Domain-specific errors for repository operations.
///
/// This error type abstracts away storage implementation details (e.g., sqlx errors)
/// and provides a clean interface for services to handle storage failures.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// The requested entity was not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// An entity with the same identifier already exists.
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Storage backend error (database, filesystem, etc.).
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A constraint was violated (e.g., foreign key, unique constraint).
    #[error("Constraint violation: {0}")]
    Constraint(String),
}

/// Errors raised by the policy oracle, dataset catalog or subject directory.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PolicyError {
    /// The collaborator could not be reached.
    #[error("Policy source unavailable: {0}")]
    Unavailable(String),

    /// The collaborator returned data that makes no sense.
    #[error("Invalid policy data: {0}")]
    Invalid(String),
}
