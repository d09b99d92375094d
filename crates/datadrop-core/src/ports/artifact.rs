//! Artifact store port: where the bytes of a materialized dataset live.

use async_trait::async_trait;
use bytes::Bytes;
use futures_core::Stream;
use std::pin::Pin;

use crate::download::ArtifactError;

/// Bounded chunks of an artifact, each failure already classified.
pub type ArtifactChunks = Pin<Box<dyn Stream<Item = Result<Bytes, ArtifactError>> + Send>>;

/// What the store knows about an artifact without reading it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArtifactMeta {
    pub size: u64,
}

/// Read access to stored artifacts.
///
/// Implementations never buffer a whole artifact; `open_for_read` yields
/// chunks of at most the configured chunk size.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Size of the artifact at `path`.
    async fn stat(&self, path: &str) -> Result<ArtifactMeta, ArtifactError>;

    /// Stream the artifact at `path` starting at byte `offset`.
    async fn open_for_read(&self, path: &str, offset: u64) -> Result<ArtifactChunks, ArtifactError>;
}
