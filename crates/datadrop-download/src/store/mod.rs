//! Artifact store backed by a local directory.
//!
//! Artifact paths are relative to the store root. Reads are chunked through
//! `ReaderStream`, and every I/O error is classified at the point it happens.

use std::io::SeekFrom;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::fs::File;
use tokio::io::AsyncSeekExt;
use tokio_util::io::ReaderStream;

use datadrop_core::{ArtifactChunks, ArtifactError, ArtifactMeta, ArtifactStore};

/// Serves artifacts from files under `root`.
#[derive(Debug, Clone)]
pub struct LocalArtifactStore {
    root: PathBuf,
    chunk_size: usize,
}

impl LocalArtifactStore {
    pub fn new(root: impl Into<PathBuf>, chunk_size: usize) -> Self {
        Self {
            root: root.into(),
            chunk_size: chunk_size.max(1),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Join `path` onto the root, refusing anything that could escape it.
    fn resolve(&self, path: &str) -> Result<PathBuf, ArtifactError> {
        let relative = Path::new(path);
        let confined = !path.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
        if !confined {
            tracing::warn!(target: "datadrop.transfer", %path, "artifact path escapes store root");
            return Err(ArtifactError::Persistent {
                message: format!("artifact path '{path}' is outside the store"),
            });
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl ArtifactStore for LocalArtifactStore {
    async fn stat(&self, path: &str) -> Result<ArtifactMeta, ArtifactError> {
        let full = self.resolve(path)?;
        let metadata = tokio::fs::metadata(&full)
            .await
            .map_err(|e| ArtifactError::from_io_error(&e, path))?;
        if !metadata.is_file() {
            return Err(ArtifactError::Persistent {
                message: format!("artifact '{path}' is not a regular file"),
            });
        }
        Ok(ArtifactMeta {
            size: metadata.len(),
        })
    }

    async fn open_for_read(&self, path: &str, offset: u64) -> Result<ArtifactChunks, ArtifactError> {
        let full = self.resolve(path)?;
        let mut file = File::open(&full)
            .await
            .map_err(|e| ArtifactError::from_io_error(&e, path))?;
        if offset > 0 {
            file.seek(SeekFrom::Start(offset))
                .await
                .map_err(|e| ArtifactError::from_io_error(&e, path))?;
        }

        let path = path.to_string();
        let chunks = ReaderStream::with_capacity(file, self.chunk_size)
            .map(move |chunk| chunk.map_err(|e| ArtifactError::from_io_error(&e, &path)));
        Ok(Box::pin(chunks))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::TryStreamExt;
    use tempfile::TempDir;

    async fn store_with(name: &str, content: &[u8]) -> (TempDir, LocalArtifactStore) {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join(name);
        tokio::fs::create_dir_all(file.parent().unwrap()).await.unwrap();
        tokio::fs::write(&file, content).await.unwrap();
        let store = LocalArtifactStore::new(dir.path(), 4);
        (dir, store)
    }

    #[tokio::test]
    async fn reads_in_bounded_chunks_from_an_offset() {
        let (_dir, store) = store_with("exports/orders.csv", b"0123456789").await;
        assert_eq!(store.stat("exports/orders.csv").await.unwrap().size, 10);

        let chunks: Vec<_> = store
            .open_for_read("exports/orders.csv", 3)
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        assert!(chunks.iter().all(|c| c.len() <= 4));
        let joined: Vec<u8> = chunks.concat();
        assert_eq!(joined, b"3456789");
    }

    #[tokio::test]
    async fn missing_artifacts_are_not_found() {
        let (_dir, store) = store_with("a.csv", b"x").await;
        assert_eq!(
            store.stat("b.csv").await.unwrap_err(),
            ArtifactError::NotFound {
                path: "b.csv".to_string()
            }
        );
        assert!(matches!(
            store.open_for_read("b.csv", 0).await,
            Err(ArtifactError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn traversal_is_refused() {
        let (_dir, store) = store_with("a.csv", b"x").await;
        for path in ["../etc/passwd", "/etc/passwd", "a/../../b", ""] {
            assert!(
                matches!(store.stat(path).await, Err(ArtifactError::Persistent { .. })),
                "{path} should be refused"
            );
        }
    }

    #[tokio::test]
    async fn directories_are_not_artifacts() {
        let (dir, store) = store_with("nested/a.csv", b"x").await;
        assert!(dir.path().join("nested").is_dir());
        assert!(matches!(
            store.stat("nested").await,
            Err(ArtifactError::Persistent { .. })
        ));
    }
}
