//! Local directory backend, used by the CLI and for testing

use crate::{ArtifactSink, ImageSource, StorageError, StorageResult};
use std::path::{Component, Path, PathBuf};
use tracing::debug;

/// Objects stored as files under a root directory
#[derive(Debug, Clone)]
pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a relative object path under the root
    ///
    /// Absolute paths and `..` components are rejected.
    fn resolve(&self, path: &str) -> StorageResult<PathBuf> {
        let relative = Path::new(path);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if path.is_empty() || escapes {
            return Err(StorageError::InvalidPath(path.to_string()));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait::async_trait]
impl ImageSource for LocalStorage {
    async fn fetch(&self, path: &str) -> StorageResult<Vec<u8>> {
        let full = self.resolve(path)?;
        match tokio::fs::read(&full).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(path.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait::async_trait]
impl ArtifactSink for LocalStorage {
    async fn store(&self, path: &str, data: &[u8]) -> StorageResult<String> {
        let full = self.resolve(path)?;
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&full, data).await?;
        debug!("Stored {} bytes at {}", data.len(), full.display());
        Ok(path.to_string())
    }
}
