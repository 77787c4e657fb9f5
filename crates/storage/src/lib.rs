//! Storage adapters for source images and derived artifacts
//!
//! Sources implement [`ImageSource`] (fetch encoded image bytes by path) and
//! sinks implement [`ArtifactSink`] (store bytes, return the stored path).
//! Backends:
//! - **S3 / MinIO / Supabase storage** via `aws-sdk-s3` ([`S3ObjectStorage`])
//! - **Public bucket URLs** over HTTP via `reqwest` ([`PublicUrlSource`])
//! - **Local directory** via `tokio::fs` ([`LocalStorage`])
//!
//! # Example
//!
//! ```rust,no_run
//! use stereo_sizing_storage::{ArtifactSink, ImageSource, S3Config, S3ObjectStorage};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let storage = S3ObjectStorage::new(S3Config::default()).await?;
//!     let bytes = storage.fetch("pairs/tree_01.jpg").await?;
//!     let stored = storage.store("pairs/tree_01_disparity.png", &bytes).await?;
//!     println!("stored at {stored}");
//!     Ok(())
//! }
//! ```

use stereo_sizing_common::ProcessingError;
use thiserror::Error;

pub mod local;
pub mod public_url;
pub mod s3;

pub use local::LocalStorage;
pub use public_url::PublicUrlSource;
pub use s3::{S3Config, S3ObjectStorage};

/// Storage layer errors
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("S3 error: {0}")]
    S3Error(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("File not found: {0}")]
    NotFound(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl From<StorageError> for ProcessingError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(path) => ProcessingError::SourceNotFound(path),
            StorageError::InvalidPath(path) => ProcessingError::InvalidSourcePath(path),
            other => ProcessingError::SourceUnavailable(other.to_string()),
        }
    }
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Where source images come from
#[async_trait::async_trait]
pub trait ImageSource: Send + Sync {
    /// Encoded bytes of the object at `path`
    async fn fetch(&self, path: &str) -> StorageResult<Vec<u8>>;
}

/// Where derived artifacts go
#[async_trait::async_trait]
pub trait ArtifactSink: Send + Sync {
    /// Store `data` under `path` and return the path it was stored at
    async fn store(&self, path: &str, data: &[u8]) -> StorageResult<String>;
}

/// Path of an artifact stored next to its source: `<dir>/<stem><suffix>`
///
/// `artifact_path("pairs/tree_01.jpg", "_disparity.png")` is
/// `"pairs/tree_01_disparity.png"`.
#[must_use]
pub fn artifact_path(source: &str, suffix: &str) -> String {
    let (dir, name) = match source.rfind('/') {
        Some(i) => source.split_at(i + 1),
        None => ("", source),
    };
    let stem = match name.rfind('.') {
        Some(i) if i > 0 => &name[..i],
        _ => name,
    };
    format!("{dir}{stem}{suffix}")
}
