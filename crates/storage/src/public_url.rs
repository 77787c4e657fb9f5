//! Image source reading objects from a public storage bucket over HTTP

use crate::{ImageSource, StorageError, StorageResult};
use reqwest::{Client, StatusCode};
use std::time::Duration;
use tracing::{debug, info};

/// Fetches `{base_url}/storage/v1/object/public/{bucket}/{path}`
pub struct PublicUrlSource {
    client: Client,
    base_url: String,
    bucket: String,
}

impl PublicUrlSource {
    /// Create a source for one bucket of a storage project
    ///
    /// # Errors
    /// Returns error if the base URL is not http(s) or the client cannot be built
    pub fn new(base_url: &str, bucket: &str) -> StorageResult<Self> {
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(StorageError::InvalidConfig(format!(
                "public base URL must be http(s), got {base_url:?}"
            )));
        }
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| StorageError::Http(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            bucket: bucket.to_string(),
        })
    }

    /// Public URL of an object in the bucket
    #[must_use]
    pub fn object_url(&self, path: &str) -> String {
        format!(
            "{}/storage/v1/object/public/{}/{}",
            self.base_url,
            self.bucket,
            path.trim_start_matches('/')
        )
    }
}

#[async_trait::async_trait]
impl ImageSource for PublicUrlSource {
    async fn fetch(&self, path: &str) -> StorageResult<Vec<u8>> {
        let url = self.object_url(path);
        info!("Downloading image from URL: {}", url);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| StorageError::Http(format!("Failed to send HTTP request: {e}")))?;

        match response.status() {
            StatusCode::OK => {}
            StatusCode::NOT_FOUND => return Err(StorageError::NotFound(path.to_string())),
            status => {
                return Err(StorageError::Http(format!(
                    "HTTP request failed with status: {status}"
                )))
            }
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| StorageError::Http(format!("Failed to read response body: {e}")))?;
        debug!("Downloaded {} bytes", bytes.len());
        Ok(bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_url_format() {
        let source = PublicUrlSource::new("https://abc.supabase.co/", "stereo").unwrap();
        assert_eq!(
            source.object_url("pairs/tree_01.jpg"),
            "https://abc.supabase.co/storage/v1/object/public/stereo/pairs/tree_01.jpg"
        );
        assert_eq!(
            source.object_url("/a.jpg"),
            "https://abc.supabase.co/storage/v1/object/public/stereo/a.jpg"
        );
    }

    #[test]
    fn test_rejects_non_http_base() {
        assert!(matches!(
            PublicUrlSource::new("ftp://host", "stereo"),
            Err(StorageError::InvalidConfig(_))
        ));
    }

    #[tokio::test]
    async fn test_unreachable_host_is_http_error() {
        // Reserve a port, then release it so nothing is listening
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let source = PublicUrlSource::new(&format!("http://{addr}"), "stereo").unwrap();
        let err = source.fetch("missing.jpg").await.unwrap_err();
        assert!(matches!(err, StorageError::Http(_)));
    }
}
