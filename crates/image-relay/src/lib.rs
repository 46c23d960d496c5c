//! Image relay module for forwarding uploaded files to the external image
//! host.
//!
//! The host speaks a simple multipart protocol: a `reqtype=fileupload` field
//! plus the file under `fileToUpload`, answered with the public URL as plain
//! text. The relay owns the temporary file backing the upload and removes it
//! exactly once, whichever way the call exits.

use async_trait::async_trait;
use std::time::Duration;
use tempfile::NamedTempFile;
use tracing::{info, warn};

/// Errors that can occur while relaying an upload to the image host.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    /// Transport-level failure, including the bounded timeout elapsing.
    #[error("Image host transport error: {0}")]
    Transport(#[from] reqwest::Error),
    /// The host answered with a non-success status.
    #[error("Image host rejected upload with status {0}")]
    Rejected(reqwest::StatusCode),
    /// The local temporary file could not be read.
    #[error("Failed to read upload file: {0}")]
    Io(#[from] std::io::Error),
}

/// Trait describing the upload relay, so handlers can be tested against an
/// in-memory double.
#[async_trait]
pub trait ImageRelay: Send + Sync {
    /// Forward the file to the image host and return its public URL.
    ///
    /// Takes ownership of the temporary file; it is deleted when the call
    /// returns, on success and on every failure path alike.
    async fn upload(&self, file: NamedTempFile) -> Result<String, UploadError>;
}

/// HTTP implementation of [`ImageRelay`] against a catbox-style host.
pub struct HttpImageRelay {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpImageRelay {
    /// Creates a relay for the given upload endpoint.
    ///
    /// # Arguments
    /// * `endpoint` - Upload URL of the image host.
    /// * `timeout` - Upper bound for one upload round trip; elapsing it
    ///   surfaces as [`UploadError::Transport`].
    pub fn new(endpoint: String, timeout: Duration) -> Result<Self, UploadError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, endpoint })
    }
}

#[async_trait]
impl ImageRelay for HttpImageRelay {
    async fn upload(&self, file: NamedTempFile) -> Result<String, UploadError> {
        // `file` is owned by this scope: dropping it on any exit path below
        // removes the temp file from disk.
        let file_name = file
            .path()
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".to_string());

        let bytes = tokio::fs::read(file.path()).await?;
        let size = bytes.len();

        let part = reqwest::multipart::Part::bytes(bytes).file_name(file_name);
        let form = reqwest::multipart::Form::new()
            .text("reqtype", "fileupload")
            .part("fileToUpload", part);

        let response = self
            .client
            .post(&self.endpoint)
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            warn!(%status, "Image host rejected upload");
            return Err(UploadError::Rejected(status));
        }

        let url = response.text().await?.trim().to_string();
        info!(size, %url, "Image uploaded");
        Ok(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Router, routing::post};
    use std::io::Write;
    use std::path::PathBuf;

    async fn spawn_host(response: (axum::http::StatusCode, &'static str)) -> String {
        let app = Router::new().route("/", post(move || async move { response }));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}/")
    }

    fn temp_upload(content: &[u8]) -> (NamedTempFile, PathBuf) {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content).unwrap();
        let path = file.path().to_path_buf();
        (file, path)
    }

    #[tokio::test]
    async fn test_upload_returns_url_and_removes_temp_file() {
        let endpoint =
            spawn_host((axum::http::StatusCode::OK, "https://files.example/abc.png\n")).await;
        let relay = HttpImageRelay::new(endpoint, Duration::from_secs(5)).unwrap();

        let (file, path) = temp_upload(b"fake image bytes");
        assert!(path.exists());

        let url = relay.upload(file).await.unwrap();
        assert_eq!(url, "https://files.example/abc.png");
        assert!(!path.exists(), "temp file must be removed after upload");
    }

    #[tokio::test]
    async fn test_rejected_upload_still_removes_temp_file() {
        let endpoint =
            spawn_host((axum::http::StatusCode::INTERNAL_SERVER_ERROR, "boom")).await;
        let relay = HttpImageRelay::new(endpoint, Duration::from_secs(5)).unwrap();

        let (file, path) = temp_upload(b"fake image bytes");
        let err = relay.upload(file).await.unwrap_err();
        assert!(matches!(err, UploadError::Rejected(status) if status.as_u16() == 500));
        assert!(!path.exists(), "temp file must be removed after a failure");
    }

    #[tokio::test]
    async fn test_unreachable_host_still_removes_temp_file() {
        // Nothing listens on this port; connect fails fast.
        let relay = HttpImageRelay::new(
            "http://127.0.0.1:1/".to_string(),
            Duration::from_secs(2),
        )
        .unwrap();

        let (file, path) = temp_upload(b"fake image bytes");
        let err = relay.upload(file).await.unwrap_err();
        assert!(matches!(err, UploadError::Transport(_)));
        assert!(!path.exists());
    }
}
