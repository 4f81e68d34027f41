use chrono::Utc;
use futures::stream::StreamExt;
use reqwest::Client;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use url::Url;

use crate::error::ToolError;
use crate::http_client;

/// Streams remote videos into the download directory
#[derive(Debug, Clone)]
pub struct Downloader {
    client: Client,
    dir: PathBuf,
}

impl Downloader {
    pub fn new(client: Client, dir: PathBuf) -> Self {
        Self { client, dir }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Download `url` to a fresh file and return its path.
    /// A partially written file is removed when the transfer fails.
    pub async fn download(&self, url: &str) -> Result<PathBuf, ToolError> {
        let parsed = Url::parse(url).map_err(|e| ToolError::Download(format!("invalid URL: {}", e)))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ToolError::Download(format!(
                "unsupported URL scheme '{}'",
                parsed.scheme()
            )));
        }

        tracing::info!("Downloading video from {}", url);

        let response = self.client.get(parsed).send().await.map_err(|e| {
            tracing::warn!(
                error_kind = http_client::error_kind(&e),
                error = %e,
                "Download request failed"
            );
            ToolError::Download(e.to_string())
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ToolError::Download(format!("server responded with HTTP {}", status)));
        }

        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.dir.join(file_name());

        match write_body(response, &path).await {
            Ok(bytes) => {
                tracing::info!("Video downloaded ({} bytes) to {}", bytes, path.display());
                Ok(path)
            }
            Err(e) => {
                if let Err(remove_err) = tokio::fs::remove_file(&path).await {
                    tracing::debug!("No partial download to remove: {}", remove_err);
                }
                Err(e)
            }
        }
    }
}

async fn write_body(response: reqwest::Response, path: &Path) -> Result<u64, ToolError> {
    let mut file = tokio::fs::File::create(path).await?;
    let mut stream = response.bytes_stream();
    let mut total = 0u64;

    while let Some(chunk) = stream.next().await {
        let bytes = chunk.map_err(|e| ToolError::Download(e.to_string()))?;
        file.write_all(&bytes).await?;
        total += bytes.len() as u64;
    }

    file.flush().await?;
    Ok(total)
}

/// `video_<timestamp>_<suffix>.mp4`; the suffix keeps same-second downloads apart
fn file_name() -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!(
        "video_{}_{}.mp4",
        Utc::now().format("%Y%m%d%H%M%S"),
        &suffix[..8]
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_download_writes_body_to_directory() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/clip.mp4")
            .with_status(200)
            .with_header("content-type", "video/mp4")
            .with_body(vec![7u8; 64 * 1024])
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let downloader = Downloader::new(Client::new(), dir.path().join("downloads"));

        let path = downloader
            .download(&format!("{}/clip.mp4", server.url()))
            .await
            .unwrap();

        mock.assert_async().await;
        assert!(path.starts_with(downloader.dir()));
        let name = path.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("video_"));
        assert!(name.ends_with(".mp4"));
        assert_eq!(std::fs::read(&path).unwrap().len(), 64 * 1024);
    }

    #[tokio::test]
    async fn test_http_error_status_fails_without_file() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/missing.mp4")
            .with_status(404)
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let downloader = Downloader::new(Client::new(), dir.path().to_path_buf());

        let err = downloader
            .download(&format!("{}/missing.mp4", server.url()))
            .await
            .unwrap_err();

        assert!(matches!(err, ToolError::Download(_)));
        assert!(err.to_string().starts_with("Failed to download video:"));
        assert!(err.to_string().contains("404"));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_rejects_non_http_urls() {
        let dir = tempfile::tempdir().unwrap();
        let downloader = Downloader::new(Client::new(), dir.path().to_path_buf());

        for url in ["not a url", "file:///etc/passwd", "ftp://example.com/a.mp4"] {
            let err = downloader.download(url).await.unwrap_err();
            assert!(matches!(err, ToolError::Download(_)), "{}", url);
        }
    }

    #[test]
    fn test_file_names_are_unique() {
        assert_ne!(file_name(), file_name());
    }
}
