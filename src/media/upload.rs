use reqwest::{header, Client};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::Path;

use super::PrivacyStatus;
use crate::auth::Credential;
use crate::error::ToolError;
use crate::http_client;

/// "People & Blogs"
const DEFAULT_CATEGORY_ID: &str = "22";

const VIDEO_CONTENT_TYPE: &str = "video/*";

/// Title, description and visibility of the uploaded video
#[derive(Debug, Clone, PartialEq)]
pub struct VideoMetadata {
    pub title: String,
    pub description: String,
    pub tags: Vec<String>,
    pub privacy_status: PrivacyStatus,
}

impl VideoMetadata {
    fn to_resource(&self) -> serde_json::Value {
        json!({
            "snippet": {
                "title": self.title,
                "description": self.description,
                "tags": self.tags,
                "categoryId": DEFAULT_CATEGORY_ID,
            },
            "status": {
                "privacyStatus": self.privacy_status,
            }
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UploadedVideo {
    pub video_id: String,
    pub video_url: String,
}

#[derive(Debug, Deserialize)]
struct VideoResource {
    id: String,
}

/// Uploads local files with the resumable upload protocol:
/// one POST opens a session carrying the metadata, one PUT streams the file
#[derive(Debug, Clone)]
pub struct Uploader {
    client: Client,
    upload_url: String,
    watch_url: String,
}

impl Uploader {
    pub fn new(client: Client, upload_url: String, watch_url: String) -> Self {
        Self {
            client,
            upload_url,
            watch_url,
        }
    }

    pub async fn upload(
        &self,
        path: &Path,
        metadata: &VideoMetadata,
        creds: &Credential,
    ) -> Result<UploadedVideo, ToolError> {
        let size = match tokio::fs::metadata(path).await {
            Ok(meta) if meta.is_file() => meta.len(),
            _ => {
                return Err(ToolError::Upload(format!(
                    "Video file not found at {}",
                    path.display()
                )))
            }
        };

        tracing::info!(
            "Uploading video to YouTube: title={:?}, privacy={}, bytes={}",
            metadata.title,
            metadata.privacy_status,
            size
        );

        let session_url = self.open_session(metadata, creds, size).await?;
        tracing::debug!("Resumable upload session opened");

        let file = tokio::fs::File::open(path).await?;
        let response = self
            .client
            .put(&session_url)
            .bearer_auth(&creds.access_token)
            .header(header::CONTENT_TYPE, VIDEO_CONTENT_TYPE)
            .header(header::CONTENT_LENGTH, size)
            .body(reqwest::Body::from(file))
            .send()
            .await
            .map_err(|e| transport_error(e, "Upload transfer failed"))?;

        if !response.status().is_success() {
            return Err(upload_error(http_client::provider_error(response).await));
        }

        let video: VideoResource = response
            .json()
            .await
            .map_err(|e| ToolError::Upload(format!("unexpected upload response: {}", e)))?;

        let video_url = format!("{}?v={}", self.watch_url, video.id);
        tracing::info!("Video uploaded: {}", video_url);

        Ok(UploadedVideo {
            video_id: video.id,
            video_url,
        })
    }

    /// Start a resumable session and return its upload URL
    async fn open_session(
        &self,
        metadata: &VideoMetadata,
        creds: &Credential,
        size: u64,
    ) -> Result<String, ToolError> {
        let response = self
            .client
            .post(&self.upload_url)
            .query(&[("uploadType", "resumable"), ("part", "snippet,status")])
            .bearer_auth(&creds.access_token)
            .header("X-Upload-Content-Type", VIDEO_CONTENT_TYPE)
            .header("X-Upload-Content-Length", size)
            .json(&metadata.to_resource())
            .send()
            .await
            .map_err(|e| transport_error(e, "Upload session request failed"))?;

        if !response.status().is_success() {
            return Err(upload_error(http_client::provider_error(response).await));
        }

        response
            .headers()
            .get(header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| ToolError::Upload("upload session has no Location header".to_string()))
    }
}

fn transport_error(e: reqwest::Error, context: &str) -> ToolError {
    tracing::warn!(
        error_kind = http_client::error_kind(&e),
        error = %e,
        "{}",
        context
    );
    ToolError::Upload(e.to_string())
}

fn upload_error(err: ToolError) -> ToolError {
    match err {
        ToolError::Provider { status, message } => {
            ToolError::Upload(format!("HTTP {}: {}", status, message))
        }
        other => other,
    }
}
