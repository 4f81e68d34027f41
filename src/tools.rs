// Tool surface: check_auth_status, authenticate, upload_from_url
//
// Every operation returns a tagged outcome; failures are reported in the
// result, never propagated to the caller.

use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::auth::{Authenticator, BrowserLauncher, CredentialStore};
use crate::config::Config;
use crate::error::ToolError;
use crate::media::{Downloader, PrivacyStatus, UploadedVideo, Uploader, VideoMetadata};

/// Result of `check_auth_status`
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(into = "AuthStatusResponse")]
pub enum AuthStatus {
    Valid,
    Refreshed,
    Missing,
    RefreshFailed(String),
    Unreadable(String),
}

impl AuthStatus {
    pub fn is_authenticated(&self) -> bool {
        matches!(self, AuthStatus::Valid | AuthStatus::Refreshed)
    }
}

#[derive(Debug, Serialize)]
struct AuthStatusResponse {
    authenticated: bool,
    message: String,
}

impl From<AuthStatus> for AuthStatusResponse {
    fn from(status: AuthStatus) -> Self {
        let message = match &status {
            AuthStatus::Valid => "User is authenticated with YouTube.".to_string(),
            AuthStatus::Refreshed => {
                "User is authenticated with YouTube and token was refreshed.".to_string()
            }
            AuthStatus::Missing => "User is not authenticated with YouTube.".to_string(),
            AuthStatus::RefreshFailed(reason) => format!(
                "Authentication token expired and could not be refreshed: {}",
                reason
            ),
            AuthStatus::Unreadable(reason) => {
                format!("Error checking authentication status: {}", reason)
            }
        };

        Self {
            authenticated: status.is_authenticated(),
            message,
        }
    }
}

/// Result of `authenticate`
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(into = "AuthenticateResponse")]
pub enum AuthenticateOutcome {
    Authenticated,
    Failed(String),
}

#[derive(Debug, Serialize)]
struct AuthenticateResponse {
    success: bool,
    message: String,
}

impl From<AuthenticateOutcome> for AuthenticateResponse {
    fn from(outcome: AuthenticateOutcome) -> Self {
        match outcome {
            AuthenticateOutcome::Authenticated => Self {
                success: true,
                message: "Authentication successful! You can now upload videos to YouTube."
                    .to_string(),
            },
            AuthenticateOutcome::Failed(message) => Self {
                success: false,
                message,
            },
        }
    }
}

/// Result of `upload_from_url`
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(into = "UploadResponse")]
pub enum UploadOutcome {
    Uploaded(UploadedVideo),
    Failed(String),
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct UploadResponse {
    success: bool,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    video_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    video_url: Option<String>,
}

impl From<UploadOutcome> for UploadResponse {
    fn from(outcome: UploadOutcome) -> Self {
        match outcome {
            UploadOutcome::Uploaded(video) => Self {
                success: true,
                message: "Video uploaded successfully!".to_string(),
                video_id: Some(video.video_id),
                video_url: Some(video.video_url),
            },
            UploadOutcome::Failed(message) => Self {
                success: false,
                message,
                video_id: None,
                video_url: None,
            },
        }
    }
}

/// Arguments of `upload_from_url`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadRequest {
    pub url: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    #[serde(default, alias = "privacy_status")]
    pub privacy_status: PrivacyStatus,
}

pub struct ToolService {
    store: CredentialStore,
    authenticator: Authenticator,
    downloader: Downloader,
    uploader: Uploader,
}

impl ToolService {
    pub fn new(config: Arc<Config>, client: Client, browser: Arc<dyn BrowserLauncher>) -> Self {
        let store = CredentialStore::new(config.token_file.clone(), client.clone());
        let downloader = Downloader::new(client.clone(), config.download_dir.clone());
        let uploader = Uploader::new(
            client.clone(),
            config.endpoints.upload_url.clone(),
            config.endpoints.watch_url.clone(),
        );
        let authenticator = Authenticator::new(config, client, store.clone(), browser);

        Self {
            store,
            authenticator,
            downloader,
            uploader,
        }
    }

    pub async fn check_auth_status(&self) -> AuthStatus {
        let creds = match self.store.load() {
            Ok(Some(creds)) => creds,
            Ok(None) => return AuthStatus::Missing,
            Err(e) => return AuthStatus::Unreadable(e.to_string()),
        };

        if self.store.is_valid(&creds) {
            return AuthStatus::Valid;
        }

        match self.store.refresh_if_needed(creds).await {
            Ok(_) => AuthStatus::Refreshed,
            Err(ToolError::RefreshFailed(reason)) => AuthStatus::RefreshFailed(reason),
            Err(ToolError::NotAuthenticated) => AuthStatus::Missing,
            Err(e) => AuthStatus::Unreadable(e.to_string()),
        }
    }

    pub async fn authenticate(&self) -> AuthenticateOutcome {
        match self.authenticator.authenticate().await {
            Ok(_) => AuthenticateOutcome::Authenticated,
            Err(e) => {
                tracing::warn!(error_kind = e.kind(), "Authentication failed: {}", e);
                AuthenticateOutcome::Failed(authenticate_failure_message(&e))
            }
        }
    }

    /// Download the video, then upload it with the stored credential.
    /// Nothing is downloaded unless a usable credential exists.
    pub async fn upload_from_url(&self, request: UploadRequest) -> UploadOutcome {
        match self.try_upload_from_url(request).await {
            Ok(video) => UploadOutcome::Uploaded(video),
            Err(e) => {
                tracing::warn!(error_kind = e.kind(), "upload_from_url failed: {}", e);
                UploadOutcome::Failed(e.to_string())
            }
        }
    }

    async fn try_upload_from_url(&self, request: UploadRequest) -> Result<UploadedVideo, ToolError> {
        let creds = self.store.load()?.ok_or(ToolError::NotAuthenticated)?;
        let creds = self.store.refresh_if_needed(creds).await?;

        let path = self.downloader.download(&request.url).await?;

        let metadata = VideoMetadata {
            title: request.title,
            description: request.description,
            tags: request.tags.unwrap_or_default(),
            privacy_status: request.privacy_status,
        };
        let result = self.uploader.upload(&path, &metadata, &creds).await;

        if let Err(e) = tokio::fs::remove_file(&path).await {
            tracing::warn!("Failed to remove downloaded file {}: {}", path.display(), e);
        }

        result
    }
}

fn authenticate_failure_message(err: &ToolError) -> String {
    match err {
        ToolError::Configuration(message) => message.clone(),
        ToolError::Timeout(_) => "Authentication timed out. Please try again.".to_string(),
        other => format!("Authentication failed: {}", other),
    }
}

/// Tool descriptors served by `GET /tools`
pub fn tool_descriptors() -> Value {
    json!({
        "tools": [
            {
                "name": "check_auth_status",
                "description": "Check if the user is authenticated with YouTube",
                "inputSchema": {"type": "object", "properties": {}}
            },
            {
                "name": "authenticate",
                "description": "Authenticate with YouTube using OAuth2",
                "inputSchema": {"type": "object", "properties": {}}
            },
            {
                "name": "upload_from_url",
                "description": "Download a video from URL and upload it to YouTube",
                "inputSchema": {
                    "type": "object",
                    "properties": {
                        "url": {"type": "string", "description": "URL of the video to download"},
                        "title": {"type": "string", "description": "Title of the video"},
                        "description": {"type": "string", "description": "Description of the video"},
                        "tags": {"type": "array", "items": {"type": "string"}},
                        "privacyStatus": {
                            "type": "string",
                            "enum": ["private", "public", "unlisted"],
                            "default": "private"
                        }
                    },
                    "required": ["url", "title"]
                }
            }
        ]
    })
}
