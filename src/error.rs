// Error handling module
// Defines the tool error taxonomy and HTTP response conversion

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Errors that can occur while authenticating or moving video files
#[derive(Error, Debug)]
pub enum ToolError {
    /// Client id or client secret missing
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// No callback arrived within the bound
    #[error("Authentication timed out: {0}")]
    Timeout(String),

    /// Identity provider or API rejected the request
    #[error("Provider error: {status} - {message}")]
    Provider { status: u16, message: String },

    /// Callback arrived but cannot be trusted (state mismatch, empty code)
    #[error("Callback rejected: {0}")]
    CallbackRejected(String),

    /// Stored credential could not be refreshed and was removed
    #[error("Token refresh failed: {0}")]
    RefreshFailed(String),

    /// File system failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// No usable credential is stored
    #[error("User is not authenticated with YouTube. Please authenticate first.")]
    NotAuthenticated,

    /// Another authentication attempt holds the callback port
    #[error("Another authentication attempt is already in progress")]
    AuthInProgress,

    /// The loopback port could not be bound
    #[error("Failed to bind callback listener on port {port}: {source}")]
    ListenerBind {
        port: u16,
        #[source]
        source: std::io::Error,
    },

    /// Remote video could not be fetched
    #[error("Failed to download video: {0}")]
    Download(String),

    /// Video could not be uploaded
    #[error("Failed to upload video: {0}")]
    Upload(String),

    /// Tool server caller presented a bad API key
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Transport failure talking to a remote endpoint
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Anything else
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl ToolError {
    /// Short machine-readable kind, used in logs and error bodies
    pub fn kind(&self) -> &'static str {
        match self {
            ToolError::Configuration(_) => "configuration",
            ToolError::Timeout(_) => "timeout",
            ToolError::Provider { .. } => "provider",
            ToolError::CallbackRejected(_) => "callback_rejected",
            ToolError::RefreshFailed(_) => "refresh_failed",
            ToolError::Io(_) => "io",
            ToolError::NotAuthenticated => "not_authenticated",
            ToolError::AuthInProgress => "auth_in_progress",
            ToolError::ListenerBind { .. } => "listener_bind",
            ToolError::Download(_) => "download",
            ToolError::Upload(_) => "upload",
            ToolError::Unauthorized(_) => "unauthorized",
            ToolError::Http(_) => "http",
            ToolError::Internal(_) => "internal",
        }
    }
}

impl IntoResponse for ToolError {
    fn into_response(self) -> Response {
        let status = match &self {
            ToolError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ToolError::Configuration(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ToolError::AuthInProgress => StatusCode::CONFLICT,
            ToolError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            ToolError::Provider { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            ToolError::NotAuthenticated => StatusCode::UNAUTHORIZED,
            ToolError::CallbackRejected(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let message = match &self {
            ToolError::Internal(err) => {
                tracing::error!("Internal error: {:?}", err);
                "Internal server error".to_string()
            }
            other => other.to_string(),
        };

        let body = Json(json!({
            "error": {
                "message": message,
                "type": self.kind(),
            }
        }));

        (status, body).into_response()
    }
}
