use anyhow::Context;
use reqwest::{Client, Response};
use std::time::Duration;

use crate::config::Config;
use crate::error::ToolError;

const USER_AGENT: &str = concat!("youtube-upload-agent/", env!("CARGO_PKG_VERSION"));

/// Build the shared HTTP client used for token, download and upload calls.
/// There is no retry layer: every failure is surfaced to the caller.
pub fn build_client(config: &Config) -> Result<Client, ToolError> {
    let client = Client::builder()
        .user_agent(USER_AGENT)
        .connect_timeout(Duration::from_secs(config.http_connect_timeout))
        .timeout(Duration::from_secs(config.http_request_timeout))
        .build()
        .context("Failed to create HTTP client")?;

    Ok(client)
}

/// Convert a non-success response into a provider error carrying the body text.
///
/// OAuth and Google API errors come back either as
/// `{"error": "...", "error_description": "..."}` or
/// `{"error": {"message": "..."}}`; the most specific message wins.
pub async fn provider_error(response: Response) -> ToolError {
    let status = response.status();
    let url = response.url().clone();
    let body = response.text().await.unwrap_or_default();

    tracing::error!(
        status = status.as_u16(),
        url = %url,
        response_body = %body,
        "HTTP request failed with error response"
    );

    ToolError::Provider {
        status: status.as_u16(),
        message: extract_error_message(&body),
    }
}

fn extract_error_message(body: &str) -> String {
    let Ok(json) = serde_json::from_str::<serde_json::Value>(body) else {
        return body.trim().to_string();
    };

    match json.get("error") {
        Some(serde_json::Value::String(code)) => {
            match json.get("error_description").and_then(|v| v.as_str()) {
                Some(desc) => format!("{}: {}", code, desc),
                None => code.clone(),
            }
        }
        Some(serde_json::Value::Object(obj)) => obj
            .get("message")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| body.trim().to_string()),
        _ => body.trim().to_string(),
    }
}

/// Short label for transport failures, used in logs
pub fn error_kind(err: &reqwest::Error) -> &'static str {
    if err.is_timeout() {
        "timeout"
    } else if err.is_connect() {
        "connection_failed"
    } else if err.is_request() {
        "request_error"
    } else if err.is_body() {
        "body_error"
    } else if err.is_decode() {
        "decode_error"
    } else {
        "unknown"
    }
}
