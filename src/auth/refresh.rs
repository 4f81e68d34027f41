// Token endpoint calls: authorization-code exchange and refresh grant

use reqwest::Client;

use super::types::{Credential, TokenData, TokenResponse};
use crate::error::ToolError;
use crate::http_client;

/// Exchange an authorization code for tokens
pub async fn exchange_authorization_code(
    client: &Client,
    token_url: &str,
    client_id: &str,
    client_secret: &str,
    code: &str,
    redirect_uri: &str,
) -> Result<TokenData, ToolError> {
    tracing::info!("Exchanging authorization code for tokens...");

    let form = [
        ("grant_type", "authorization_code"),
        ("code", code),
        ("redirect_uri", redirect_uri),
        ("client_id", client_id),
        ("client_secret", client_secret),
    ];

    let data = post_token_request(client, token_url, &form).await?;

    tracing::info!(
        "Authorization code exchanged, expires: {}, refresh token issued: {}",
        data.expires_at.to_rfc3339(),
        data.refresh_token.is_some()
    );

    Ok(data)
}

/// Refresh the access token of a stored credential
pub async fn refresh_access_token(
    client: &Client,
    creds: &Credential,
) -> Result<TokenData, ToolError> {
    tracing::info!("Refreshing YouTube access token...");

    let refresh_token = creds
        .refresh_token
        .as_deref()
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ToolError::RefreshFailed("no refresh token is stored".to_string()))?;

    tracing::debug!(
        "Refresh request: url={}, client_id={}...",
        creds.token_uri,
        log_prefix(&creds.client_id)
    );

    let form = [
        ("grant_type", "refresh_token"),
        ("client_id", creds.client_id.as_str()),
        ("client_secret", creds.client_secret.as_str()),
        ("refresh_token", refresh_token),
    ];

    let data = post_token_request(client, &creds.token_uri, &form).await?;

    tracing::info!("Token refreshed, expires: {}", data.expires_at.to_rfc3339());

    Ok(data)
}

/// First eight characters of an identifier, for logs
fn log_prefix(value: &str) -> String {
    value.chars().take(8).collect()
}

/// POST a form-encoded grant to the token endpoint
async fn post_token_request(
    client: &Client,
    token_url: &str,
    form: &[(&str, &str)],
) -> Result<TokenData, ToolError> {
    let response = client
        .post(token_url)
        .header("Accept", "application/json")
        .form(form)
        .send()
        .await
        .map_err(|e| {
            tracing::warn!(
                error_kind = http_client::error_kind(&e),
                error = %e,
                "Token endpoint request failed"
            );
            ToolError::Http(e)
        })?;

    if !response.status().is_success() {
        return Err(http_client::provider_error(response).await);
    }

    let data: TokenResponse = response.json().await?;

    if data.access_token.is_empty() {
        return Err(ToolError::Provider {
            status: 200,
            message: "token response does not contain access_token".to_string(),
        });
    }

    Ok(data.into_token_data())
}
