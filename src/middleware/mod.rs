// API key middleware for the tool routes

use axum::{body::Body, extract::State, http::Request, middleware::Next, response::Response};

use crate::error::ToolError;
use crate::routes::AppState;

/// Authentication middleware
///
/// Verifies the API key in the Authorization header or x-api-key header.
/// Expects format: "Bearer {TOOL_API_KEY}" or just the key in x-api-key.
/// Without a configured key every request passes.
pub async fn auth_middleware(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, ToolError> {
    let Some(expected_key) = state.api_key.as_deref() else {
        return Ok(next.run(request).await);
    };

    if let Some(auth_header) = request.headers().get("authorization") {
        if let Ok(auth_str) = auth_header.to_str() {
            if auth_str.strip_prefix("Bearer ") == Some(expected_key) {
                return Ok(next.run(request).await);
            }
        }
    }

    if let Some(api_key_header) = request.headers().get("x-api-key") {
        if let Ok(key_str) = api_key_header.to_str() {
            if key_str == expected_key {
                return Ok(next.run(request).await);
            }
        }
    }

    let request_id = uuid::Uuid::new_v4().simple().to_string()[..8].to_string();
    tracing::warn!(
        "[{}] Access attempt with invalid or missing API key: {} {}",
        request_id,
        request.method(),
        request.uri().path()
    );
    Err(ToolError::Unauthorized(
        "Invalid or missing API Key".to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::BrowserLauncher;
    use crate::tools::ToolService;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
        routing::get,
        Router,
    };
    use std::sync::Arc;
    use tower::util::ServiceExt;

    struct NoBrowser;

    impl BrowserLauncher for NoBrowser {
        fn open(&self, _url: &str) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn create_test_state(api_key: Option<&str>) -> AppState {
        let dir = std::env::temp_dir().join("youtube-upload-agent-middleware-tests");
        let config = Arc::new(crate::config::test_config(&dir));
        AppState {
            tools: Arc::new(ToolService::new(
                config,
                reqwest::Client::new(),
                Arc::new(NoBrowser),
            )),
            api_key: api_key.map(str::to_string),
        }
    }

    async fn test_handler() -> &'static str {
        "OK"
    }

    fn create_test_app(state: AppState) -> Router {
        Router::new()
            .route("/test", get(test_handler))
            .layer(axum::middleware::from_fn_with_state(
                state.clone(),
                auth_middleware,
            ))
            .with_state(state)
    }

    #[tokio::test]
    async fn test_auth_middleware_with_valid_bearer_token() {
        let app = create_test_app(create_test_state(Some("test-key-123")));

        let request = Request::builder()
            .uri("/test")
            .header("authorization", "Bearer test-key-123")
            .body(Body::empty())
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_auth_middleware_with_valid_x_api_key() {
        let app = create_test_app(create_test_state(Some("test-key-123")));

        let request = Request::builder()
            .uri("/test")
            .header("x-api-key", "test-key-123")
            .body(Body::empty())
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_auth_middleware_with_invalid_bearer_token() {
        let app = create_test_app(create_test_state(Some("test-key-123")));

        let request = Request::builder()
            .uri("/test")
            .header("authorization", "Bearer wrong-key")
            .body(Body::empty())
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_auth_middleware_with_missing_auth() {
        let app = create_test_app(create_test_state(Some("test-key-123")));

        let request = Request::builder().uri("/test").body(Body::empty()).unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_auth_middleware_bearer_without_prefix() {
        let app = create_test_app(create_test_state(Some("test-key-123")));

        // Token without "Bearer " prefix
        let request = Request::builder()
            .uri("/test")
            .header("authorization", "test-key-123")
            .body(Body::empty())
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_no_configured_key_allows_all() {
        let app = create_test_app(create_test_state(None));

        let request = Request::builder().uri("/test").body(Body::empty()).unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
