use axum::{
    extract::{rejection::JsonRejection, State},
    middleware::{self as axum_middleware},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::middleware;
use crate::tools::{
    self, AuthStatus, AuthenticateOutcome, ToolService, UploadOutcome, UploadRequest,
};

/// Application version from Cargo.toml
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub tools: Arc<ToolService>,
    /// Required on tool routes when set
    pub api_key: Option<String>,
}

/// Health check routes (no authentication required)
pub fn health_routes() -> Router {
    Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_handler))
}

/// Tool routes (API key checked when configured)
pub fn tool_routes(state: AppState) -> Router {
    Router::new()
        .route("/tools", get(list_tools_handler))
        .route("/tools/check_auth_status", post(check_auth_status_handler))
        .route("/tools/authenticate", post(authenticate_handler))
        .route("/tools/upload_from_url", post(upload_from_url_handler))
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::auth_middleware,
        ))
        .with_state(state)
}

/// Build the application with all routes and middleware
pub fn build_app(state: AppState) -> Router {
    Router::new()
        .merge(health_routes())
        .merge(tool_routes(state))
        .layer(TraceLayer::new_for_http())
}

/// GET / - Simple health check
async fn root_handler() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "message": "YouTube Upload Agent is running",
        "version": VERSION
    }))
}

/// GET /health - Detailed health check
async fn health_handler() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": Utc::now().to_rfc3339(),
        "version": VERSION
    }))
}

/// GET /tools - Tool descriptors
async fn list_tools_handler() -> Json<Value> {
    Json(tools::tool_descriptors())
}

async fn check_auth_status_handler(State(state): State<AppState>) -> Json<AuthStatus> {
    tracing::info!("Tool call: check_auth_status");
    Json(state.tools.check_auth_status().await)
}

/// POST /tools/authenticate
///
/// Blocks until the browser callback arrives or the attempt times out.
async fn authenticate_handler(State(state): State<AppState>) -> Json<AuthenticateOutcome> {
    tracing::info!("Tool call: authenticate");
    Json(state.tools.authenticate().await)
}

/// POST /tools/upload_from_url
///
/// Malformed arguments are reported in the tool result like any other failure.
async fn upload_from_url_handler(
    State(state): State<AppState>,
    payload: Result<Json<UploadRequest>, JsonRejection>,
) -> Json<UploadOutcome> {
    let request = match payload {
        Ok(Json(request)) => request,
        Err(rejection) => {
            tracing::warn!("Invalid upload_from_url arguments: {}", rejection.body_text());
            return Json(UploadOutcome::Failed(format!(
                "Invalid arguments: {}",
                rejection.body_text()
            )));
        }
    };

    tracing::info!("Tool call: upload_from_url (url={})", request.url);
    Json(state.tools.upload_from_url(request).await)
}
