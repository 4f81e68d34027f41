// Loopback callback listener for the OAuth redirect
//
// A one-shot axum server bound to 127.0.0.1. Only callbacks carrying this
// attempt's state are accepted. The handler stores the captured code/state in
// a `CallbackSlot` owned by the orchestrator and then signals the serve loop
// to shut down gracefully, so the success page is still written to the
// browser.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::get,
    Router,
};
use serde::Deserialize;
use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;

use super::types::{CallbackEvent, CallbackResult};
use crate::error::ToolError;

/// Redirect path registered with the identity provider
pub const CALLBACK_PATH: &str = "/oauth2callback";

/// How long `stop` waits for in-flight connections before aborting the server
const STOP_GRACE: Duration = Duration::from_secs(5);

const SUCCESS_PAGE: &str = r#"<!DOCTYPE html>
<html>
<head><title>Authentication Successful</title></head>
<body style="font-family: system-ui; text-align: center; padding-top: 80px;">
<h1>Authentication Successful!</h1>
<p>You can close this window and return to your agent.</p>
</body>
</html>"#;

const DENIED_PAGE: &str = r#"<!DOCTYPE html>
<html>
<head><title>Authentication Cancelled</title></head>
<body style="font-family: system-ui; text-align: center; padding-top: 80px;">
<h1>Authentication was not completed</h1>
<p>Access was not granted. You can close this window and try again.</p>
</body>
</html>"#;

const REJECTED_PAGE: &str = r#"<!DOCTYPE html>
<html>
<head><title>Invalid Callback</title></head>
<body style="font-family: system-ui; text-align: center; padding-top: 80px;">
<h1>Invalid callback</h1>
<p>The request is incomplete or does not belong to the current sign-in attempt.</p>
</body>
</html>"#;

/// Lifecycle of one listener instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    Idle,
    Listening,
    Captured,
    ShuttingDown,
    Stopped,
}

/// Why the serve loop ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenerExit {
    /// A complete callback (grant or denial) was handled
    Completed,
    /// Nothing arrived within the listener timeout
    TimedOut,
    /// Stopped by the owner before a callback arrived
    Cancelled,
    /// The server failed
    Failed(String),
}

/// Single-assignment handoff of the captured callback.
///
/// Owned by the orchestrator and cloned into each listener. The first
/// complete callback wins; later ones are ignored until `reset`.
#[derive(Debug, Clone)]
pub struct CallbackSlot {
    tx: Arc<watch::Sender<Option<CallbackEvent>>>,
}

impl Default for CallbackSlot {
    fn default() -> Self {
        Self::new()
    }
}

impl CallbackSlot {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    /// Clear any previous capture
    pub fn reset(&self) {
        self.tx.send_replace(None);
    }

    /// Store the event if the slot is empty. Returns false if it was already filled.
    pub(crate) fn capture(&self, event: CallbackEvent) -> bool {
        self.tx.send_if_modified(|slot| {
            if slot.is_none() {
                *slot = Some(event);
                true
            } else {
                false
            }
        })
    }

    pub fn current(&self) -> Option<CallbackEvent> {
        self.tx.borrow().clone()
    }

    /// Wait until the slot holds an event
    pub async fn captured(&self) -> Option<CallbackEvent> {
        let mut rx = self.tx.subscribe();
        let event = match rx.wait_for(Option::is_some).await {
            Ok(event) => (*event).clone(),
            Err(_) => None,
        };
        event
    }
}

/// Query parameters the provider appends to the redirect URI
#[derive(Debug, Default, Deserialize)]
pub(crate) struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
}

/// Decide what a callback request means.
///
/// `None` for anything that is incomplete or whose state is not
/// `expected_state`; such requests never end the attempt.
pub(crate) fn classify(params: CallbackParams, expected_state: &str) -> Option<CallbackEvent> {
    let non_empty = |v: Option<String>| v.filter(|s| !s.is_empty());
    let state = non_empty(params.state).filter(|s| s == expected_state)?;
    let code = non_empty(params.code);

    if let Some(error) = non_empty(params.error) {
        return Some(CallbackEvent::Denied {
            error,
            state: Some(state),
        });
    }

    code.map(|code| CallbackEvent::Authorized(CallbackResult { code, state }))
}

#[derive(Clone)]
struct CallbackContext {
    slot: CallbackSlot,
    expected_state: Arc<str>,
    state: Arc<watch::Sender<ListenerState>>,
    shutdown: Arc<Notify>,
    handled: Arc<AtomicBool>,
}

fn callback_router(ctx: CallbackContext) -> Router {
    Router::new()
        .route(CALLBACK_PATH, get(callback_handler))
        .fallback(not_found)
        .with_state(ctx)
}

/// GET /oauth2callback
async fn callback_handler(
    State(ctx): State<CallbackContext>,
    Query(params): Query<CallbackParams>,
) -> Response {
    let Some(event) = classify(params, &ctx.expected_state) else {
        tracing::warn!("Ignoring incomplete or foreign OAuth callback, still waiting");
        return (StatusCode::BAD_REQUEST, Html(REJECTED_PAGE)).into_response();
    };

    let page = match &event {
        CallbackEvent::Authorized(_) => SUCCESS_PAGE,
        CallbackEvent::Denied { error, .. } => {
            tracing::warn!("Provider redirected with error: {}", error);
            DENIED_PAGE
        }
    };

    let authorized = matches!(event, CallbackEvent::Authorized(_));
    if ctx.slot.capture(event) {
        if authorized {
            ctx.state.send_replace(ListenerState::Captured);
        }
        tracing::info!("OAuth callback received");
    } else {
        tracing::debug!("Ignoring repeated OAuth callback");
    }

    // Only signals; the serve loop finishes writing this response before exiting
    ctx.handled.store(true, Ordering::SeqCst);
    ctx.shutdown.notify_one();

    Html(page).into_response()
}

async fn not_found() -> Response {
    (StatusCode::NOT_FOUND, Html("Not found")).into_response()
}

/// A running loopback listener
pub struct CallbackListener {
    local_addr: SocketAddr,
    state: Arc<watch::Sender<ListenerState>>,
    shutdown: Arc<Notify>,
    task: JoinHandle<ListenerExit>,
}

impl CallbackListener {
    /// Bind `127.0.0.1:port` and start serving in a background task.
    /// Port 0 binds an ephemeral port; see `local_addr`.
    /// Callbacks are accepted only when they carry `expected_state`.
    pub async fn start(
        port: u16,
        slot: CallbackSlot,
        expected_state: String,
        timeout: Duration,
    ) -> Result<Self, ToolError> {
        let (state_tx, _state_rx) = watch::channel(ListenerState::Idle);
        let state = Arc::new(state_tx);

        let listener = TcpListener::bind(("127.0.0.1", port))
            .await
            .map_err(|source| ToolError::ListenerBind { port, source })?;
        let local_addr = listener.local_addr()?;

        let shutdown = Arc::new(Notify::new());
        let handled = Arc::new(AtomicBool::new(false));
        let app = callback_router(CallbackContext {
            slot,
            expected_state: expected_state.into(),
            state: state.clone(),
            shutdown: shutdown.clone(),
            handled: handled.clone(),
        });

        state.send_replace(ListenerState::Listening);
        tracing::info!(
            "OAuth callback listener on http://{}{} (timeout {}s)",
            local_addr,
            CALLBACK_PATH,
            timeout.as_secs()
        );

        let task = tokio::spawn(run_server(
            listener,
            app,
            state.clone(),
            shutdown.clone(),
            handled,
            timeout,
        ));

        Ok(Self {
            local_addr,
            state,
            shutdown,
            task,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn state(&self) -> ListenerState {
        *self.state.borrow()
    }

    /// Resolves once the serve loop has exited and the port is released
    pub async fn stopped(&self) {
        let mut rx = self.state.subscribe();
        let _ = rx.wait_for(|s| *s == ListenerState::Stopped).await;
    }

    /// Stop accepting connections and wait for the serve loop to exit
    pub async fn stop(mut self) -> ListenerExit {
        if !self.task.is_finished() {
            self.shutdown.notify_one();
        }

        match tokio::time::timeout(STOP_GRACE, &mut self.task).await {
            Ok(Ok(exit)) => exit,
            Ok(Err(join_err)) => {
                self.state.send_replace(ListenerState::Stopped);
                ListenerExit::Failed(join_err.to_string())
            }
            Err(_) => {
                tracing::warn!("Callback listener did not drain in time, aborting");
                self.task.abort();
                let _ = (&mut self.task).await;
                self.state.send_replace(ListenerState::Stopped);
                ListenerExit::Cancelled
            }
        }
    }
}

impl Drop for CallbackListener {
    fn drop(&mut self) {
        // Dropping the serve future closes the socket
        if !self.task.is_finished() {
            self.task.abort();
        }
    }
}

async fn run_server(
    listener: TcpListener,
    app: Router,
    state: Arc<watch::Sender<ListenerState>>,
    shutdown: Arc<Notify>,
    handled: Arc<AtomicBool>,
    timeout: Duration,
) -> ListenerExit {
    let signal = {
        let state = state.clone();
        async move {
            shutdown.notified().await;
            state.send_replace(ListenerState::ShuttingDown);
        }
    };

    let server = axum::serve(listener, app)
        .with_graceful_shutdown(signal)
        .into_future();

    let exit = match tokio::time::timeout(timeout, server).await {
        Ok(Ok(())) if handled.load(Ordering::SeqCst) => ListenerExit::Completed,
        Ok(Ok(())) => ListenerExit::Cancelled,
        Ok(Err(e)) => {
            tracing::error!("Callback listener failed: {}", e);
            ListenerExit::Failed(e.to_string())
        }
        Err(_) => {
            tracing::warn!(
                "No OAuth callback within {}s, stopping listener",
                timeout.as_secs()
            );
            ListenerExit::TimedOut
        }
    };

    state.send_replace(ListenerState::Stopped);
    tracing::debug!("Callback listener stopped: {:?}", exit);
    exit
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const WAIT: Duration = Duration::from_secs(5);

    async fn start(slot: &CallbackSlot, timeout: Duration) -> (CallbackListener, u16) {
        let listener = CallbackListener::start(0, slot.clone(), "XYZ".to_string(), timeout)
            .await
            .unwrap();
        let port = listener.local_addr().port();
        (listener, port)
    }

    fn callback_url(port: u16, query: &str) -> String {
        format!("http://127.0.0.1:{}{}?{}", port, CALLBACK_PATH, query)
    }

    async fn port_is_free(port: u16) -> bool {
        TcpListener::bind(("127.0.0.1", port)).await.is_ok()
    }

    #[tokio::test]
    async fn test_captures_code_and_state_then_stops() {
        let slot = CallbackSlot::new();
        let (listener, port) = start(&slot, Duration::from_secs(30)).await;
        assert_eq!(listener.state(), ListenerState::Listening);

        let response = reqwest::get(callback_url(port, "state=XYZ&code=ABC123"))
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
        assert!(response.text().await.unwrap().contains("Authentication Successful"));

        assert_eq!(
            slot.current(),
            Some(CallbackEvent::Authorized(CallbackResult {
                code: "ABC123".to_string(),
                state: "XYZ".to_string(),
            }))
        );

        tokio::time::timeout(WAIT, listener.stopped()).await.unwrap();
        assert_eq!(listener.state(), ListenerState::Stopped);
        assert_eq!(listener.stop().await, ListenerExit::Completed);
        assert!(port_is_free(port).await);
    }

    #[tokio::test]
    async fn test_incomplete_callback_keeps_listening() {
        let slot = CallbackSlot::new();
        let (listener, port) = start(&slot, Duration::from_secs(30)).await;

        let response = reqwest::get(callback_url(port, "code=ABC123")).await.unwrap();
        assert_eq!(response.status(), 400);
        assert!(slot.current().is_none());
        assert_eq!(listener.state(), ListenerState::Listening);

        let response = reqwest::get(callback_url(port, "code=ABC123&state=XYZ"))
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
        assert!(slot.current().is_some());

        tokio::time::timeout(WAIT, listener.stopped()).await.unwrap();
    }

    #[tokio::test]
    async fn test_foreign_state_does_not_end_attempt() {
        let slot = CallbackSlot::new();
        let (listener, port) = start(&slot, Duration::from_secs(30)).await;

        let response = reqwest::get(callback_url(port, "code=evil&state=forged"))
            .await
            .unwrap();
        assert_eq!(response.status(), 400);
        assert!(slot.current().is_none());
        assert_eq!(listener.state(), ListenerState::Listening);

        let response = reqwest::get(callback_url(port, "state=XYZ&code=ABC123"))
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
        assert_eq!(
            slot.current(),
            Some(CallbackEvent::Authorized(CallbackResult {
                code: "ABC123".to_string(),
                state: "XYZ".to_string(),
            }))
        );
        tokio::time::timeout(WAIT, listener.stopped()).await.unwrap();
    }

    #[tokio::test]
    async fn test_denial_without_matching_state_is_ignored() {
        let slot = CallbackSlot::new();
        let (listener, port) = start(&slot, Duration::from_secs(30)).await;

        for query in ["error=access_denied", "error=access_denied&state=forged"] {
            let response = reqwest::get(callback_url(port, query)).await.unwrap();
            assert_eq!(response.status(), 400, "{}", query);
        }
        assert!(slot.current().is_none());
        assert_eq!(listener.state(), ListenerState::Listening);

        assert_eq!(listener.stop().await, ListenerExit::Cancelled);
        assert!(port_is_free(port).await);
    }

    #[tokio::test]
    async fn test_unknown_path_is_not_found() {
        let slot = CallbackSlot::new();
        let (listener, port) = start(&slot, Duration::from_secs(30)).await;

        let response = reqwest::get(format!("http://127.0.0.1:{}/favicon.ico", port))
            .await
            .unwrap();
        assert_eq!(response.status(), 404);
        assert_eq!(listener.state(), ListenerState::Listening);

        assert_eq!(listener.stop().await, ListenerExit::Cancelled);
        assert!(port_is_free(port).await);
    }

    #[tokio::test]
    async fn test_provider_denial_is_captured() {
        let slot = CallbackSlot::new();
        let (listener, port) = start(&slot, Duration::from_secs(30)).await;

        let response = reqwest::get(callback_url(port, "error=access_denied&state=XYZ"))
            .await
            .unwrap();
        assert_eq!(response.status(), 200);

        assert_eq!(
            slot.current(),
            Some(CallbackEvent::Denied {
                error: "access_denied".to_string(),
                state: Some("XYZ".to_string()),
            })
        );
        tokio::time::timeout(WAIT, listener.stopped()).await.unwrap();
    }

    #[tokio::test]
    async fn test_times_out_and_releases_port() {
        let slot = CallbackSlot::new();
        let (listener, port) = start(&slot, Duration::from_millis(300)).await;

        tokio::time::timeout(WAIT, listener.stopped()).await.unwrap();
        assert_eq!(listener.stop().await, ListenerExit::TimedOut);
        assert!(slot.current().is_none());
        assert!(port_is_free(port).await);
    }

    #[tokio::test]
    async fn test_port_in_use_is_reported() {
        let holder = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let port = holder.local_addr().unwrap().port();

        let err = CallbackListener::start(
            port,
            CallbackSlot::new(),
            "XYZ".to_string(),
            Duration::from_secs(1),
        )
        .await
        .err()
        .unwrap();
        assert!(matches!(err, ToolError::ListenerBind { port: p, .. } if p == port));
    }

    #[tokio::test]
    async fn test_slot_keeps_first_capture_until_reset() {
        let slot = CallbackSlot::new();
        let first = CallbackEvent::Authorized(CallbackResult {
            code: "one".to_string(),
            state: "s".to_string(),
        });
        let second = CallbackEvent::Authorized(CallbackResult {
            code: "two".to_string(),
            state: "s".to_string(),
        });

        assert!(slot.capture(first.clone()));
        assert!(!slot.capture(second.clone()));
        assert_eq!(slot.captured().await, Some(first));

        slot.reset();
        assert!(slot.current().is_none());
        assert!(slot.capture(second.clone()));
        assert_eq!(slot.current(), Some(second));
    }

    #[tokio::test]
    async fn test_captured_wakes_waiter() {
        let slot = CallbackSlot::new();
        let waiter = {
            let slot = slot.clone();
            tokio::spawn(async move { slot.captured().await })
        };

        tokio::task::yield_now().await;
        slot.capture(CallbackEvent::Denied {
            error: "access_denied".to_string(),
            state: None,
        });

        let event = tokio::time::timeout(WAIT, waiter).await.unwrap().unwrap();
        assert!(matches!(event, Some(CallbackEvent::Denied { .. })));
    }

    #[test]
    fn test_classify_incomplete() {
        assert_eq!(classify(CallbackParams::default(), "XYZ"), None);
        assert_eq!(
            classify(
                CallbackParams {
                    code: Some("abc".to_string()),
                    state: Some(String::new()),
                    error: None,
                },
                ""
            ),
            None
        );
        assert_eq!(
            classify(
                CallbackParams {
                    code: None,
                    state: Some("XYZ".to_string()),
                    error: None,
                },
                "XYZ"
            ),
            None
        );
    }

    proptest! {
        #[test]
        fn test_classify_captures_any_complete_callback(
            code in "[A-Za-z0-9/_.-]{1,64}",
            state in "[A-Za-z0-9_-]{1,64}",
        ) {
            let event = classify(
                CallbackParams {
                    code: Some(code.clone()),
                    state: Some(state.clone()),
                    error: None,
                },
                &state,
            );
            prop_assert_eq!(event, Some(CallbackEvent::Authorized(CallbackResult { code, state })));
        }

        #[test]
        fn test_classify_ignores_any_other_state(
            code in "[A-Za-z0-9/_.-]{1,64}",
            state in "[A-Za-z0-9_-]{1,64}",
            error in proptest::option::of("[a-z_]{1,32}"),
        ) {
            let expected = format!("{}-expected", state);
            let event = classify(
                CallbackParams {
                    code: Some(code),
                    state: Some(state),
                    error,
                },
                &expected,
            );
            prop_assert_eq!(event, None);
        }
    }
}
