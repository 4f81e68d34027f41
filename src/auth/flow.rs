use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use super::listener::{CallbackListener, CallbackSlot, CALLBACK_PATH};
use super::refresh;
use super::store::CredentialStore;
use super::types::{self, AuthorizationRequest, CallbackEvent, Credential};
use crate::config::Config;
use crate::error::ToolError;

/// Opens the consent page for the user
pub trait BrowserLauncher: Send + Sync {
    fn open(&self, url: &str) -> anyhow::Result<()>;
}

/// Launches the system default browser
pub struct SystemBrowser;

impl BrowserLauncher for SystemBrowser {
    fn open(&self, url: &str) -> anyhow::Result<()> {
        open::that(url)?;
        Ok(())
    }
}

/// Drives the authorization-code flow end to end.
///
/// Only one attempt runs at a time: the attempt lock guards the callback
/// port and the callback slot. A second caller is rejected rather than queued.
pub struct Authenticator {
    config: Arc<Config>,
    client: Client,
    store: CredentialStore,
    browser: Arc<dyn BrowserLauncher>,
    slot: CallbackSlot,
    attempt: Mutex<()>,
}

impl Authenticator {
    pub fn new(
        config: Arc<Config>,
        client: Client,
        store: CredentialStore,
        browser: Arc<dyn BrowserLauncher>,
    ) -> Self {
        Self {
            config,
            client,
            store,
            browser,
            slot: CallbackSlot::new(),
            attempt: Mutex::new(()),
        }
    }

    /// Run one interactive login and persist the resulting credential
    pub async fn authenticate(&self) -> Result<Credential, ToolError> {
        let (client_id, client_secret) = self.config.client_credentials().ok_or_else(|| {
            ToolError::Configuration(
                "Missing YouTube API credentials. Please set the YOUTUBE_CLIENT_ID and \
                 YOUTUBE_CLIENT_SECRET environment variables."
                    .to_string(),
            )
        })?;

        let _attempt = self
            .attempt
            .try_lock()
            .map_err(|_| ToolError::AuthInProgress)?;

        // A capture left over from an earlier attempt must never satisfy this one
        self.slot.reset();

        let timeout = Duration::from_secs(self.config.auth_timeout);
        let expected_state = types::new_state();
        let listener = CallbackListener::start(
            self.config.callback_port,
            self.slot.clone(),
            expected_state.clone(),
            timeout,
        )
        .await?;

        let redirect_uri = format!(
            "http://localhost:{}{}",
            listener.local_addr().port(),
            CALLBACK_PATH
        );
        let request = match AuthorizationRequest::with_state(
            &self.config.endpoints.auth_url,
            client_id,
            &redirect_uri,
            &self.config.scopes,
            expected_state,
        ) {
            Ok(request) => request,
            Err(e) => {
                listener.stop().await;
                return Err(ToolError::Configuration(format!(
                    "Invalid authorization URL: {}",
                    e
                )));
            }
        };

        tracing::info!(
            "Please authorize this app by visiting this URL: {}",
            request.authorization_url
        );
        if let Err(e) = self.browser.open(&request.authorization_url) {
            tracing::warn!("Could not open a browser ({}), open the URL manually", e);
        }

        let outcome = self.wait_for_callback(&listener, timeout).await;
        let exit = listener.stop().await;
        tracing::debug!("Callback listener exit: {:?}", exit);

        let callback = match outcome? {
            CallbackEvent::Authorized(callback) => callback,
            CallbackEvent::Denied { error, .. } => {
                return Err(ToolError::Provider {
                    status: 400,
                    message: format!("authorization was not granted: {}", error),
                });
            }
        };

        if callback.state != request.expected_state {
            tracing::warn!("OAuth state mismatch, discarding callback");
            return Err(ToolError::CallbackRejected(
                "state parameter does not match this authentication attempt".to_string(),
            ));
        }

        let token = refresh::exchange_authorization_code(
            &self.client,
            &self.config.endpoints.token_url,
            client_id,
            client_secret,
            &callback.code,
            &request.redirect_uri,
        )
        .await?;

        let credential = Credential {
            access_token: token.access_token,
            refresh_token: token.refresh_token,
            expiry: Some(token.expires_at),
            scopes: token.scopes.unwrap_or(request.scopes),
            client_id: client_id.to_string(),
            client_secret: client_secret.to_string(),
            token_uri: self.config.endpoints.token_url.clone(),
        };

        if credential.refresh_token.is_none() {
            tracing::warn!("Provider did not issue a refresh token; login will be needed on expiry");
        }

        self.store.save(&credential)?;
        tracing::info!("✅ Authentication successful, credential stored");

        Ok(credential)
    }

    /// Wait for the slot to fill, the listener to stop, or the wall clock to run out
    async fn wait_for_callback(
        &self,
        listener: &CallbackListener,
        timeout: Duration,
    ) -> Result<CallbackEvent, ToolError> {
        tokio::select! {
            biased;

            event = self.slot.captured() => event.ok_or_else(|| {
                ToolError::Timeout("callback slot closed before a callback arrived".to_string())
            }),

            _ = listener.stopped() => self.slot.current().ok_or_else(|| {
                ToolError::Timeout(
                    "callback listener stopped before receiving an authorization code".to_string(),
                )
            }),

            _ = tokio::time::sleep(timeout) => Err(ToolError::Timeout(format!(
                "no authorization received within {} seconds. Please try again.",
                timeout.as_secs()
            ))),
        }
    }
}
