// Authentication module
// Loopback authorization-code login, token refresh and credential storage

mod flow;
mod listener;
mod refresh;
mod store;
mod types;

pub use flow::{Authenticator, BrowserLauncher, SystemBrowser};
pub use listener::{CallbackListener, CallbackSlot, ListenerExit, ListenerState, CALLBACK_PATH};
pub use store::CredentialStore;
pub use types::{AuthorizationRequest, CallbackEvent, CallbackResult, Credential};
