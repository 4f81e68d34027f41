// Credential persistence: one JSON file per user, replaced atomically

use anyhow::Context;
use reqwest::Client;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use super::refresh;
use super::types::Credential;
use crate::error::ToolError;

/// Reads, writes and refreshes the persisted credential
#[derive(Debug, Clone)]
pub struct CredentialStore {
    /// Path of the credential file
    path: PathBuf,

    /// HTTP client for refresh requests
    client: Client,
}

impl CredentialStore {
    pub fn new(path: PathBuf, client: Client) -> Self {
        Self { path, client }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the stored credential. `Ok(None)` when no file exists.
    pub fn load(&self) -> Result<Option<Credential>, ToolError> {
        let json = match fs::read_to_string(&self.path) {
            Ok(json) => json,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(ToolError::Io(e)),
        };

        let creds: Credential = serde_json::from_str(&json).with_context(|| {
            format!("Failed to parse credential file: {}", self.path.display())
        })?;

        Ok(Some(creds))
    }

    /// Persist the credential.
    ///
    /// The JSON is written to a temporary file in the same directory and then
    /// renamed over the target, so readers see either the old file or the new
    /// one. The file is readable by the owner only.
    pub fn save(&self, creds: &Credential) -> Result<(), ToolError> {
        let dir = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        fs::create_dir_all(dir)?;

        let json = serde_json::to_vec_pretty(creds).context("Failed to serialize credential")?;

        // NamedTempFile is created with 0600 on unix and removed if we bail out early
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(&json)?;
        tmp.as_file().sync_all()?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(tmp.path(), fs::Permissions::from_mode(0o600))?;
        }

        tmp.persist(&self.path).map_err(|e| ToolError::Io(e.error))?;

        tracing::debug!("Credential saved to {}", self.path.display());
        Ok(())
    }

    /// Remove the stored credential; a missing file is not an error
    pub fn delete(&self) -> Result<(), ToolError> {
        match fs::remove_file(&self.path) {
            Ok(()) => {
                tracing::info!("Removed stored credential {}", self.path.display());
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ToolError::Io(e)),
        }
    }

    /// Whether the credential can be used for API calls right now
    pub fn is_valid(&self, creds: &Credential) -> bool {
        !creds.access_token.is_empty() && !creds.is_expired()
    }

    /// Return a credential whose access token is usable.
    ///
    /// - not expired: returned unchanged, no network call
    /// - expired with a refresh token: refreshed, persisted and returned;
    ///   if the refresh fails the stored file is deleted and `RefreshFailed`
    ///   is returned, forcing a new login
    /// - expired without a refresh token: `NotAuthenticated`
    pub async fn refresh_if_needed(&self, mut creds: Credential) -> Result<Credential, ToolError> {
        if self.is_valid(&creds) {
            return Ok(creds);
        }

        if !creds.can_refresh() {
            tracing::warn!("Stored access token expired and no refresh token is available");
            return Err(ToolError::NotAuthenticated);
        }

        match refresh::refresh_access_token(&self.client, &creds).await {
            Ok(data) => {
                creds.apply_refresh(data);
                self.save(&creds)?;
                Ok(creds)
            }
            Err(e) => {
                tracing::error!("Token refresh failed: {}", e);
                if let Err(delete_err) = self.delete() {
                    tracing::error!("Failed to remove unusable credential: {}", delete_err);
                }
                Err(ToolError::RefreshFailed(e.to_string()))
            }
        }
    }
}
