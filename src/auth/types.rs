// Authentication types

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

/// Seconds shaved off `expires_in` so a token is refreshed before the provider rejects it
pub const EXPIRY_BUFFER_SECS: i64 = 60;

/// Persisted credential.
///
/// Field names follow the layout Google's client libraries write
/// (`token`, `refresh_token`, `token_uri`, ...), so an existing token file
/// from those tools loads unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Credential {
    #[serde(rename = "token")]
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expiry: Option<DateTime<Utc>>,
    #[serde(default)]
    pub scopes: Vec<String>,
    pub client_id: String,
    pub client_secret: String,
    pub token_uri: String,
}

impl Credential {
    /// True once the access token is past its expiry.
    /// A credential without expiry information never expires.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        match self.expiry {
            None => false,
            Some(exp) => now >= exp,
        }
    }

    /// Whether a refresh grant can be attempted
    pub fn can_refresh(&self) -> bool {
        self.refresh_token
            .as_deref()
            .is_some_and(|t| !t.is_empty())
    }

    /// Apply a refresh response in place.
    /// Providers may omit the refresh token on refresh; the old one stays.
    pub fn apply_refresh(&mut self, data: TokenData) {
        self.access_token = data.access_token;
        self.expiry = Some(data.expires_at);
        if let Some(refresh_token) = data.refresh_token {
            self.refresh_token = Some(refresh_token);
        }
        if let Some(scopes) = data.scopes {
            self.scopes = scopes;
        }
    }
}

/// Token data from a token endpoint response
#[derive(Debug, Clone)]
pub struct TokenData {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub scopes: Option<Vec<String>>,
}

/// Token endpoint response (authorization_code and refresh_token grants)
#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_in: Option<u64>,
    pub scope: Option<String>,
    #[allow(dead_code)]
    pub token_type: Option<String>,
}

impl TokenResponse {
    pub fn into_token_data(self) -> TokenData {
        let expires_in = self.expires_in.unwrap_or(3600) as i64;
        let expires_at = Utc::now() + Duration::seconds(expires_in - EXPIRY_BUFFER_SECS);

        TokenData {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            expires_at,
            scopes: self
                .scope
                .map(|s| s.split_whitespace().map(str::to_string).collect()),
        }
    }
}

/// One authentication attempt's authorization request
#[derive(Debug, Clone)]
pub struct AuthorizationRequest {
    pub authorization_url: String,
    pub expected_state: String,
    pub redirect_uri: String,
    pub scopes: Vec<String>,
}

impl AuthorizationRequest {
    /// Build the consent URL for the authorization-code grant with offline access.
    /// A fresh anti-forgery state is generated for every request.
    pub fn new(
        auth_url: &str,
        client_id: &str,
        redirect_uri: &str,
        scopes: &[String],
    ) -> Result<Self, url::ParseError> {
        Self::with_state(auth_url, client_id, redirect_uri, scopes, new_state())
    }

    /// Same as `new` with a state chosen by the caller
    pub fn with_state(
        auth_url: &str,
        client_id: &str,
        redirect_uri: &str,
        scopes: &[String],
        expected_state: String,
    ) -> Result<Self, url::ParseError> {
        let mut url = Url::parse(auth_url)?;
        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", client_id)
            .append_pair("redirect_uri", redirect_uri)
            .append_pair("scope", &scopes.join(" "))
            .append_pair("state", &expected_state)
            .append_pair("access_type", "offline")
            .append_pair("include_granted_scopes", "true")
            .append_pair("prompt", "consent");

        Ok(Self {
            authorization_url: url.to_string(),
            expected_state,
            redirect_uri: redirect_uri.to_string(),
            scopes: scopes.to_vec(),
        })
    }
}

/// Random anti-forgery state for one authentication attempt
pub fn new_state() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Authorization code and state captured by the loopback listener
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackResult {
    pub code: String,
    pub state: String,
}

/// What the provider sent to the callback path
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackEvent {
    /// User granted consent
    Authorized(CallbackResult),
    /// Provider redirected with `error=...` (e.g. access_denied)
    Denied {
        error: String,
        state: Option<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credential(expiry: Option<DateTime<Utc>>) -> Credential {
        Credential {
            access_token: "ya29.token".to_string(),
            refresh_token: Some("1//refresh".to_string()),
            expiry,
            scopes: vec!["https://www.googleapis.com/auth/youtube.upload".to_string()],
            client_id: "client".to_string(),
            client_secret: "secret".to_string(),
            token_uri: "https://oauth2.googleapis.com/token".to_string(),
        }
    }

    #[test]
    fn test_expiry_checks() {
        let now = Utc::now();
        assert!(!credential(Some(now + Duration::seconds(600))).is_expired_at(now));
        assert!(credential(Some(now - Duration::seconds(1))).is_expired_at(now));
        assert!(!credential(None).is_expired_at(now));
    }

    #[test]
    fn test_can_refresh() {
        let mut creds = credential(None);
        assert!(creds.can_refresh());
        creds.refresh_token = Some(String::new());
        assert!(!creds.can_refresh());
        creds.refresh_token = None;
        assert!(!creds.can_refresh());
    }

    #[test]
    fn test_serialized_field_names() {
        let value = serde_json::to_value(credential(None)).unwrap();
        assert_eq!(value["token"], "ya29.token");
        assert_eq!(value["refresh_token"], "1//refresh");
        assert!(value.get("access_token").is_none());
    }

    #[test]
    fn test_parses_google_library_token_file() {
        let json = r#"{
            "token": "ya29.a0",
            "refresh_token": "1//0g",
            "token_uri": "https://oauth2.googleapis.com/token",
            "client_id": "id.apps.googleusercontent.com",
            "client_secret": "secret",
            "scopes": ["https://www.googleapis.com/auth/youtube"],
            "universe_domain": "googleapis.com",
            "account": "",
            "expiry": "2025-01-12T10:30:00.123456Z"
        }"#;
        let creds: Credential = serde_json::from_str(json).unwrap();
        assert_eq!(creds.access_token, "ya29.a0");
        assert_eq!(
            creds.expiry.unwrap().to_rfc3339(),
            "2025-01-12T10:30:00.123456+00:00"
        );
    }

    #[test]
    fn test_apply_refresh_keeps_old_refresh_token() {
        let mut creds = credential(Some(Utc::now() - Duration::seconds(10)));
        let expires_at = Utc::now() + Duration::seconds(3000);
        creds.apply_refresh(TokenData {
            access_token: "new".to_string(),
            refresh_token: None,
            expires_at,
            scopes: None,
        });

        assert_eq!(creds.access_token, "new");
        assert_eq!(creds.refresh_token.as_deref(), Some("1//refresh"));
        assert_eq!(creds.expiry, Some(expires_at));
        assert!(!creds.is_expired());
    }

    #[test]
    fn test_token_response_expiry_has_buffer() {
        let response = TokenResponse {
            access_token: "a".to_string(),
            refresh_token: None,
            expires_in: Some(3599),
            scope: Some("scope-a scope-b".to_string()),
            token_type: Some("Bearer".to_string()),
        };
        let data = response.into_token_data();
        let remaining = (data.expires_at - Utc::now()).num_seconds();
        assert!(remaining <= 3599 - EXPIRY_BUFFER_SECS);
        assert!(remaining > 3000);
        assert_eq!(data.scopes.unwrap(), vec!["scope-a", "scope-b"]);
    }

    #[test]
    fn test_authorization_url_parameters() {
        let scopes = vec!["scope-a".to_string(), "scope-b".to_string()];
        let request = AuthorizationRequest::new(
            "https://accounts.google.com/o/oauth2/auth",
            "client-123",
            "http://localhost:8080/oauth2callback",
            &scopes,
        )
        .unwrap();

        let url = Url::parse(&request.authorization_url).unwrap();
        let params: std::collections::HashMap<_, _> = url.query_pairs().into_owned().collect();

        assert_eq!(params["client_id"], "client-123");
        assert_eq!(params["redirect_uri"], "http://localhost:8080/oauth2callback");
        assert_eq!(params["scope"], "scope-a scope-b");
        assert_eq!(params["access_type"], "offline");
        assert_eq!(params["prompt"], "consent");
        assert_eq!(params["response_type"], "code");
        assert_eq!(params["state"], request.expected_state);
    }

    #[test]
    fn test_state_is_fresh_per_request() {
        let scopes = vec!["s".to_string()];
        let a = AuthorizationRequest::new("https://a.example/auth", "c", "http://localhost/cb", &scopes)
            .unwrap();
        let b = AuthorizationRequest::new("https://a.example/auth", "c", "http://localhost/cb", &scopes)
            .unwrap();
        assert_ne!(a.expected_state, b.expected_state);
    }

    #[test]
    fn test_with_state_keeps_caller_state() {
        let scopes = vec!["s".to_string()];
        let request = AuthorizationRequest::with_state(
            "https://a.example/auth",
            "c",
            "http://localhost/cb",
            &scopes,
            "fixed-state".to_string(),
        )
        .unwrap();

        assert_eq!(request.expected_state, "fixed-state");
        let url = Url::parse(&request.authorization_url).unwrap();
        assert!(url.query_pairs().any(|(k, v)| k == "state" && v == "fixed-state"));
    }
}
