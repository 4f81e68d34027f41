use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use dialoguer::{Confirm, Input, Password};
use std::io::Write;
use std::path::PathBuf;

use crate::media::PrivacyStatus;

/// Default OAuth scopes requested for upload and channel access
pub const DEFAULT_SCOPES: [&str; 4] = [
    "https://www.googleapis.com/auth/youtube",
    "https://www.googleapis.com/auth/youtube.upload",
    "https://www.googleapis.com/auth/youtube.readonly",
    "https://www.googleapis.com/auth/youtube.force-ssl",
];

const DEFAULT_TOKEN_FILE_NAME: &str = ".youtube-upload-agent-token.json";
const DEFAULT_DOWNLOAD_DIR_NAME: &str = "youtube-upload-agent";

/// YouTube Upload Agent - OAuth login and video upload tools
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub args: CliArgs,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Run the HTTP tool server (default)
    Serve,
    /// Report whether a usable credential is stored
    Status,
    /// Run the browser OAuth flow and store the credential
    Login,
    /// Download a video from a URL and upload it to YouTube
    Upload(UploadArgs),
    /// Interactive first-time setup
    Setup,
}

#[derive(Args, Debug, Clone)]
pub struct UploadArgs {
    /// Public URL of the video to download
    #[arg(long)]
    pub url: String,

    /// Video title
    #[arg(long)]
    pub title: String,

    /// Video description
    #[arg(long, default_value = "")]
    pub description: String,

    /// Video tag (repeatable)
    #[arg(long = "tag")]
    pub tags: Vec<String>,

    /// Privacy status
    #[arg(long, value_enum, default_value_t = PrivacyStatus::Private)]
    pub privacy: PrivacyStatus,
}

#[derive(Args, Debug, Clone)]
pub struct CliArgs {
    /// Tool server host address
    #[arg(short = 'H', long, env = "SERVER_HOST", default_value = "127.0.0.1")]
    pub host: String,

    /// Tool server port
    #[arg(short, long, env = "SERVER_PORT", default_value = "8765")]
    pub port: u16,

    /// API key required by the HTTP tool routes
    #[arg(short = 'k', long, env = "TOOL_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// OAuth client id
    #[arg(long, env = "YOUTUBE_CLIENT_ID")]
    pub client_id: Option<String>,

    /// OAuth client secret
    #[arg(long, env = "YOUTUBE_CLIENT_SECRET", hide_env_values = true)]
    pub client_secret: Option<String>,

    /// Local port for the OAuth redirect listener
    #[arg(long, env = "OAUTH_CALLBACK_PORT", default_value = "8080")]
    pub callback_port: u16,

    /// Seconds to wait for the browser callback
    #[arg(long, env = "AUTH_TIMEOUT", default_value = "300")]
    pub auth_timeout: u64,

    /// Path to the credential file
    #[arg(long, env = "TOKEN_FILE")]
    pub token_file: Option<String>,

    /// Directory for downloaded videos
    #[arg(long, env = "DOWNLOAD_DIR")]
    pub download_dir: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// HTTP connect timeout in seconds
    #[arg(long, env = "HTTP_CONNECT_TIMEOUT", default_value = "30")]
    pub http_connect_timeout: u64,

    /// HTTP request timeout in seconds
    #[arg(long, env = "HTTP_REQUEST_TIMEOUT", default_value = "3600")]
    pub http_timeout: u64,

    #[arg(long, env = "YOUTUBE_AUTH_URL", hide = true)]
    pub auth_url: Option<String>,

    #[arg(long, env = "YOUTUBE_TOKEN_URL", hide = true)]
    pub token_url: Option<String>,

    #[arg(long, env = "YOUTUBE_UPLOAD_URL", hide = true)]
    pub upload_url: Option<String>,

    #[arg(long, env = "YOUTUBE_WATCH_URL", hide = true)]
    pub watch_url: Option<String>,
}

/// Identity provider and API endpoints
#[derive(Clone, Debug, PartialEq)]
pub struct ProviderEndpoints {
    pub auth_url: String,
    pub token_url: String,
    pub upload_url: String,
    pub watch_url: String,
}

impl Default for ProviderEndpoints {
    fn default() -> Self {
        Self {
            auth_url: "https://accounts.google.com/o/oauth2/auth".to_string(),
            token_url: "https://oauth2.googleapis.com/token".to_string(),
            upload_url: "https://www.googleapis.com/upload/youtube/v3/videos".to_string(),
            watch_url: "https://www.youtube.com/watch".to_string(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Config {
    // Tool server settings
    pub server_host: String,
    pub server_port: u16,
    pub tool_api_key: Option<String>,

    // OAuth client
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub callback_port: u16,
    pub auth_timeout: u64,
    pub scopes: Vec<String>,
    pub endpoints: ProviderEndpoints,

    // Storage
    pub token_file: PathBuf,
    pub download_dir: PathBuf,

    // HTTP client
    pub http_connect_timeout: u64,
    pub http_request_timeout: u64,

    pub log_level: String,
}

impl Config {
    /// Load configuration from all sources with priority: CLI > ENV > defaults
    pub fn load() -> Result<(Self, Command)> {
        // Load .env file if it exists
        dotenvy::dotenv().ok();

        let cli = Cli::parse();
        let config = Self::from_args(cli.args)?;

        Ok((config, cli.command.unwrap_or(Command::Serve)))
    }

    /// Build configuration from parsed arguments
    pub fn from_args(args: CliArgs) -> Result<Self> {
        let defaults = ProviderEndpoints::default();

        let token_file = match args.token_file {
            Some(path) => expand_tilde(&path),
            None => default_token_file()?,
        };

        let download_dir = args
            .download_dir
            .map(|s| expand_tilde(&s))
            .unwrap_or_else(default_download_dir);

        Ok(Config {
            server_host: args.host,
            server_port: args.port,
            tool_api_key: non_empty(args.api_key),

            client_id: non_empty(args.client_id),
            client_secret: non_empty(args.client_secret),
            callback_port: args.callback_port,
            auth_timeout: args.auth_timeout,
            scopes: DEFAULT_SCOPES.iter().map(|s| s.to_string()).collect(),
            endpoints: ProviderEndpoints {
                auth_url: args.auth_url.unwrap_or(defaults.auth_url),
                token_url: args.token_url.unwrap_or(defaults.token_url),
                upload_url: args.upload_url.unwrap_or(defaults.upload_url),
                watch_url: args.watch_url.unwrap_or(defaults.watch_url),
            },

            token_file,
            download_dir,

            http_connect_timeout: args.http_connect_timeout,
            http_request_timeout: args.http_timeout,

            log_level: args.log_level,
        })
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.auth_timeout == 0 {
            anyhow::bail!("AUTH_TIMEOUT must be greater than zero");
        }

        for url in [
            &self.endpoints.auth_url,
            &self.endpoints.token_url,
            &self.endpoints.upload_url,
            &self.endpoints.watch_url,
        ] {
            url::Url::parse(url).with_context(|| format!("Invalid endpoint URL: {}", url))?;
        }

        Ok(())
    }

    /// Client id and secret, if both are configured
    pub fn client_credentials(&self) -> Option<(&str, &str)> {
        match (&self.client_id, &self.client_secret) {
            (Some(id), Some(secret)) => Some((id.as_str(), secret.as_str())),
            _ => None,
        }
    }
}

/// Default credential file under the user's home directory
fn default_token_file() -> Result<PathBuf> {
    let home = dirs::home_dir().context("Could not determine home directory for TOKEN_FILE")?;
    Ok(home.join(DEFAULT_TOKEN_FILE_NAME))
}

fn default_download_dir() -> PathBuf {
    std::env::temp_dir().join(DEFAULT_DOWNLOAD_DIR_NAME)
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}

/// Expand tilde (~) in file paths to user's home directory
fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

#[cfg(test)]
pub(crate) fn test_config(dir: &std::path::Path) -> Config {
    Config {
        server_host: "127.0.0.1".to_string(),
        server_port: 0,
        tool_api_key: None,
        client_id: Some("test-client-id.apps.googleusercontent.com".to_string()),
        client_secret: Some("test-client-secret".to_string()),
        callback_port: 0,
        auth_timeout: 5,
        scopes: DEFAULT_SCOPES.iter().map(|s| s.to_string()).collect(),
        endpoints: ProviderEndpoints::default(),
        token_file: dir.join("token.json"),
        download_dir: dir.join("downloads"),
        http_connect_timeout: 5,
        http_request_timeout: 30,
        log_level: "debug".to_string(),
    }
}


// === Interactive Setup ===

/// Check if interactive setup is needed (no .env file and missing client secrets)
pub fn needs_interactive_setup() -> bool {
    let env_file_exists = std::path::Path::new(".env").exists();

    let has_client_id = std::env::var("YOUTUBE_CLIENT_ID").is_ok();
    let has_client_secret = std::env::var("YOUTUBE_CLIENT_SECRET").is_ok();

    !env_file_exists && (!has_client_id || !has_client_secret)
}

/// Configuration collected from interactive setup
#[derive(Debug, Clone)]
pub struct InteractiveConfig {
    pub client_id: String,
    pub client_secret: String,
    pub callback_port: String,
}

/// Run interactive setup to collect the OAuth client registration
pub fn run_interactive_setup() -> Result<InteractiveConfig> {
    println!();
    println!("YouTube Upload Agent - First Time Setup");
    println!();
    println!("Create an OAuth client (type: Web application) in the Google Cloud console");
    println!("and add http://localhost:<port>/oauth2callback as an authorized redirect URI.");
    println!();

    let client_id: String = Input::new()
        .with_prompt("OAuth client id (YOUTUBE_CLIENT_ID)")
        .interact_text()
        .context("Failed to read YOUTUBE_CLIENT_ID")?;

    if client_id.trim().is_empty() {
        anyhow::bail!("YOUTUBE_CLIENT_ID cannot be empty");
    }

    let client_secret: String = Password::new()
        .with_prompt("OAuth client secret (YOUTUBE_CLIENT_SECRET)")
        .interact()
        .context("Failed to read YOUTUBE_CLIENT_SECRET")?;

    if client_secret.trim().is_empty() {
        anyhow::bail!("YOUTUBE_CLIENT_SECRET cannot be empty");
    }

    let callback_port: String = Input::new()
        .with_prompt("Callback port")
        .default("8080".to_string())
        .interact_text()
        .context("Failed to read callback port")?;

    callback_port
        .parse::<u16>()
        .with_context(|| format!("Invalid callback port: {}", callback_port))?;

    let config = InteractiveConfig {
        client_id,
        client_secret,
        callback_port,
    };

    println!();
    let save_to_env = Confirm::new()
        .with_prompt("Save configuration to .env file?")
        .default(true)
        .interact()
        .context("Failed to read save confirmation")?;

    if save_to_env {
        save_env_file(&config)?;
        println!();
        println!("Configuration saved to .env file");
    }

    Ok(config)
}

/// Save configuration to .env file
fn save_env_file(config: &InteractiveConfig) -> Result<()> {
    let env_content = format!(
        r#"# YouTube Upload Agent Configuration
# Generated by interactive setup

# OAuth client registration (required for login)
YOUTUBE_CLIENT_ID={}
YOUTUBE_CLIENT_SECRET={}

# Local redirect listener
OAUTH_CALLBACK_PORT={}

# Logging (trace, debug, info, warn, error)
LOG_LEVEL=info
"#,
        config.client_id, config.client_secret, config.callback_port,
    );

    let mut file = std::fs::File::create(".env").context("Failed to create .env file")?;
    file.write_all(env_content.as_bytes())
        .context("Failed to write .env file")?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(".env", std::fs::Permissions::from_mode(0o600))
            .context("Failed to restrict .env permissions")?;
    }

    Ok(())
}
