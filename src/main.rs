use anyhow::{Context, Result};
use serde::Serialize;
use std::sync::Arc;

use youtube_upload_agent::auth::SystemBrowser;
use youtube_upload_agent::config::{self, Command, Config};
use youtube_upload_agent::http_client;
use youtube_upload_agent::routes;
use youtube_upload_agent::tools::{AuthenticateOutcome, ToolService, UploadOutcome, UploadRequest};

#[tokio::main]
async fn main() -> Result<()> {
    let (mut config, mut command) = Config::load()?;

    if matches!(command, Command::Setup) {
        config::run_interactive_setup()?;
        return Ok(());
    }

    // First login without a client registration: ask for it, then reload
    if matches!(command, Command::Login) && config::needs_interactive_setup() {
        let interactive_config = config::run_interactive_setup()?;

        std::env::set_var("YOUTUBE_CLIENT_ID", &interactive_config.client_id);
        std::env::set_var("YOUTUBE_CLIENT_SECRET", &interactive_config.client_secret);
        std::env::set_var("OAUTH_CALLBACK_PORT", &interactive_config.callback_port);

        (config, command) = Config::load()?;
    }

    config.validate()?;

    // Logs go to stderr; stdout carries tool results
    let log_level = config.log_level.to_lowercase();
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .init();

    if config.client_credentials().is_none() {
        tracing::warn!(
            "YOUTUBE_CLIENT_ID / YOUTUBE_CLIENT_SECRET not set; authenticate will fail until they are"
        );
    }
    tracing::debug!("Credential file: {}", config.token_file.display());

    let client = http_client::build_client(&config)?;
    let config = Arc::new(config);
    let tools = Arc::new(ToolService::new(
        config.clone(),
        client,
        Arc::new(SystemBrowser),
    ));

    match command {
        Command::Serve => serve(&config, tools).await,
        Command::Status => {
            let status = tools.check_auth_status().await;
            let authenticated = status.is_authenticated();
            print_result(&status)?;
            exit_unless(authenticated);
            Ok(())
        }
        Command::Login => {
            let outcome = tools.authenticate().await;
            let success = matches!(outcome, AuthenticateOutcome::Authenticated);
            print_result(&outcome)?;
            exit_unless(success);
            Ok(())
        }
        Command::Upload(args) => {
            let request = UploadRequest {
                url: args.url,
                title: args.title,
                description: args.description,
                tags: Some(args.tags).filter(|tags| !tags.is_empty()),
                privacy_status: args.privacy,
            };
            let outcome = tools.upload_from_url(request).await;
            let success = matches!(outcome, UploadOutcome::Uploaded(_));
            print_result(&outcome)?;
            exit_unless(success);
            Ok(())
        }
        Command::Setup => Ok(()),
    }
}

/// Run the HTTP tool server until Ctrl+C / SIGTERM
async fn serve(config: &Config, tools: Arc<ToolService>) -> Result<()> {
    let state = routes::AppState {
        tools,
        api_key: config.tool_api_key.clone(),
    };
    let app = routes::build_app(state);

    let addr = format!("{}:{}", config.server_host, config.server_port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind tool server on {}", addr))?;

    print_startup_banner(config);

    tracing::info!("🚀 Tool server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("👋 Server shutdown complete");

    Ok(())
}

fn print_result<T: Serialize>(result: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(result).context("Failed to serialize tool result")?;
    println!("{}", json);
    Ok(())
}

fn exit_unless(success: bool) {
    if !success {
        std::process::exit(1);
    }
}

/// Print startup banner
fn print_startup_banner(config: &Config) {
    eprintln!();
    eprintln!("  YouTube Upload Agent {}", env!("CARGO_PKG_VERSION"));
    eprintln!(
        "  Tool server:   http://{}:{}",
        config.server_host, config.server_port
    );
    eprintln!(
        "  OAuth redirect: http://localhost:{}/oauth2callback",
        config.callback_port
    );
    eprintln!("  Token file:    {}", config.token_file.display());
    eprintln!(
        "  API key:       {}",
        if config.tool_api_key.is_some() {
            "required"
        } else {
            "not required"
        }
    );
    eprintln!("  Log level:     {}", config.log_level);
    eprintln!();
}

/// Handle graceful shutdown signal
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal, initiating graceful shutdown...");
        },
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown...");
        },
    }
}
