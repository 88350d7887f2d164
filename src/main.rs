//! gdrive-login - restore or create a Google Drive session from the command line.

#![deny(clippy::all)]

use anyhow::{Context, Result};
use clap::Parser;
use gdrive_login::auth::token::format_duration;
use gdrive_login::config::home_config_path;
use gdrive_login::{saved_session, ConsolePrompt, RefreshFailurePolicy, SavedSessionOptions};
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "gdrive-login", version, about)]
struct Cli {
    /// Credential file to restore from and save to
    #[arg(long, env = "GDRIVE_CONFIG", default_value = gdrive_login::DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Use the per-user credential file in the home directory instead of --config
    #[arg(long, conflicts_with = "config")]
    home: bool,

    /// OAuth client id (requires --client-secret; saved to the credential file)
    #[arg(long, requires = "client_secret")]
    client_id: Option<String>,

    /// OAuth client secret (requires --client-id)
    #[arg(long, requires = "client_id")]
    client_secret: Option<String>,

    /// What to do when the saved refresh token is rejected
    #[arg(long, value_enum, env = "GDRIVE_ON_REFRESH_FAILURE", default_value_t = RefreshFailurePolicy::Fail)]
    on_refresh_failure: RefreshFailurePolicy,

    /// Open the authorization page in the default browser
    #[arg(long)]
    open_browser: bool,

    /// Print the access token to stdout after logging in
    #[arg(long)]
    print_token: bool,

    /// Look up the authenticated Drive user after logging in
    #[arg(long)]
    whoami: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    // Load .env file (if present) before anything else
    if let Err(e) = dotenvy::dotenv() {
        // .env file is optional - only log if it's not a "file not found" error
        if !e.not_found() {
            eprintln!("Warning: Failed to load .env file: {}", e);
        }
    }

    init_logging();

    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        error!("{:#}", e);
        if let Some(app_error) = e.downcast_ref::<gdrive_login::AppError>() {
            eprintln!("{}", app_error.user_message());
        }
        std::process::exit(1);
    }
}

/// Initialize tracing/logging.
fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .init();
}

async fn run(cli: Cli) -> Result<()> {
    let path = if cli.home {
        home_config_path().context("Could not determine home directory")?
    } else {
        cli.config
    };

    info!("Starting gdrive-login v{}", env!("CARGO_PKG_VERSION"));

    let mut options = SavedSessionOptions::new(&path);
    options.client_id = cli.client_id;
    options.client_secret = cli.client_secret;
    options.on_refresh_failure = cli.on_refresh_failure;

    let mut prompt = ConsolePrompt::new(cli.open_browser);
    let mut session = saved_session(options, &mut prompt)
        .await
        .with_context(|| format!("Login with {} failed", path.display()))?;

    match session.token_state().and_then(|t| t.time_until_expiry()) {
        Some(remaining) => info!("Logged in, access token valid for {}", format_duration(remaining)),
        None => info!("Logged in"),
    }

    if cli.whoami {
        let about = session.about().await.context("Failed to fetch Drive user")?;
        println!(
            "{} <{}>",
            about.user.display_name_or_email(),
            about.user.email_address.as_deref().unwrap_or("no email")
        );
        session
            .persist_refresh_token()
            .context("Failed to save rotated refresh token")?;
    }

    if cli.print_token {
        println!("{}", session.access_token());
    }

    Ok(())
}
