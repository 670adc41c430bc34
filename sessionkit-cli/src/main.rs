//! sessionkit - developer CLI for the authenticated request client.
//!
//! Signs in against an API, keeps the session credential in a state
//! directory and sends arbitrary requests through the recovery policy.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use eyre::{eyre, Result, WrapErr};
use sessionkit_core::{ClientConfig, Environment, Method};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod commands;

/// sessionkit - authenticated request client
#[derive(Parser, Debug)]
#[command(name = "sessionkit")]
#[command(version, about, long_about = None)]
struct Cli {
    /// API base URL; overrides the environment default
    #[arg(long, env = "SESSIONKIT_BASE_URL")]
    base_url: Option<String>,

    /// Deployment environment (development, staging, production)
    #[arg(long = "env", env = "SESSIONKIT_ENV", default_value = "production")]
    environment: Environment,

    /// Directory holding the session credential
    #[arg(long, env = "SESSIONKIT_STATE_DIR")]
    state_dir: Option<PathBuf>,

    /// JSON file with client settings; base URL and bearer flags still apply on top
    #[arg(long)]
    config: Option<PathBuf>,

    /// Also send the stored credential as `Authorization: Bearer`
    #[arg(long)]
    bearer: bool,

    /// Log filter, e.g. `sessionkit_core=debug`
    #[arg(long, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Sign in and store the issued credential
    Signin {
        /// Account email
        #[arg(long)]
        email: String,

        /// Account password
        #[arg(long, env = "SESSIONKIT_PASSWORD", hide_env_values = true)]
        password: String,
    },

    /// Sign out and forget the stored credential
    Signout,

    /// Call the refresh endpoint
    Refresh,

    /// Fetch an anti-forgery token and report the priming state
    Csrf {
        /// Fetch a new token even if one is cached
        #[arg(long)]
        force: bool,
    },

    /// Send a request through the refresh-and-retry policy
    Request {
        /// HTTP method (case-insensitive)
        #[arg(value_parser = parse_method)]
        method: Method,

        /// Path under the base URL, or an absolute URL
        path: String,

        /// JSON request body
        #[arg(long)]
        json: Option<String>,

        /// Extra header as `name: value` (repeatable)
        #[arg(short = 'H', long = "header")]
        headers: Vec<String>,

        /// Do not attach the anti-forgery token
        #[arg(long)]
        no_csrf: bool,
    },
}

fn parse_method(raw: &str) -> Result<Method, String> {
    Method::from_bytes(raw.to_ascii_uppercase().as_bytes()).map_err(|e| e.to_string())
}

/// Resolves the state directory: explicit flag or env, else the platform
/// config dir.
fn state_dir(explicit: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(dir) = explicit {
        return Ok(dir);
    }
    dirs::config_dir()
        .map(|dir| dir.join("sessionkit"))
        .ok_or_else(|| eyre!("no config directory on this platform; pass --state-dir"))
}

fn load_config(cli: &Cli) -> Result<ClientConfig> {
    let mut config = match &cli.config {
        Some(path) => read_config_file(path)?,
        None => ClientConfig::for_environment(cli.environment),
    };
    if let Some(base_url) = &cli.base_url {
        config.base_url.clone_from(base_url);
    }
    if cli.bearer {
        config.attach_bearer = true;
    }
    config.validate()?;
    Ok(config)
}

fn read_config_file(path: &Path) -> Result<ClientConfig> {
    let raw = std::fs::read_to_string(path)
        .wrap_err_with(|| format!("failed to read config file {}", path.display()))?;
    serde_json::from_str(&raw)
        .wrap_err_with(|| format!("invalid config file {}", path.display()))
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    let config = load_config(&cli)?;
    let state_dir = state_dir(cli.state_dir.clone())?;
    tracing::debug!(base_url = %config.base_url, state_dir = %state_dir.display(), "starting");

    let client = commands::build_client(config, &state_dir)?;
    match cli.command {
        Commands::Signin { email, password } => {
            commands::sign_in(&client, &email, &password).await
        }
        Commands::Signout => commands::sign_out(&client).await,
        Commands::Refresh => commands::refresh(&client).await,
        Commands::Csrf { force } => commands::prime(&client, force).await,
        Commands::Request {
            method,
            path,
            json,
            headers,
            no_csrf,
        } => {
            let request = commands::RequestArgs {
                method,
                path,
                json,
                headers,
                no_csrf,
            };
            commands::request(&client, request).await
        }
    }
}
