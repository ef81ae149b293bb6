//! docfetch binary: composition root and command-line entry point.
//!
//! ```text
//! main() -> load config -> ResolvedConfig
//!        -> serve: policy + resolver + guarded client -> Fetcher
//!                  + CommandConverter -> ConvertService -> axum
//!        -> check: policy + resolver -> validate -> verdict
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use docfetch_config::{DocfetchConfig, ResolvedConfig};
use docfetch_convert::CommandConverter;
use docfetch_fetch::{Fetcher, HttpTransport, Resolver, SystemResolver, ValidationResult, validate};
use docfetch_server::{ConvertService, CorsSettings};

#[derive(Debug, Parser)]
#[command(name = "docfetch", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the HTTP conversion service.
    Serve {
        /// Address to listen on; overrides the config file.
        #[arg(long)]
        bind: Option<SocketAddr>,
        /// Path to a TOML config file.
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Check a URL against the network policy without fetching it.
    Check {
        url: String,
        /// Print the verdict as JSON.
        #[arg(long)]
        json: bool,
        /// Path to a TOML config file.
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(env_filter)
        .init();
}

fn load_config(path: Option<&PathBuf>) -> Result<ResolvedConfig> {
    let config = DocfetchConfig::load(path.map(PathBuf::as_path))
        .context("failed to load configuration")?;
    ResolvedConfig::from_config(&config).context("invalid configuration")
}

async fn serve(config: ResolvedConfig, bind: Option<SocketAddr>) -> Result<()> {
    let policy = Arc::new(config.policy);
    let resolver: Arc<dyn Resolver> = Arc::new(SystemResolver::default());
    let transport =
        HttpTransport::guarded(&config.http, Arc::clone(&policy), Arc::clone(&resolver))
            .context("failed to build HTTP client")?;
    let fetcher = Fetcher::new(policy, resolver, Arc::new(transport))
        .with_max_redirects(config.max_redirects);

    let converter = CommandConverter::new(&config.conversion.program)
        .args(config.conversion.args.iter());
    tracing::info!(
        program = %converter.program().display(),
        timeout_secs = config.conversion.timeout.as_secs(),
        "Converter configured"
    );

    let service = ConvertService::new(
        Arc::new(fetcher),
        Arc::new(converter),
        config.limits,
        config.conversion.timeout,
    );

    let cors = CorsSettings::from_origins(&config.server.cors_origins)
        .context("invalid server.cors_origins")?;

    let addr = bind.unwrap_or(config.server.bind);
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    docfetch_server::serve(listener, Arc::new(service), cors, shutdown_signal())
        .await
        .context("server error")
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown requested");
}

async fn check(config: ResolvedConfig, url: &str, json: bool) -> ExitCode {
    let resolver = SystemResolver::default();
    let verdict = validate(url, &config.policy, &resolver).await;
    let code = if verdict.is_allowed() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    };
    if json {
        println!("{}", verdict_json(url, &verdict));
        return code;
    }

    match verdict {
        ValidationResult::Allowed { addrs } => {
            let addrs: Vec<String> = addrs.iter().map(ToString::to_string).collect();
            if addrs.is_empty() {
                println!("allowed: {url}");
            } else {
                println!("allowed: {url} ({})", addrs.join(", "));
            }
        }
        ValidationResult::Denied(err) => println!("denied: {err}"),
    }
    code
}

fn verdict_json(url: &str, verdict: &ValidationResult) -> serde_json::Value {
    match verdict {
        ValidationResult::Allowed { addrs } => serde_json::json!({
            "allowed": true,
            "url": url,
            "addresses": addrs.iter().map(ToString::to_string).collect::<Vec<_>>(),
        }),
        ValidationResult::Denied(err) => serde_json::json!({
            "allowed": false,
            "url": url,
            "error": err.to_json(),
        }),
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Command::Serve { bind, config } => {
            let config = load_config(config.as_ref())?;
            serve(config, bind).await?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Check { url, json, config } => {
            let config = load_config(config.as_ref())?;
            Ok(check(config, &url, json).await)
        }
    }
}
