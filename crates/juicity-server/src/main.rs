//! juicity-server binary

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{error, info};

use juicity_server::{http, logging, Server, ServerConfig};

#[derive(Parser, Debug)]
#[command(name = "juicity-server")]
#[command(version, about = "juicity-server is a quic-based proxy server")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the server
    Run {
        /// Config file path
        #[arg(short, long, env = "JUICITY_CONFIG")]
        config: PathBuf,

        /// Omit timestamps from log lines
        #[arg(long)]
        disable_timestamp: bool,

        /// Override the configured log level
        #[arg(long, env = "JUICITY_LOG_LEVEL")]
        log_level: Option<String>,
    },
    /// Check a config file and exit
    Validate {
        /// Config file path
        #[arg(short, long, env = "JUICITY_CONFIG")]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    match Cli::parse().command {
        Commands::Run {
            config,
            disable_timestamp,
            log_level,
        } => run(&config, disable_timestamp, log_level).await,
        Commands::Validate { config } => validate(&config),
    }
}

fn load_config(path: &Path) -> Result<ServerConfig> {
    ServerConfig::load(path).with_context(|| format!("Failed to load config {:?}", path))
}

/// Building the server logs, so the subscriber must already be installed.
fn build(config: &ServerConfig) -> Result<Server> {
    Server::new(config.server_options()).context("Failed to create server")
}

fn validate(path: &Path) -> Result<()> {
    let config = load_config(path)?;
    let _log_guard = logging::init(&config.log_level, true, None)?;
    let server = build(&config)?;
    println!(
        "{:?}: OK (listen {}, {} users)",
        path,
        config.listen_addr()?,
        server.credentials().len()
    );
    Ok(())
}

async fn run(path: &Path, disable_timestamp: bool, log_level: Option<String>) -> Result<()> {
    let config = load_config(path)?;
    let level = log_level.unwrap_or_else(|| config.log_level.clone());
    let _log_guard = logging::init(&level, disable_timestamp, config.log_file.as_deref())?;
    let server = build(&config)?;

    let listen = config.listen_addr()?;
    let server = Arc::new(server);

    if let Some(addr) = config.metrics_listen {
        http::spawn(addr, server.metrics())
            .await
            .with_context(|| format!("Failed to bind metrics listener {}", addr))?;
    }

    info!("Starting juicity-server on {}", listen);
    tokio::select! {
        result = server.clone().serve(listen) => {
            if let Err(e) = &result {
                error!("Server error: {}", e);
            }
            result.context("Listener failed")?;
        }
        signal = shutdown_signal() => {
            signal?;
            info!("Shutdown signal received");
        }
    }

    info!("juicity-server stopped");
    Ok(())
}

#[cfg(unix)]
async fn shutdown_signal() -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result.context("Failed to install CTRL+C handler"),
        _ = terminate.recv() => Ok(()),
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() -> Result<()> {
    tokio::signal::ctrl_c()
        .await
        .context("Failed to install CTRL+C handler")
}
