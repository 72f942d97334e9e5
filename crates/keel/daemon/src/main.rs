//! Keel Daemon - control-plane reconciliation service
//!
//! The daemon provides:
//! - Application and Component reconciliation into workloads
//! - Workflow run execution through the manifest catalog
//! - Graceful shutdown on Ctrl+C / SIGTERM

use anyhow::Context;
use clap::Parser;
use keel_daemon::{DaemonConfig, Server};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Keel Daemon CLI
#[derive(Parser)]
#[command(name = "keeld")]
#[command(about = "Keel Daemon - reconciliation and workflow engine", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "KEEL_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (overrides the configured level)
    #[arg(long, env = "KEEL_LOG_LEVEL")]
    log_level: Option<String>,

    /// Enable JSON logging
    #[arg(long, env = "KEEL_LOG_JSON")]
    json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = DaemonConfig::load(cli.config.as_deref()).context("loading configuration")?;

    // Initialize tracing
    let level = cli
        .log_level
        .clone()
        .unwrap_or_else(|| config.logging.level.clone());
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| level.into());

    if cli.json || config.logging.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        catalog = %config.catalog_path.display(),
        workers = config.controller.workers,
        system_namespace = %config.workflow.system_namespace,
        "Starting keeld"
    );

    let server = Server::new(config).await.context("starting server")?;
    server.run().await.context("running controllers")?;
    Ok(())
}
