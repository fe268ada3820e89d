//! Techfix daemon
//!
//! Serves the courier REST API, or prints the technician sheet mapping.

use anyhow::Context;
use clap::{Parser, Subcommand};
use techfix_service::config::TechfixConfig;
use techfix_service::{build_router, ServiceState};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Techfix courier service
#[derive(Parser)]
#[command(name = "techfixd")]
#[command(about = "Techfix courier dispatch and receipt service", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "TECHFIX_CONFIG")]
    config: Option<String>,

    /// Listen address (overrides `server.listen_addr`)
    #[arg(short, long, env = "TECHFIX_LISTEN_ADDR")]
    listen: Option<String>,

    /// Log level (overrides `logging.level`)
    #[arg(long, env = "TECHFIX_LOG_LEVEL")]
    log_level: Option<String>,

    /// Enable JSON logging
    #[arg(long, env = "TECHFIX_LOG_JSON")]
    json: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the REST API (default)
    Serve,
    /// Print every technician with its bound sheet identity
    CheckMapping,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = TechfixConfig::load(cli.config.as_deref())
        .context("failed to load configuration")?;

    if let Some(listen) = &cli.listen {
        config.server.listen_addr = listen
            .parse()
            .with_context(|| format!("invalid listen address '{listen}'"))?;
    }
    if let Some(level) = &cli.log_level {
        config.logging.level = level.clone();
    }
    config.logging.json |= cli.json;

    // Initialize tracing
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| config.logging.level.clone().into());

    if config.logging.json {
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

    let state = ServiceState::bootstrap(&config).await?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(state, &config).await,
        Command::CheckMapping => check_mapping(&state).await,
    }
}

async fn serve(state: ServiceState, config: &TechfixConfig) -> anyhow::Result<()> {
    let app = build_router(state, config.server.enable_cors);
    let listener = tokio::net::TcpListener::bind(config.server.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.server.listen_addr))?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "techfixd listening on {}",
        listener.local_addr()?
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("techfixd stopped");
    Ok(())
}

async fn check_mapping(state: &ServiceState) -> anyhow::Result<()> {
    let lines = state.workflow.mapping_report().await?;

    println!("=== Technician Sheet Mapping ===");
    for line in &lines {
        println!(
            "ID: {} | Username: {} | Sheet Name: {}",
            line.account_id,
            line.username,
            line.sheet_identity.as_deref().unwrap_or("NOT SET")
        );
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("received Ctrl+C, shutting down");
        }
        _ = terminate => {
            tracing::info!("received SIGTERM, shutting down");
        }
    }
}
