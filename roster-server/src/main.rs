//! roster-server - music program roster HTTP service
//!
//! Stores student rows per sheet with every field encrypted at rest, and
//! upserts incoming rows by student identity.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use roster_common::config::{ConfigOverrides, RosterConfig, ENV_CONFIG};
use roster_common::db::init_database;
use roster_common::Roster;
use roster_server::{build_router, AppState};
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line arguments for roster-server
#[derive(Parser, Debug)]
#[command(name = "roster-server")]
#[command(about = "Music program roster service")]
#[command(version)]
struct Args {
    /// Config file (TOML)
    #[arg(short, long, env = ENV_CONFIG)]
    config: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Address to bind
    #[arg(short, long)]
    bind: Option<String>,

    /// SQLite database file
    #[arg(short, long)]
    database: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,
}

impl Args {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            config_path: self.config.clone(),
            port: self.port,
            bind_address: self.bind.clone(),
            database_path: self.database.clone(),
            log_level: self.log_level.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = RosterConfig::load(&args.overrides()).context("Failed to load configuration")?;

    // RUST_LOG wins over the configured level
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!(
                    "roster_server={level},roster_common={level},tower_http={level}",
                    level = config.logging.level
                )
                .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(
        "Starting roster-server v{} on {}:{}",
        env!("CARGO_PKG_VERSION"),
        config.bind_address,
        config.port
    );
    info!("Database path: {}", config.database_path.display());

    // A missing or malformed key must stop startup
    let cipher = config.cipher().context("Encryption key unusable")?;
    info!("Field cipher ready ({:?})", cipher.mode());

    if config.register_token.is_none() {
        warn!("No register token configured; account registration is closed");
    }
    if !config.require_auth {
        warn!("Authentication disabled (require_auth = false)");
    }

    let pool = init_database(&config.database_path)
        .await
        .context("Failed to open database")?;

    let roster = Roster::new(pool.clone(), Arc::new(cipher), config.reconcile_options());
    let addr: SocketAddr = format!("{}:{}", config.bind_address, config.port)
        .parse()
        .context("Invalid bind address")?;
    let app = build_router(AppState::new(roster, config));

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;
    info!("roster-server listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    pool.close().await;
    info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
