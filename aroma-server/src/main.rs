//! aroma-server: fan control daemon for the aroma diffuser
//!
//! Runs on the board next to the fans:
//! - REST endpoints to start a fan for a duration or stop it
//! - WebSocket feed pushing the status of every fan once per tick
//! - Drives all fan pins low on shutdown

mod handlers;
mod state;
mod ticker;

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::{
    Router,
    routing::{get, post},
};
use clap::Parser;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use aroma_core::{Config, FanController};

use crate::handlers::SharedState;
use crate::state::AppState;

#[derive(Parser)]
#[command(version, about = "A-Roma fan control server")]
struct Cli {
    /// Config file (default: platform config dir)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log file (default: platform cache dir)
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Override the configured HTTP port
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // An explicit config path must load; the default location may be absent or broken
    let (config, config_error) = match &cli.config {
        Some(path) => (Config::load_from(path).with_context(|| format!("Failed to load {}", path.display()))?, None),
        None => match Config::load() {
            Ok(config) => (config, None),
            Err(e) => (Config::default(), Some(e)),
        },
    };

    let log_file = cli
        .log_file
        .clone()
        .or_else(|| config.server.log_file.clone())
        .unwrap_or_else(Config::default_log_file);
    init_tracing(&log_file)?;

    if let Some(e) = config_error {
        tracing::warn!("Failed to load config: {}, using defaults", e);
    }
    tracing::info!("Logging to {}", log_file.display());

    // Initialize GPIO and fan channels
    let gpio = aroma_core::gpio::from_config(&config.gpio);
    tracing::info!("GPIO backend: {:?}", config.gpio.backend);
    let controller = Arc::new(FanController::new(&config.fans, gpio).context("Failed to setup GPIO")?);

    // Create shared application state
    let state = Arc::new(AppState::new(Arc::clone(&controller)));

    // Start status broadcast
    let ticker = tokio::spawn(ticker::tick_loop(
        Arc::clone(&state.broadcaster),
        Duration::from_millis(config.server.tick_interval_ms),
    ));

    let app = router(state);

    // Start server
    let addr = SocketAddr::from((
        config.server.listen_addr.parse::<std::net::IpAddr>()?,
        cli.port.unwrap_or(config.server.port),
    ));
    tracing::info!("aroma-server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    ticker.abort();
    let failures = controller.shutdown().await;
    if failures > 0 {
        tracing::warn!("{} fans could not be driven low on exit", failures);
    }

    Ok(())
}

/// Build the HTTP router
fn router(state: SharedState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_handler))
        .route("/api/fan/status", get(handlers::status_handler))
        .route("/api/fan/{fan_id}/turn_on", post(handlers::turn_on_handler))
        .route("/api/fan/{fan_id}/turn_off", post(handlers::turn_off_handler))
        .route("/api/fan/{fan_id}/on", post(handlers::turn_on_handler))
        .route("/api/fan/{fan_id}/off", post(handlers::turn_off_handler))
        .route("/api/ws", get(handlers::ws_handler))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Log files kept on disk, current one included
const LOG_FILES_KEPT: usize = 5;

/// Console plus daily-rotated file logging
fn init_tracing(log_file: &Path) -> anyhow::Result<()> {
    let dir = log_file.parent().unwrap_or(Path::new("."));
    std::fs::create_dir_all(dir).with_context(|| format!("Cannot create log dir {}", dir.display()))?;

    let file_appender = log_file_appender(log_file)?;

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "aroma_server=debug,aroma_core=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::fmt::layer().with_ansi(false).with_writer(file_appender))
        .init();

    Ok(())
}

/// `<dir>/aroma.log` becomes `<dir>/aroma.YYYY-MM-DD.log`, oldest files pruned
fn log_file_appender(log_file: &Path) -> anyhow::Result<RollingFileAppender> {
    let dir = log_file.parent().unwrap_or(Path::new("."));
    let prefix = log_file
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("aroma");

    let mut builder = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(prefix)
        .max_log_files(LOG_FILES_KEPT);
    if let Some(suffix) = log_file.extension().and_then(|s| s.to_str()) {
        builder = builder.filename_suffix(suffix);
    }

    builder
        .build(dir)
        .with_context(|| format!("Cannot open log file in {}", dir.display()))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
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
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutting down");
}
