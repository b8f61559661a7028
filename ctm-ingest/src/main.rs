//! ctm-ingest - Clinical Trial Monitor ingest service
//!
//! Accepts enrollment, medication, symptom and lab result uploads over HTTP,
//! stores them in SQLite and streams detected outliers over SSE.

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use ctm_common::events::EventBus;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ctm_ingest::AppState;

/// Command-line arguments for ctm-ingest
#[derive(Parser, Debug)]
#[command(name = "ctm-ingest")]
#[command(about = "Clinical trial data ingest service")]
#[command(version)]
struct Args {
    /// Folder holding the database
    #[arg(short, long)]
    root_folder: Option<PathBuf>,

    /// TOML configuration file
    #[arg(short, long, env = "CTM_CONFIG")]
    config: Option<PathBuf>,

    /// Port to listen on (overrides the config file)
    #[arg(short, long, env = "CTM_INGEST_PORT")]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Config is read before tracing starts so the level can come from it
    let config = ctm_common::config::load_or_default(args.config.as_deref(), "ctm-ingest")
        .context("Failed to load configuration")?;

    // Optional log file, written alongside stderr
    let file_layer = match &config.logging.file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(std::sync::Mutex::new(file)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("ctm_ingest={0},ctm_common={0},tower_http=info", config.logging.level)
                    .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .init();

    info!("Starting ctm-ingest (Clinical Trial Monitor ingest)");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let root_folder = ctm_common::config::resolve_root_folder(args.root_folder.as_deref(), &config);
    std::fs::create_dir_all(&root_folder).with_context(|| {
        format!("Failed to create root folder {}", root_folder.display())
    })?;
    info!("Root folder: {}", root_folder.display());

    let db_path = ctm_common::config::database_path(&root_folder);
    let db_pool = ctm_ingest::db::init_database_pool(&db_path, &config.database)
        .await
        .context("Failed to open database")?;
    info!("Database: {}", db_path.display());

    let event_bus = EventBus::with_max_subscribers(config.events.capacity, config.events.max_subscribers);
    info!(
        capacity = event_bus.capacity(),
        max_subscribers = event_bus.max_subscribers(),
        "Event bus initialized"
    );

    let state = AppState::with_upload_config(db_pool, event_bus, &config.upload);
    let app = ctm_ingest::build_router(state);

    let port = args.port.unwrap_or(config.port);
    let addr: SocketAddr = format!("{}:{}", config.bind_address, port)
        .parse()
        .with_context(|| format!("Invalid bind address {}:{}", config.bind_address, port))?;

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;
    info!("Listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
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
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}
