//! trailcam-ingest - motion image ingestion service
//!
//! Accepts motion triggers over HTTP, sweeps the camera upload tree for
//! missed images, classifies and scores each image, persists accepted
//! detections and fans them out to stream subscribers and webhooks.

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use trailcam_common::events::EventBroadcaster;

use trailcam_ingest::config::PipelineSettings;
use trailcam_ingest::services::build_classifier;
use trailcam_ingest::AppState;

/// Command-line arguments for trailcam-ingest
#[derive(Parser, Debug)]
#[command(name = "trailcam-ingest")]
#[command(about = "Motion image ingestion service")]
#[command(version)]
struct Args {
    /// Port to listen on (overrides the config file)
    #[arg(short, long, env = "TRAILCAM_PORT")]
    port: Option<u16>,

    /// Root folder holding the database, media and archive trees
    #[arg(short, long)]
    root_folder: Option<PathBuf>,

    /// Bootstrap TOML config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to bind
    #[arg(long, default_value = "0.0.0.0", env = "TRAILCAM_BIND")]
    bind: std::net::IpAddr,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let toml_config = trailcam_common::config::load_or_default(args.config.as_deref())
        .context("Failed to load configuration")?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!(
                    "trailcam_ingest={level},trailcam_common={level},tower_http=info",
                    level = toml_config.logging.level
                )
                .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting trailcam-ingest v{}", env!("CARGO_PKG_VERSION"));

    let root_folder =
        trailcam_common::config::resolve_root_folder(args.root_folder.as_deref(), &toml_config);
    std::fs::create_dir_all(&root_folder)
        .with_context(|| format!("Failed to create root folder {}", root_folder.display()))?;
    info!("Root folder: {}", root_folder.display());

    let settings = PipelineSettings::resolve(&toml_config, &root_folder)
        .context("Invalid [pipeline] settings")?;
    if !settings.media_root().is_dir() {
        warn!(
            "Media root {} does not exist yet; backfill sweeps will fail until it does",
            settings.media_root().display()
        );
    }

    let db_path = root_folder.join("trailcam.db");
    let db = trailcam_common::db::init_database(&db_path)
        .await
        .context("Failed to initialize database")?;
    info!("Database: {}", db_path.display());

    let classifier = build_classifier(&settings).context("Failed to build classifier backend")?;

    let state = AppState::new(db, settings, classifier, EventBroadcaster::new());

    let cancel = CancellationToken::new();
    let loops = trailcam_ingest::spawn_background_loops(&state, cancel.clone());

    let app = trailcam_ingest::build_router(state);

    let port = args.port.unwrap_or(toml_config.port);
    let addr = SocketAddr::new(args.bind, port);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    info!("Listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(cancel.clone()))
        .await
        .context("Server error")?;

    cancel.cancel();
    for handle in loops {
        if let Err(e) = handle.await {
            warn!("Background loop ended abnormally: {}", e);
        }
    }

    info!("Server shutdown complete");
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM, then cancel the background loops
async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received terminate signal, shutting down"),
    }

    cancel.cancel();
}
