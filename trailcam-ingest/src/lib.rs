//! trailcam-ingest library interface
//!
//! Service objects are built once into [`AppState`] and shared by the HTTP
//! handlers and the periodic loops; tests build isolated instances the same
//! way.

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod services;
pub mod utils;

pub use crate::error::{ApiError, ApiResult};

use axum::Router;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use trailcam_common::events::EventBroadcaster;

use crate::config::PipelineSettings;
use crate::services::{
    scheduler::spawn_periodic, BackfillScanner, Classifier, DedupCache, DetectionPipeline,
    FallbackPolicy, Fanout, HealthMonitor, TaskTracker,
};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub settings: Arc<PipelineSettings>,
    pub dedup: Arc<DedupCache>,
    pub tasks: Arc<TaskTracker>,
    pub fanout: Fanout,
    pub pipeline: Arc<DetectionPipeline>,
    pub scanner: Arc<BackfillScanner>,
    pub health: Arc<HealthMonitor>,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
    /// Last processing error, for diagnostics
    pub last_error: Arc<RwLock<Option<String>>>,
}

impl AppState {
    pub fn new(
        db: SqlitePool,
        settings: PipelineSettings,
        classifier: Arc<dyn Classifier>,
        broadcaster: EventBroadcaster,
    ) -> Self {
        let dedup = Arc::new(DedupCache::new(settings.dedup_ttl()));
        let tasks = Arc::new(TaskTracker::new(
            settings.task_retention_secs,
            settings.max_tasks,
        ));
        let fanout = Fanout::new(db.clone(), broadcaster);

        let fallback = FallbackPolicy {
            save_on_empty: settings.fallback_save_on_empty,
            confidence: settings.fallback_confidence,
        };
        let pipeline = Arc::new(DetectionPipeline::new(
            db.clone(),
            classifier,
            fanout.clone(),
            settings.archive_root(),
            fallback,
        ));
        let scanner = Arc::new(BackfillScanner::new(
            settings.media_root(),
            Arc::clone(&pipeline),
        ));
        let health = Arc::new(HealthMonitor::new(
            db.clone(),
            settings.media_root(),
            Arc::clone(&dedup),
            Arc::clone(&tasks),
            fanout.clone(),
            pipeline.classifier_backend(),
        ));

        Self {
            db,
            settings: Arc::new(settings),
            dedup,
            tasks,
            fanout,
            pipeline,
            scanner,
            health,
            startup_time: Utc::now(),
            last_error: Arc::new(RwLock::new(None)),
        }
    }

    pub async fn record_error(&self, error: impl Into<String>) {
        *self.last_error.write().await = Some(error.into());
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    use axum::routing::get;

    Router::new()
        .merge(api::trigger_routes())
        .route("/events", get(api::event_stream))
        .merge(api::task_routes())
        .merge(api::webhook_routes())
        .merge(api::health_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the backfill, health and task-sweep loops
///
/// All three stop when `cancel` is cancelled.
pub fn spawn_background_loops(state: &AppState, cancel: CancellationToken) -> Vec<JoinHandle<()>> {
    let settings = &state.settings;

    let scanner = Arc::clone(&state.scanner);
    let scan_loop = spawn_periodic("backfill_scan", settings.scan_interval(), cancel.clone(), move || {
        let scanner = Arc::clone(&scanner);
        async move { scanner.run_once().await.map(|_| ()) }
    });

    let health = Arc::clone(&state.health);
    let health_loop = spawn_periodic("health", settings.health_interval(), cancel.clone(), move || {
        let health = Arc::clone(&health);
        async move { health.tick().await }
    });

    let tasks = Arc::clone(&state.tasks);
    let sweep_loop = spawn_periodic("task_sweep", settings.task_sweep_interval(), cancel, move || {
        let tasks = Arc::clone(&tasks);
        async move {
            tasks.sweep(Utc::now());
            Ok::<(), std::convert::Infallible>(())
        }
    });

    vec![scan_loop, health_loop, sweep_loop]
}
