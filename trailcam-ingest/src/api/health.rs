//! Health endpoints

use axum::{extract::State, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;

use crate::services::health_monitor::SystemHealth;
use crate::{ApiResult, AppState};

/// Liveness response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub module: String,
    pub version: String,
    pub uptime_seconds: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let uptime = Utc::now().signed_duration_since(state.startup_time);
    let last_error = state.last_error.read().await.clone();

    Json(HealthResponse {
        status: "ok".to_string(),
        module: "trailcam-ingest".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: uptime.num_seconds().max(0) as u64,
        last_error,
    })
}

/// GET /api/system/health
///
/// Latest periodic snapshot, or a fresh one before the first tick.
pub async fn system_health(State(state): State<AppState>) -> ApiResult<Json<SystemHealth>> {
    match state.health.latest() {
        Some(snapshot) => Ok(Json(snapshot)),
        None => Ok(Json(state.health.snapshot().await?)),
    }
}

pub fn health_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/system/health", get(system_health))
}
