//! Manual classification, backfill trigger and task status endpoints

use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::PathBuf;

use crate::models::{DetectionCandidate, IngestSource};
use crate::services::task_tracker::{TaskStatus, TrackedTask};
use crate::{ApiError, ApiResult, AppState};

#[derive(Debug, Deserialize)]
pub struct ClassifyRequest {
    pub file_path: String,
    pub camera_id: Option<i64>,
}

/// POST /api/classify
///
/// Runs one image through the full accept path as a tracked task.
pub async fn classify(
    State(state): State<AppState>,
    Json(request): Json<ClassifyRequest>,
) -> ApiResult<Json<Value>> {
    let path = PathBuf::from(request.file_path.trim());
    if request.file_path.trim().is_empty() {
        return Err(ApiError::BadRequest("file_path is required".to_string()));
    }
    if !tokio::fs::metadata(&path).await.is_ok_and(|m| m.is_file()) {
        return Err(ApiError::BadRequest(format!(
            "file not found: {}",
            path.display()
        )));
    }

    let camera_id = request
        .camera_id
        .or_else(|| super::trigger::camera_from_path(&path.to_string_lossy()))
        .unwrap_or(0);

    let task_id = state.tasks.create("classify");
    let candidate = DetectionCandidate::new(path, camera_id, IngestSource::Manual);
    super::spawn_pipeline_task(state.clone(), task_id.clone(), candidate);

    Ok(Json(json!({ "task_id": task_id, "status": TaskStatus::Pending })))
}

/// POST /api/scan
pub async fn start_scan(State(state): State<AppState>) -> Json<Value> {
    let task_id = state.tasks.create("backfill_scan");

    let task_state = state.clone();
    let id = task_id.clone();
    tokio::spawn(async move {
        if !task_state.tasks.start(&id) {
            return;
        }
        match task_state.scanner.run_once().await {
            Ok(report) => {
                let result = serde_json::to_value(&report).ok();
                task_state.tasks.complete(&id, result);
            }
            Err(e) => {
                task_state.tasks.fail(&id, e.to_string());
            }
        }
    });

    Json(json!({ "task_id": task_id, "status": TaskStatus::Pending }))
}

/// GET /api/tasks
pub async fn list_tasks(State(state): State<AppState>) -> Json<Vec<TrackedTask>> {
    Json(state.tasks.list())
}

/// GET /api/tasks/:id
pub async fn get_task(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> ApiResult<Json<TrackedTask>> {
    state
        .tasks
        .get(&task_id)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("task {}", task_id)))
}

/// POST /api/tasks/:id/cancel
pub async fn cancel_task(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> ApiResult<Json<TrackedTask>> {
    let Some(task) = state.tasks.get(&task_id) else {
        return Err(ApiError::NotFound(format!("task {}", task_id)));
    };
    if !state.tasks.cancel(&task_id) {
        return Err(ApiError::Conflict(format!(
            "task {} already {:?}",
            task_id, task.status
        )));
    }
    tracing::info!(task_id = %task_id, "Task cancelled");

    state
        .tasks
        .get(&task_id)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("task {}", task_id)))
}

pub fn task_routes() -> Router<AppState> {
    Router::new()
        .route("/api/classify", post(classify))
        .route("/api/scan", post(start_scan))
        .route("/api/tasks", get(list_tasks))
        .route("/api/tasks/:id", get(get_task))
        .route("/api/tasks/:id/cancel", post(cancel_task))
}
