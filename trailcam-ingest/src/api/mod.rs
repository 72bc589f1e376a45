//! HTTP API handlers for trailcam-ingest

pub mod health;
pub mod sse;
pub mod tasks;
pub mod trigger;
pub mod webhooks;

pub use health::health_routes;
pub use sse::event_stream;
pub use tasks::task_routes;
pub use trigger::trigger_routes;
pub use webhooks::webhook_routes;

use crate::models::DetectionCandidate;
use crate::services::pipeline::ItemOutcome;
use crate::AppState;

/// Run a candidate through the pipeline as tracked task `task_id`
///
/// A task cancelled before it starts is never processed. Pipeline failures
/// mark the task failed and become the service's last error.
pub(crate) fn spawn_pipeline_task(state: AppState, task_id: String, candidate: DetectionCandidate) {
    tokio::spawn(async move {
        if !state.tasks.start(&task_id) {
            tracing::debug!(task_id = %task_id, "Task cancelled before start");
            return;
        }
        state
            .tasks
            .update(&task_id, 0.1, Some(format!("classifying {}", candidate.source_path.display())));

        let outcome = state.pipeline.process(candidate).await;

        match &outcome {
            ItemOutcome::Failed { error } => {
                state.tasks.fail(&task_id, error.clone());
                state.record_error(error.clone()).await;
            }
            _ => {
                state
                    .tasks
                    .complete(&task_id, serde_json::to_value(&outcome).ok());
            }
        }
    });
}
