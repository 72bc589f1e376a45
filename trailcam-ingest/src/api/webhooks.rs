//! Webhook subscriber test delivery

use axum::{
    extract::{Path, State},
    routing::post,
    Json, Router,
};
use serde_json::{json, Value};

use crate::db::webhooks;
use crate::services::webhook_notifier::DeliveryOutcome;
use crate::{ApiError, ApiResult, AppState};

/// POST /api/webhooks/:id/test
///
/// Sends a `test` event to one subscriber, bypassing its event type and
/// filters, and reports the delivery result.
pub async fn test_webhook(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<Value>> {
    let subscriber = webhooks::load_webhook(&state.db, id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("webhook {}", id)))?;

    let body = match state.fanout.send_test(&subscriber).await {
        DeliveryOutcome::Delivered { attempts, status } => json!({
            "delivered": true,
            "attempts": attempts,
            "status_code": status,
        }),
        DeliveryOutcome::Failed { attempts, error } => json!({
            "delivered": false,
            "attempts": attempts,
            "error": error,
        }),
        DeliveryOutcome::Skipped(reason) => json!({
            "delivered": false,
            "skipped": format!("{:?}", reason),
        }),
    };
    Ok(Json(body))
}

pub fn webhook_routes() -> Router<AppState> {
    Router::new().route("/api/webhooks/:id/test", post(test_webhook))
}
