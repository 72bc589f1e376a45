//! Inbound motion trigger
//!
//! `POST /api/webhook/motion` (and `GET` with a query string). Camera
//! firmware and upload bridges disagree on payload shape, so every source is
//! tried and merged, first non-empty value per key winning:
//! 1. JSON object body
//! 2. form-encoded body (when the content type says so)
//! 3. raw query-string-style body
//! 4. URL query parameters
//!
//! The response is decided before any classification work starts: the
//! accepted trigger continues as a tracked background task.

use axum::{
    body::Bytes,
    extract::{RawQuery, State},
    http::{header, HeaderMap},
    routing::post,
    Json, Router,
};
use chrono::{DateTime, NaiveDateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::PathBuf;

use crate::models::{DetectionCandidate, IngestSource};
use crate::services::backfill_scanner::parse_camera_folder;
use crate::AppState;

const CAMERA_KEYS: [&str; 3] = ["camera_id", "camera", "cameraId"];
const FILE_KEYS: [&str; 3] = ["file_path", "file", "path"];
const EVENT_KEYS: [&str; 2] = ["event_type", "event"];
const TIMESTAMP_KEYS: [&str; 1] = ["timestamp"];

/// Camera id from a `/Camera<N>/` path fragment
static CAMERA_IN_PATH: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:^|[/\\])camera[ _-]?(\d+)(?:[/\\]|$)").expect("valid camera path pattern")
});

/// Normalized trigger payload
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TriggerPayload {
    pub camera_id: Option<i64>,
    pub file_path: Option<String>,
    pub event_type: String,
    pub timestamp: Option<String>,
}

/// Trigger response body
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum TriggerResponse {
    Ignored { reason: String },
    Duplicate,
    Accepted { task_id: String },
}

type Source = HashMap<String, String>;

fn json_source(body: &[u8]) -> Option<Source> {
    let Value::Object(map) = serde_json::from_slice::<Value>(body).ok()? else {
        return None;
    };
    Some(
        map.into_iter()
            .filter_map(|(k, v)| {
                let value = match v {
                    Value::String(s) => s,
                    Value::Number(n) => n.to_string(),
                    Value::Bool(b) => b.to_string(),
                    _ => return None,
                };
                Some((k, value))
            })
            .collect(),
    )
}

fn form_source(raw: &[u8]) -> Source {
    url::form_urlencoded::parse(raw)
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect()
}

fn first_value(sources: &[Source], keys: &[&str]) -> Option<String> {
    sources.iter().find_map(|source| {
        keys.iter().find_map(|key| {
            source
                .get(*key)
                .map(|v| v.trim())
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        })
    })
}

fn parse_camera_value(raw: &str) -> Option<i64> {
    raw.parse().ok().or_else(|| parse_camera_folder(raw))
}

/// Camera id embedded in a file path
pub fn camera_from_path(path: &str) -> Option<i64> {
    CAMERA_IN_PATH
        .captures(path)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Capture time from a trigger `timestamp` value
///
/// Accepts RFC 3339, unix seconds, or a naive `YYYY-MM-DD HH:MM:SS` taken as UTC.
pub fn parse_capture_time(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    if let Ok(secs) = raw.parse::<i64>() {
        return DateTime::from_timestamp(secs, 0);
    }
    ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
}

impl TriggerPayload {
    pub fn captured_at(&self) -> Option<DateTime<Utc>> {
        self.timestamp.as_deref().and_then(parse_capture_time)
    }
}

/// Merge every payload source into one normalized trigger
pub fn parse_trigger(content_type: Option<&str>, body: &[u8], query: Option<&str>) -> TriggerPayload {
    let mut sources: Vec<Source> = Vec::new();

    let is_form = content_type
        .is_some_and(|ct| ct.starts_with("application/x-www-form-urlencoded"));

    if !body.is_empty() {
        if let Some(source) = json_source(body) {
            sources.push(source);
        }
        if is_form {
            sources.push(form_source(body));
        } else if std::str::from_utf8(body).is_ok_and(|text| text.contains('=') && !text.trim_start().starts_with('{')) {
            sources.push(form_source(body));
        }
    }
    if let Some(query) = query.filter(|q| !q.is_empty()) {
        sources.push(form_source(query.as_bytes()));
    }

    let file_path = first_value(&sources, &FILE_KEYS);
    let camera_id = first_value(&sources, &CAMERA_KEYS)
        .and_then(|raw| parse_camera_value(&raw))
        .or_else(|| file_path.as_deref().and_then(camera_from_path));

    TriggerPayload {
        camera_id,
        file_path,
        event_type: first_value(&sources, &EVENT_KEYS).unwrap_or_else(|| "motion".to_string()),
        timestamp: first_value(&sources, &TIMESTAMP_KEYS),
    }
}

/// POST|GET /api/webhook/motion
pub async fn motion_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    RawQuery(query): RawQuery,
    body: Bytes,
) -> Json<Value> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok());
    let payload = parse_trigger(content_type, &body, query.as_deref());
    let response = handle_trigger(&state, payload).await;
    Json(json!(response))
}

async fn handle_trigger(state: &AppState, payload: TriggerPayload) -> TriggerResponse {
    let ignored = |reason: &str| {
        tracing::info!(?payload, reason, "Trigger ignored");
        TriggerResponse::Ignored {
            reason: reason.to_string(),
        }
    };

    let image = match (&payload.file_path, payload.camera_id) {
        (None, None) => return ignored("no camera_id or file_path"),
        (Some(file_path), _) => resolve_path(state, file_path),
        (None, Some(camera_id)) => match state.scanner.latest_image_for_camera(camera_id).await {
            Some(path) => path,
            None => return ignored("no image found for camera"),
        },
    };

    let identifier = image.to_string_lossy().into_owned();
    if !state.dedup.check(&identifier) {
        tracing::debug!(path = %identifier, "Duplicate trigger");
        return TriggerResponse::Duplicate;
    }

    let camera_id = payload
        .camera_id
        .or_else(|| camera_from_path(&identifier))
        .unwrap_or(0);

    let task_id = state.tasks.create("motion_trigger");
    tracing::info!(
        task_id = %task_id,
        camera_id,
        path = %identifier,
        event_type = %payload.event_type,
        "Trigger accepted"
    );

    let captured_at = payload.captured_at();
    if captured_at.is_none() && payload.timestamp.is_some() {
        tracing::debug!(timestamp = ?payload.timestamp, "Unparseable trigger timestamp, using arrival time");
    }
    let candidate = DetectionCandidate::new(image, camera_id, IngestSource::Trigger)
        .with_captured_at(captured_at);
    super::spawn_pipeline_task(state.clone(), task_id.clone(), candidate);

    TriggerResponse::Accepted { task_id }
}

/// Relative paths are taken relative to the media root
fn resolve_path(state: &AppState, file_path: &str) -> PathBuf {
    let path = PathBuf::from(file_path);
    if path.is_absolute() {
        path
    } else {
        state.settings.media_root().join(path)
    }
}

pub fn trigger_routes() -> Router<AppState> {
    Router::new().route("/api/webhook/motion", post(motion_webhook).get(motion_webhook))
}
