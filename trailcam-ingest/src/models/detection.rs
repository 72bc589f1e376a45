//! Detection records and in-flight candidates

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::services::analyzer::AnalysisResult;
use crate::services::classifier::RawPrediction;

/// Which ingestion path produced a candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IngestSource {
    /// Inbound motion webhook
    Trigger,
    /// Directory backfill sweep
    Backfill,
    /// Manual `/api/classify` request
    Manual,
}

impl IngestSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            IngestSource::Trigger => "trigger",
            IngestSource::Backfill => "backfill",
            IngestSource::Manual => "manual",
        }
    }
}

/// An unclassified image awaiting analysis; never persisted
#[derive(Debug, Clone)]
pub struct DetectionCandidate {
    pub source_path: PathBuf,
    pub camera_id: i64,
    pub received_at: DateTime<Utc>,
    pub source: IngestSource,
    /// Precomputed content hash, when the caller already has one (backfill)
    pub content_hash: Option<String>,
    /// Capture time reported by the camera or taken from the file
    pub captured_at: Option<DateTime<Utc>>,
}

impl DetectionCandidate {
    pub fn new(source_path: impl Into<PathBuf>, camera_id: i64, source: IngestSource) -> Self {
        Self {
            source_path: source_path.into(),
            camera_id,
            received_at: Utc::now(),
            source,
            content_hash: None,
            captured_at: None,
        }
    }

    pub fn with_hash(mut self, content_hash: impl Into<String>) -> Self {
        self.content_hash = Some(content_hash.into());
        self
    }

    pub fn with_captured_at(mut self, captured_at: Option<DateTime<Utc>>) -> Self {
        self.captured_at = captured_at;
        self
    }

    /// Time the detection is recorded at: capture time when known, else arrival
    pub fn effective_timestamp(&self) -> DateTime<Utc> {
        self.captured_at.unwrap_or(self.received_at)
    }
}

/// A persisted detection row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub id: i64,
    pub camera_id: i64,
    pub timestamp: DateTime<Utc>,
    pub species: String,
    pub confidence: f64,
    pub image_path: String,
    pub content_hash: Option<String>,
    pub raw_predictions_json: String,
}

/// Insert payload; `id` is assigned by the database
#[derive(Debug, Clone)]
pub struct NewDetection {
    pub camera_id: i64,
    pub timestamp: DateTime<Utc>,
    pub species: String,
    pub confidence: f64,
    pub image_path: String,
    pub content_hash: Option<String>,
    pub raw_predictions_json: String,
}

impl NewDetection {
    /// Build the insert payload from an accepted analysis
    ///
    /// `raw` is the classifier output exactly as returned, before label
    /// normalization.
    pub fn from_analysis(
        candidate: &DetectionCandidate,
        analysis: &AnalysisResult,
        raw: &[RawPrediction],
        content_hash: Option<String>,
    ) -> Self {
        Self {
            camera_id: candidate.camera_id,
            timestamp: candidate.effective_timestamp(),
            species: analysis.species.clone(),
            confidence: analysis.confidence,
            image_path: candidate.source_path.to_string_lossy().into_owned(),
            content_hash,
            raw_predictions_json: predictions_json(raw),
        }
    }

    pub fn into_detection(self, id: i64) -> Detection {
        Detection {
            id,
            camera_id: self.camera_id,
            timestamp: self.timestamp,
            species: self.species,
            confidence: self.confidence,
            image_path: self.image_path,
            content_hash: self.content_hash,
            raw_predictions_json: self.raw_predictions_json,
        }
    }
}

fn predictions_json(predictions: &[RawPrediction]) -> String {
    serde_json::to_string(predictions).unwrap_or_else(|_| "[]".to_string())
}

/// Canonical text form for stored timestamps
///
/// Fixed precision with a `Z` suffix, so lexical order equals time order.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

impl Detection {
    /// Payload for the `detection` stream event and webhook body
    pub fn to_event_json(&self) -> serde_json::Value {
        serde_json::json!({
            "id": self.id,
            "camera_id": self.camera_id,
            "timestamp": format_timestamp(&self.timestamp),
            "species": self.species,
            "confidence": self.confidence,
            "image_path": self.image_path,
        })
    }
}
