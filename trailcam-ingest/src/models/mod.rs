//! Data models for trailcam-ingest

pub mod detection;
pub mod webhook;

pub use detection::{format_timestamp, Detection, DetectionCandidate, IngestSource, NewDetection};
pub use webhook::{WebhookEvent, WebhookFilters, WebhookSubscriber};
