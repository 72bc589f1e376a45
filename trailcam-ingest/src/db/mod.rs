//! Database access for trailcam-ingest
//!
//! Pool creation and schema live in `trailcam_common::db`; these modules
//! hold the queries this service runs.

pub mod detections;
pub mod webhooks;

pub use detections::InsertOutcome;
