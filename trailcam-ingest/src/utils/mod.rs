//! Utility modules for trailcam-ingest

pub mod db_retry;
pub mod file_hash;

pub use db_retry::retry_on_lock;
pub use file_hash::hash_file;
