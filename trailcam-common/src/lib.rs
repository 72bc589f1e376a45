//! # trailcam common library
//!
//! Shared code for the trailcam services:
//! - Error type used across crates
//! - Bootstrap configuration (TOML + environment) and root folder resolution
//! - Real-time stream events and the per-subscriber mailbox broadcaster
//! - Server-Sent Events framing helpers
//! - SQLite pool initialization and the detection/webhook schema

pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod sse;

pub use error::{Error, Result};
