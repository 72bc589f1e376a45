//! Pipeline settings for trailcam-ingest
//!
//! Resolved from the bootstrap TOML `[pipeline]` table, then individual
//! values overridden from the environment. Every field has a compiled
//! default so an empty config starts a working service.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::info;
use trailcam_common::config::{env_override, TomlConfig};
use trailcam_common::Result;

pub const DEDUP_TTL_ENV: &str = "TRAILCAM_DEDUP_TTL_SECS";
pub const SCAN_INTERVAL_ENV: &str = "TRAILCAM_SCAN_INTERVAL_SECS";
pub const HEALTH_INTERVAL_ENV: &str = "TRAILCAM_HEALTH_INTERVAL_SECS";
pub const MEDIA_ROOT_ENV: &str = "TRAILCAM_MEDIA_ROOT";
pub const ARCHIVE_ROOT_ENV: &str = "TRAILCAM_ARCHIVE_ROOT";
pub const CLASSIFIER_URL_ENV: &str = "TRAILCAM_CLASSIFIER_URL";
pub const CLASSIFIER_BACKEND_ENV: &str = "TRAILCAM_CLASSIFIER_BACKEND";

/// Classification backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ClassifierBackend {
    /// Multipart upload of the image bytes
    #[default]
    Http,
    /// JSON `{"filepath": ...}` for a classifier sharing the filesystem
    Path,
}

impl FromStr for ClassifierBackend {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "http" | "upload" => Ok(ClassifierBackend::Http),
            "path" | "filepath" => Ok(ClassifierBackend::Path),
            other => Err(format!("unknown classifier backend '{}'", other)),
        }
    }
}

/// Service settings deserialized from `[pipeline]`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    /// Camera upload tree (`Camera<N>/<date>/<file>`); defaults under the root folder
    pub media_root: Option<PathBuf>,
    /// Species archive tree; defaults under the root folder
    pub archive_root: Option<PathBuf>,
    pub classifier_backend: ClassifierBackend,
    pub classifier_url: String,
    pub classifier_timeout_secs: u64,
    pub dedup_ttl_secs: u64,
    pub scan_interval_secs: u64,
    pub health_interval_secs: u64,
    pub task_retention_secs: u64,
    pub max_tasks: usize,
    pub task_sweep_secs: u64,
    /// SSE keepalive after this much mailbox inactivity
    pub keepalive_secs: u64,
    /// Save a placeholder `Unknown` detection when the classifier returns nothing
    pub fallback_save_on_empty: bool,
    /// Confidence stored for placeholder detections
    pub fallback_confidence: f64,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            media_root: None,
            archive_root: None,
            classifier_backend: ClassifierBackend::Http,
            classifier_url: "http://127.0.0.1:5000/classify".to_string(),
            classifier_timeout_secs: 30,
            dedup_ttl_secs: 10,
            scan_interval_secs: 900,
            health_interval_secs: 30,
            task_retention_secs: 3600,
            max_tasks: 1000,
            task_sweep_secs: 60,
            keepalive_secs: 30,
            fallback_save_on_empty: false,
            fallback_confidence: 0.2,
        }
    }
}

impl PipelineSettings {
    /// TOML `[pipeline]` table, then environment overrides, then root-folder defaults
    pub fn resolve(toml: &TomlConfig, root_folder: &Path) -> Result<Self> {
        let mut settings: PipelineSettings = toml.pipeline_settings()?;
        settings.apply_env_overrides();
        settings.fill_root_defaults(root_folder);

        info!(
            media_root = %settings.media_root().display(),
            archive_root = %settings.archive_root().display(),
            backend = ?settings.classifier_backend,
            dedup_ttl_secs = settings.dedup_ttl_secs,
            scan_interval_secs = settings.scan_interval_secs,
            "Pipeline settings resolved"
        );
        Ok(settings)
    }

    pub fn apply_env_overrides(&mut self) {
        if let Some(v) = env_override(DEDUP_TTL_ENV) {
            self.dedup_ttl_secs = v;
        }
        if let Some(v) = env_override(SCAN_INTERVAL_ENV) {
            self.scan_interval_secs = v;
        }
        if let Some(v) = env_override(HEALTH_INTERVAL_ENV) {
            self.health_interval_secs = v;
        }
        if let Some(v) = env_override::<PathBuf>(MEDIA_ROOT_ENV) {
            self.media_root = Some(v);
        }
        if let Some(v) = env_override::<PathBuf>(ARCHIVE_ROOT_ENV) {
            self.archive_root = Some(v);
        }
        if let Some(v) = env_override::<String>(CLASSIFIER_URL_ENV) {
            self.classifier_url = v;
        }
        if let Some(v) = env_override(CLASSIFIER_BACKEND_ENV) {
            self.classifier_backend = v;
        }
    }

    fn fill_root_defaults(&mut self, root_folder: &Path) {
        if self.media_root.is_none() {
            self.media_root = Some(root_folder.join("media"));
        }
        if self.archive_root.is_none() {
            self.archive_root = Some(root_folder.join("archive"));
        }
    }

    pub fn media_root(&self) -> PathBuf {
        self.media_root.clone().unwrap_or_else(|| PathBuf::from("media"))
    }

    pub fn archive_root(&self) -> PathBuf {
        self.archive_root
            .clone()
            .unwrap_or_else(|| PathBuf::from("archive"))
    }

    pub fn dedup_ttl(&self) -> Duration {
        Duration::from_secs(self.dedup_ttl_secs)
    }

    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval_secs.max(1))
    }

    pub fn health_interval(&self) -> Duration {
        Duration::from_secs(self.health_interval_secs.max(1))
    }

    pub fn task_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.task_sweep_secs.max(1))
    }

    pub fn keepalive(&self) -> Duration {
        Duration::from_secs(self.keepalive_secs.max(1))
    }
}
