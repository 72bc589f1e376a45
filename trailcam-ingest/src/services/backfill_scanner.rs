//! Backfill Scanner
//!
//! Periodic sweep of the camera upload tree for images that never arrived
//! through the push path, e.g. webhooks lost while the service was down.
//! Layout:
//!
//! ```text
//! media_root/
//!   Camera<N>/
//!     <date>/
//!       <file>.jpg|jpeg|png
//! ```
//!
//! Two phases:
//! 1. **Scan** (blocking pool): walk at depth exactly 3, keep image files
//!    that are not motion masks, hash each, drop hashes already recorded.
//! 2. **Process**: each new file goes through the shared
//!    [`DetectionPipeline`]; the pipeline re-checks the hash against the
//!    database right before insert, so a concurrent push-path accept of the
//!    same content still yields one row.
//!
//! A sweep over an unchanged directory creates nothing the second time.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use thiserror::Error;
use tokio::sync::Mutex;
use walkdir::{DirEntry, WalkDir};

use crate::db::detections;
use crate::models::{DetectionCandidate, IngestSource};
use crate::services::pipeline::{DetectionPipeline, ItemOutcome};
use crate::utils::file_hash::hash_file_blocking;

const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];
const MASK_SUFFIXES: [&str; 3] = ["-mask", "_mask", ".mask"];

static CAMERA_FOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?i)camera[ _-]?(\d+)$").expect("valid camera folder pattern"));

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("Media root not found: {0}")]
    PathNotFound(PathBuf),

    #[error("Media root is not a directory: {0}")]
    NotADirectory(PathBuf),

    #[error("A backfill sweep is already running")]
    AlreadyRunning,

    #[error("Scan task failed: {0}")]
    Task(String),

    #[error(transparent)]
    Database(#[from] trailcam_common::Error),
}

/// A new file found by [`BackfillScanner::scan`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CandidateFile {
    pub path: PathBuf,
    pub camera_id: i64,
    pub content_hash: String,
    /// File modification time, used as the capture time
    pub modified_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default)]
pub struct ScanOutcome {
    pub candidates: Vec<CandidateFile>,
    /// Files whose content hash is already recorded
    pub skipped_known: usize,
    /// Unreadable entries; the sweep continues past them
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BackfillItem {
    pub path: PathBuf,
    #[serde(flatten)]
    pub outcome: ItemOutcome,
}

/// Summary of one sweep
#[derive(Debug, Clone, Default, Serialize)]
pub struct BackfillReport {
    pub skipped_known: usize,
    pub saved: usize,
    pub rejected: usize,
    pub duplicate: usize,
    pub failed: usize,
    pub errors: Vec<String>,
    pub items: Vec<BackfillItem>,
}

impl BackfillReport {
    fn record(&mut self, path: PathBuf, outcome: ItemOutcome) {
        match &outcome {
            ItemOutcome::Saved { .. } => self.saved += 1,
            ItemOutcome::Rejected { .. } => self.rejected += 1,
            ItemOutcome::Duplicate { .. } => self.duplicate += 1,
            ItemOutcome::Failed { .. } => self.failed += 1,
        }
        self.items.push(BackfillItem { path, outcome });
    }
}

/// Camera id from a `Camera<N>` folder name
pub fn parse_camera_folder(name: &str) -> Option<i64> {
    CAMERA_FOLDER
        .captures(name.trim())
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// `jpg|jpeg|png`, case-insensitive
pub fn is_image_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            IMAGE_EXTENSIONS
                .iter()
                .any(|known| ext.eq_ignore_ascii_case(known))
        })
}

/// Motion-mask overlays (`*-mask`, `*_mask`, `*.mask` stems)
pub fn is_mask_file(path: &Path) -> bool {
    path.file_stem()
        .and_then(|stem| stem.to_str())
        .map(|stem| stem.to_ascii_lowercase())
        .is_some_and(|stem| MASK_SUFFIXES.iter().any(|suffix| stem.ends_with(suffix)))
}

pub struct BackfillScanner {
    media_root: PathBuf,
    pipeline: Arc<DetectionPipeline>,
    sweep_lock: Mutex<()>,
}

impl BackfillScanner {
    pub fn new(media_root: impl Into<PathBuf>, pipeline: Arc<DetectionPipeline>) -> Self {
        Self {
            media_root: media_root.into(),
            pipeline,
            sweep_lock: Mutex::new(()),
        }
    }

    pub fn media_root(&self) -> &Path {
        &self.media_root
    }

    /// Find files whose content has not been recorded yet
    pub async fn scan(&self) -> Result<ScanOutcome, ScanError> {
        if !self.media_root.exists() {
            return Err(ScanError::PathNotFound(self.media_root.clone()));
        }
        if !self.media_root.is_dir() {
            return Err(ScanError::NotADirectory(self.media_root.clone()));
        }

        let known = detections::load_all_hashes(self.pipeline.db()).await?;
        let root = self.media_root.clone();

        let outcome = tokio::task::spawn_blocking(move || scan_blocking(&root, known))
            .await
            .map_err(|e| ScanError::Task(e.to_string()))?;

        tracing::debug!(
            candidates = outcome.candidates.len(),
            skipped_known = outcome.skipped_known,
            errors = outcome.errors.len(),
            "Backfill scan complete"
        );
        Ok(outcome)
    }

    /// Run one candidate through the shared pipeline
    pub async fn process(&self, candidate: &CandidateFile) -> ItemOutcome {
        let detection_candidate =
            DetectionCandidate::new(&candidate.path, candidate.camera_id, IngestSource::Backfill)
                .with_hash(&candidate.content_hash)
                .with_captured_at(candidate.modified_at);
        self.pipeline.process(detection_candidate).await
    }

    /// Scan, then process every candidate
    ///
    /// Overlapping sweeps (timer plus manual trigger) are refused.
    pub async fn run_once(&self) -> Result<BackfillReport, ScanError> {
        let _sweep = self
            .sweep_lock
            .try_lock()
            .map_err(|_| ScanError::AlreadyRunning)?;

        let scan = self.scan().await?;
        let mut report = BackfillReport {
            skipped_known: scan.skipped_known,
            errors: scan.errors,
            ..Default::default()
        };

        for candidate in &scan.candidates {
            let outcome = self.process(candidate).await;
            report.record(candidate.path.clone(), outcome);
        }

        tracing::info!(
            root = %self.media_root.display(),
            saved = report.saved,
            rejected = report.rejected,
            duplicate = report.duplicate,
            failed = report.failed,
            skipped_known = report.skipped_known,
            "Backfill sweep finished"
        );
        Ok(report)
    }

    /// Newest image in a camera's folder tree, by modification time
    ///
    /// Used for triggers that name a camera but no file.
    pub async fn latest_image_for_camera(&self, camera_id: i64) -> Option<PathBuf> {
        let root = self.media_root.clone();
        tokio::task::spawn_blocking(move || latest_image_blocking(&root, camera_id))
            .await
            .ok()
            .flatten()
    }
}

fn is_camera_dir(entry: &DirEntry) -> bool {
    entry.file_type().is_dir()
        && entry
            .file_name()
            .to_str()
            .and_then(parse_camera_folder)
            .is_some()
}

/// Depth-1 entries must be camera folders; deeper entries pass
fn keep_entry(entry: &DirEntry) -> bool {
    entry.depth() != 1 || is_camera_dir(entry)
}

/// Camera id of an image at `root/Camera<N>/<date>/<file>`
fn camera_of(path: &Path) -> Option<i64> {
    path.parent()?
        .parent()?
        .file_name()?
        .to_str()
        .and_then(parse_camera_folder)
}

fn scan_blocking(root: &Path, mut known: HashSet<String>) -> ScanOutcome {
    let mut outcome = ScanOutcome::default();

    let walker = WalkDir::new(root)
        .follow_links(false)
        .min_depth(3)
        .max_depth(3)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(keep_entry);

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!("Error accessing entry: {}", e);
                outcome.errors.push(e.to_string());
                continue;
            }
        };

        let path = entry.path();
        if !entry.file_type().is_file() || !is_image_file(path) || is_mask_file(path) {
            continue;
        }
        let Some(camera_id) = camera_of(path) else {
            continue;
        };

        let content_hash = match hash_file_blocking(path) {
            Ok(hash) => hash,
            Err(e) => {
                tracing::warn!(path = %path.display(), "Cannot hash file: {}", e);
                outcome.errors.push(format!("{}: {}", path.display(), e));
                continue;
            }
        };

        // Insert doubles as the in-sweep dedup for identical copies
        if !known.insert(content_hash.clone()) {
            outcome.skipped_known += 1;
            continue;
        }

        let modified_at = entry
            .metadata()
            .ok()
            .and_then(|m| m.modified().ok())
            .map(DateTime::<Utc>::from);

        outcome.candidates.push(CandidateFile {
            path: path.to_path_buf(),
            camera_id,
            content_hash,
            modified_at,
        });
    }

    outcome
}

fn latest_image_blocking(root: &Path, camera_id: i64) -> Option<PathBuf> {
    let camera_dirs = std::fs::read_dir(root).ok()?.filter_map(|e| e.ok()).filter(|e| {
        e.file_type().is_ok_and(|t| t.is_dir())
            && e.file_name().to_str().and_then(parse_camera_folder) == Some(camera_id)
    });

    let mut newest: Option<(SystemTime, PathBuf)> = None;
    for camera_dir in camera_dirs {
        for entry in WalkDir::new(camera_dir.path())
            .min_depth(2)
            .max_depth(2)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            let path = entry.path();
            if !entry.file_type().is_file() || !is_image_file(path) || is_mask_file(path) {
                continue;
            }
            let Some(modified) = entry.metadata().ok().and_then(|m| m.modified().ok()) else {
                continue;
            };
            if newest.as_ref().map_or(true, |(ts, _)| modified > *ts) {
                newest = Some((modified, path.to_path_buf()));
            }
        }
    }

    newest.map(|(_, path)| path)
}
