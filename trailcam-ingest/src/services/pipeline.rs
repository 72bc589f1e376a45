//! Shared detection accept path
//!
//! Both ingestion paths (push trigger and backfill sweep) and manual
//! classification run every candidate through [`DetectionPipeline::process`]:
//!
//! ```text
//! hash → known? → classify → analyze (with camera history) → save?
//!      → insert (transaction) → archive copy → fan-out
//! ```
//!
//! The pipeline is reentrant: concurrent calls share only the database and
//! the fan-out, and the content-hash UNIQUE index settles any race.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;
use sqlx::SqlitePool;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::db::{detections, InsertOutcome};
use crate::models::{Detection, DetectionCandidate, NewDetection};
use crate::services::analyzer::{self, AnalysisResult, QualityTier, UNKNOWN};
use crate::services::classifier::Classifier;
use crate::services::fanout::Fanout;
use crate::utils::db_retry::{retry_on_lock, DEFAULT_MAX_LOCK_WAIT};
use crate::utils::file_hash::hash_file;

/// History window fed to the temporal boost
pub const TEMPORAL_WINDOW_HOURS: i64 = 1;

/// What happens when the classifier succeeds but returns no predictions
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FallbackPolicy {
    /// Persist a placeholder `Unknown` detection instead of rejecting
    pub save_on_empty: bool,
    pub confidence: f64,
}

impl Default for FallbackPolicy {
    fn default() -> Self {
        Self {
            save_on_empty: false,
            confidence: 0.2,
        }
    }
}

/// Per-candidate result
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ItemOutcome {
    Saved {
        detection: Detection,
        analysis: AnalysisResult,
        archived_to: Option<PathBuf>,
    },
    /// Analyzed but below the save threshold
    Rejected { analysis: AnalysisResult },
    /// Content hash already recorded
    Duplicate { content_hash: String },
    Failed { error: String },
}

impl ItemOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemOutcome::Saved { .. } => "saved",
            ItemOutcome::Rejected { .. } => "rejected",
            ItemOutcome::Duplicate { .. } => "duplicate",
            ItemOutcome::Failed { .. } => "failed",
        }
    }

    pub fn is_saved(&self) -> bool {
        matches!(self, ItemOutcome::Saved { .. })
    }
}

pub struct DetectionPipeline {
    db: SqlitePool,
    classifier: Arc<dyn Classifier>,
    fanout: Fanout,
    archive_root: PathBuf,
    fallback: FallbackPolicy,
}

impl DetectionPipeline {
    pub fn new(
        db: SqlitePool,
        classifier: Arc<dyn Classifier>,
        fanout: Fanout,
        archive_root: impl Into<PathBuf>,
        fallback: FallbackPolicy,
    ) -> Self {
        Self {
            db,
            classifier,
            fanout,
            archive_root: archive_root.into(),
            fallback,
        }
    }

    pub fn db(&self) -> &SqlitePool {
        &self.db
    }

    pub fn fanout(&self) -> &Fanout {
        &self.fanout
    }

    pub fn classifier_backend(&self) -> &'static str {
        self.classifier.backend_id()
    }

    /// Drive one candidate through the accept path
    pub async fn process(&self, candidate: DetectionCandidate) -> ItemOutcome {
        let path = candidate.source_path.clone();

        let content_hash = match &candidate.content_hash {
            Some(hash) => hash.clone(),
            None => match hash_file(&path).await {
                Ok(hash) => hash,
                Err(e) => {
                    tracing::warn!(path = %path.display(), "Cannot hash candidate: {}", e);
                    return ItemOutcome::Failed {
                        error: e.to_string(),
                    };
                }
            },
        };

        match detections::exists_by_hash(&self.db, &content_hash).await {
            Ok(true) => {
                tracing::debug!(path = %path.display(), "Content already recorded");
                return ItemOutcome::Duplicate { content_hash };
            }
            Ok(false) => {}
            Err(e) => return ItemOutcome::Failed { error: e.to_string() },
        }

        let outcome = self.classifier.classify(&path).await;
        if let Err(e) = &outcome {
            tracing::warn!(
                path = %path.display(),
                backend = self.classifier.backend_id(),
                "Classification failed: {}",
                e
            );
        }

        let window = self
            .recent_window(candidate.camera_id, candidate.effective_timestamp())
            .await;
        let mut analysis = analyzer::analyze(&outcome, window.as_deref());
        self.apply_fallback(&mut analysis);

        if !analysis.should_save {
            tracing::info!(
                path = %path.display(),
                camera_id = candidate.camera_id,
                species = %analysis.species,
                confidence = analysis.confidence,
                tier = analysis.quality_tier.as_str(),
                source = candidate.source.as_str(),
                "Detection rejected"
            );
            return ItemOutcome::Rejected { analysis };
        }

        let raw = outcome.as_deref().unwrap_or_default();
        let new = NewDetection::from_analysis(&candidate, &analysis, raw, Some(content_hash.clone()));
        let inserted = retry_on_lock("insert detection", DEFAULT_MAX_LOCK_WAIT, || {
            detections::insert_detection(&self.db, &new)
        })
        .await;

        let detection = match inserted {
            Ok(InsertOutcome::Inserted(detection)) => detection,
            Ok(InsertOutcome::Duplicate) => return ItemOutcome::Duplicate { content_hash },
            Err(e) => {
                tracing::error!(path = %path.display(), "Detection insert failed: {}", e);
                return ItemOutcome::Failed { error: e.to_string() };
            }
        };

        let archived_to = self.archive(&detection, &path).await;
        self.fanout.publish_detection(&detection, analysis.should_notify);

        ItemOutcome::Saved {
            detection,
            analysis,
            archived_to,
        }
    }

    /// Species of this camera's detections in the hour before `at`
    async fn recent_window(&self, camera_id: i64, at: DateTime<Utc>) -> Option<Vec<String>> {
        let since = at - ChronoDuration::hours(TEMPORAL_WINDOW_HOURS);
        match detections::recent_species(&self.db, camera_id, since, at).await {
            Ok(species) => Some(species),
            Err(e) => {
                tracing::warn!(camera_id, "Recent detection lookup failed: {}", e);
                None
            }
        }
    }

    fn apply_fallback(&self, analysis: &mut AnalysisResult) {
        if self.fallback.save_on_empty && analysis.quality_tier == QualityTier::NoPredictions {
            analysis.confidence = self.fallback.confidence.clamp(0.0, 1.0);
            analysis.should_save = true;
            analysis.should_notify = false;
        }
    }

    /// Copy the image into the species archive; `Unknown` is never archived
    async fn archive(&self, detection: &Detection, source: &Path) -> Option<PathBuf> {
        if detection.species == UNKNOWN {
            return None;
        }

        let dest = archive_destination(&self.archive_root, detection, source);
        let (src, dst) = (source.to_path_buf(), dest.clone());
        let copied = tokio::task::spawn_blocking(move || -> std::io::Result<()> {
            if let Some(parent) = dst.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::copy(&src, &dst)?;
            Ok(())
        })
        .await;

        match copied {
            Ok(Ok(())) => {
                tracing::debug!(from = %source.display(), to = %dest.display(), "Archived");
                Some(dest)
            }
            Ok(Err(e)) => {
                tracing::warn!(path = %source.display(), "Archive copy failed: {}", e);
                None
            }
            Err(e) => {
                tracing::warn!(path = %source.display(), "Archive task failed: {}", e);
                None
            }
        }
    }
}

/// `archive_root/<species>/Camera<N>/<date>/<filename>`
///
/// The date folder is taken from the source layout when it has one,
/// otherwise from the detection timestamp.
pub fn archive_destination(archive_root: &Path, detection: &Detection, source: &Path) -> PathBuf {
    let species = sanitize_component(&detection.species);
    let camera = format!("Camera{}", detection.camera_id);

    let date = source
        .parent()
        .filter(|parent| {
            parent
                .parent()
                .and_then(|p| p.file_name())
                .and_then(|n| n.to_str())
                .is_some_and(|n| crate::services::backfill_scanner::parse_camera_folder(n).is_some())
        })
        .and_then(|parent| parent.file_name())
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| detection.timestamp.format("%Y-%m-%d").to_string());

    let filename = source
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| format!("detection-{}.jpg", detection.id));

    archive_root.join(species).join(camera).join(date).join(filename)
}

fn sanitize_component(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| if matches!(c, '/' | '\\' | ':' | '\0') { '_' } else { c })
        .collect();
    match cleaned.trim() {
        "" | "." | ".." => UNKNOWN.to_string(),
        trimmed => trimmed.to_string(),
    }
}
