//! System health snapshots
//!
//! The monitor recomputes a [`SystemHealth`] snapshot on the health
//! interval, keeps the latest one for `GET /api/system/health`, and
//! broadcasts it to stream subscribers as a `system` event. Transitions into
//! a degraded state raise a `system_alert`.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::SqlitePool;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use trailcam_common::events::StreamEvent;

use crate::db::detections;
use crate::services::dedup_cache::DedupCache;
use crate::services::fanout::Fanout;
use crate::services::task_tracker::TaskTracker;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
}

#[derive(Debug, Clone, Serialize)]
pub struct SystemHealth {
    pub status: HealthStatus,
    pub timestamp: DateTime<Utc>,
    pub uptime_seconds: i64,
    pub detections_total: i64,
    pub media_root_available: bool,
    pub dedup_entries: usize,
    pub active_tasks: usize,
    pub tracked_tasks: usize,
    pub stream_subscribers: usize,
    pub classifier_backend: &'static str,
    pub issues: Vec<String>,
}

pub struct HealthMonitor {
    db: SqlitePool,
    media_root: PathBuf,
    dedup: Arc<DedupCache>,
    tasks: Arc<TaskTracker>,
    fanout: Fanout,
    classifier_backend: &'static str,
    started_at: DateTime<Utc>,
    latest: RwLock<Option<SystemHealth>>,
    degraded: AtomicBool,
}

impl HealthMonitor {
    pub fn new(
        db: SqlitePool,
        media_root: impl Into<PathBuf>,
        dedup: Arc<DedupCache>,
        tasks: Arc<TaskTracker>,
        fanout: Fanout,
        classifier_backend: &'static str,
    ) -> Self {
        Self {
            db,
            media_root: media_root.into(),
            dedup,
            tasks,
            fanout,
            classifier_backend,
            started_at: Utc::now(),
            latest: RwLock::new(None),
            degraded: AtomicBool::new(false),
        }
    }

    /// Compute a fresh snapshot; fails only when the database is unreachable
    pub async fn snapshot(&self) -> trailcam_common::Result<SystemHealth> {
        let detections_total = detections::count_detections(&self.db).await?;
        let media_root_available = tokio::fs::metadata(&self.media_root)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false);

        let mut issues = Vec::new();
        if !media_root_available {
            issues.push(format!("media root {} unavailable", self.media_root.display()));
        }

        let now = Utc::now();
        Ok(SystemHealth {
            status: if issues.is_empty() {
                HealthStatus::Healthy
            } else {
                HealthStatus::Degraded
            },
            timestamp: now,
            uptime_seconds: (now - self.started_at).num_seconds(),
            detections_total,
            media_root_available,
            dedup_entries: self.dedup.len(),
            active_tasks: self.tasks.active_count(),
            tracked_tasks: self.tasks.len(),
            stream_subscribers: self.fanout.broadcaster().subscriber_count(),
            classifier_backend: self.classifier_backend,
            issues,
        })
    }

    /// One health-loop iteration: snapshot, store, broadcast, alert on degradation
    pub async fn tick(&self) -> trailcam_common::Result<()> {
        let snapshot = match self.snapshot().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                self.mark(true, &[format!("health snapshot failed: {}", e)]);
                return Err(e);
            }
        };

        self.mark(snapshot.status == HealthStatus::Degraded, &snapshot.issues);

        match serde_json::to_value(&snapshot) {
            Ok(data) => {
                self.fanout.broadcaster().publish(StreamEvent::system(data));
            }
            Err(e) => tracing::warn!("Cannot serialize health snapshot: {}", e),
        }

        if let Ok(mut latest) = self.latest.write() {
            *latest = Some(snapshot);
        }
        Ok(())
    }

    /// Most recent stored snapshot
    pub fn latest(&self) -> Option<SystemHealth> {
        self.latest.read().ok().and_then(|latest| latest.clone())
    }

    /// Track degraded state; alert on the healthy → degraded edge only
    fn mark(&self, degraded: bool, issues: &[String]) {
        let was_degraded = self.degraded.swap(degraded, Ordering::SeqCst);
        if degraded && !was_degraded {
            self.fanout
                .system_alert("System health degraded", serde_json::json!({ "issues": issues }));
        } else if !degraded && was_degraded {
            tracing::info!("System health recovered");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trailcam_common::events::{EventBroadcaster, StreamEventKind};

    async fn monitor(media_root: PathBuf) -> HealthMonitor {
        let pool = trailcam_common::db::init_in_memory().await.unwrap();
        let fanout = Fanout::new(pool.clone(), EventBroadcaster::new());
        HealthMonitor::new(
            pool,
            media_root,
            Arc::new(DedupCache::default()),
            Arc::new(TaskTracker::default()),
            fanout,
            "http",
        )
    }

    #[tokio::test]
    async fn test_healthy_snapshot_is_broadcast_and_stored() {
        let dir = tempfile::tempdir().unwrap();
        let monitor = monitor(dir.path().to_path_buf()).await;
        let mut mailbox = monitor.fanout.broadcaster().subscribe();

        assert!(monitor.latest().is_none());
        monitor.tick().await.unwrap();

        let latest = monitor.latest().unwrap();
        assert_eq!(latest.status, HealthStatus::Healthy);
        assert_eq!(latest.detections_total, 0);
        assert_eq!(latest.stream_subscribers, 1);

        let event = mailbox.recv().await.unwrap();
        assert_eq!(event.kind, StreamEventKind::System);
        assert_eq!(event.data["status"], "healthy");
    }

    #[tokio::test]
    async fn test_missing_media_root_degrades_and_alerts_once() {
        let monitor = monitor(PathBuf::from("/nonexistent/trailcam/media")).await;
        let mut mailbox = monitor.fanout.broadcaster().subscribe();

        monitor.tick().await.unwrap();
        monitor.tick().await.unwrap();

        let mut alerts = 0;
        let mut snapshots = 0;
        while let Some(event) = mailbox.try_recv() {
            if event.data.get("level").is_some() {
                alerts += 1;
            } else {
                snapshots += 1;
                assert_eq!(event.data["status"], "degraded");
            }
        }
        assert_eq!(alerts, 1);
        assert_eq!(snapshots, 2);
    }
}
