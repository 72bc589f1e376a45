//! Shared fixtures for the trailcam-ingest integration tests

#![allow(dead_code)]

pub mod receiver;

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use trailcam_common::events::EventBroadcaster;

use trailcam_ingest::config::PipelineSettings;
use trailcam_ingest::services::classifier::{Classifier, ClassifierError, ClassifierOutcome};
use trailcam_ingest::services::RawPrediction;
use trailcam_ingest::AppState;

pub use receiver::{CapturedRequest, WebhookReceiver};

/// Classifier double returning a fixed outcome and counting calls
pub struct MockClassifier {
    outcome: Mutex<ClassifierOutcome>,
    calls: AtomicUsize,
}

impl MockClassifier {
    pub fn new(outcome: ClassifierOutcome) -> Arc<Self> {
        Arc::new(Self {
            outcome: Mutex::new(outcome),
            calls: AtomicUsize::new(0),
        })
    }

    /// `uuid;Mammalia;Deer` at 0.82 and `uuid;Mammalia;Fox` at 0.30
    pub fn deer() -> Arc<Self> {
        Self::new(Ok(vec![
            RawPrediction::new("uuid;Mammalia;Deer", 0.82),
            RawPrediction::new("uuid;Mammalia;Fox", 0.30),
        ]))
    }

    pub fn empty() -> Arc<Self> {
        Self::new(Ok(Vec::new()))
    }

    pub fn failing() -> Arc<Self> {
        Self::new(Err(ClassifierError::Connection("connection refused".into())))
    }

    pub fn set_outcome(&self, outcome: ClassifierOutcome) {
        if let Ok(mut current) = self.outcome.lock() {
            *current = outcome;
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Classifier for MockClassifier {
    fn backend_id(&self) -> &'static str {
        "mock"
    }

    async fn classify(&self, _image: &Path) -> ClassifierOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.outcome.lock().map(|o| o.clone()).unwrap_or(Ok(Vec::new()))
    }
}

/// An isolated service instance over temporary media and archive trees
pub struct TestEnv {
    pub state: AppState,
    pub classifier: Arc<MockClassifier>,
    pub root: TempDir,
}

impl TestEnv {
    pub async fn new(classifier: Arc<MockClassifier>) -> Self {
        Self::with_settings(classifier, |_| {}).await
    }

    pub async fn with_settings(
        classifier: Arc<MockClassifier>,
        configure: impl FnOnce(&mut PipelineSettings),
    ) -> Self {
        let root = TempDir::new().unwrap();
        std::fs::create_dir_all(root.path().join("media")).unwrap();

        let mut settings = PipelineSettings {
            media_root: Some(root.path().join("media")),
            archive_root: Some(root.path().join("archive")),
            ..Default::default()
        };
        configure(&mut settings);

        let db = trailcam_common::db::init_in_memory().await.unwrap();
        let state = AppState::new(
            db,
            settings,
            classifier.clone() as Arc<dyn Classifier>,
            EventBroadcaster::new(),
        );

        Self {
            state,
            classifier,
            root,
        }
    }

    pub fn media_root(&self) -> PathBuf {
        self.root.path().join("media")
    }

    pub fn archive_root(&self) -> PathBuf {
        self.root.path().join("archive")
    }

    /// Write an image under `media/Camera<N>/<date>/<name>`
    pub fn write_image(&self, camera_id: i64, date: &str, name: &str, content: &[u8]) -> PathBuf {
        let dir = self
            .media_root()
            .join(format!("Camera{}", camera_id))
            .join(date);
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        std::fs::write(&path, content).unwrap();
        path
    }
}

/// Poll until `check` holds, up to two seconds
pub async fn wait_for(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    check()
}
