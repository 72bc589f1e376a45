//! Pipeline services
//!
//! Leaves first: dedup cache, analyzer, classifier backends; then the shared
//! accept path, the backfill sweep, notification fan-out, task tracking and
//! the periodic loops that drive them.

pub mod analyzer;
pub mod backfill_scanner;
pub mod classifier;
pub mod dedup_cache;
pub mod fanout;
pub mod health_monitor;
pub mod pipeline;
pub mod scheduler;
pub mod task_tracker;
pub mod webhook_notifier;

pub use analyzer::{analyze, AnalysisResult, QualityTier};
pub use backfill_scanner::{BackfillReport, BackfillScanner, ScanError};
pub use classifier::{build_classifier, Classifier, ClassifierError, RawPrediction};
pub use dedup_cache::DedupCache;
pub use fanout::Fanout;
pub use health_monitor::{HealthMonitor, SystemHealth};
pub use pipeline::{DetectionPipeline, FallbackPolicy, ItemOutcome};
pub use scheduler::spawn_periodic;
pub use task_tracker::{TaskStatus, TaskTracker, TrackedTask};
pub use webhook_notifier::{DeliveryOutcome, WebhookNotifier};
