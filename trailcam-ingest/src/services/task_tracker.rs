//! Background Task Tracker
//!
//! Tracks long-running asynchronous operations (manual classification,
//! triggered ingestion, on-demand backfill scans) through an explicit
//! lifecycle:
//!
//! ```text
//! PENDING → RUNNING → { COMPLETED | FAILED | CANCELLED }
//!    └──────────────────────────────────↗ (cancel)
//! ```
//!
//! Every transition is guarded and reports whether it happened. Terminal
//! tasks are garbage-collected by [`TaskTracker::sweep`]; pending and running
//! tasks are never evicted.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

/// Default retention for terminal tasks
pub const DEFAULT_RETENTION_SECS: u64 = 3600;
/// Default registry size bound
pub const DEFAULT_MAX_TASKS: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}

/// A tracked operation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackedTask {
    pub task_id: String,
    pub task_type: String,
    pub status: TaskStatus,
    /// Fraction complete, 0.0–1.0
    pub progress: f64,
    pub message: Option<String>,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl TrackedTask {
    fn new(task_type: &str) -> Self {
        Self {
            task_id: Uuid::new_v4().to_string(),
            task_type: task_type.to_string(),
            status: TaskStatus::Pending,
            progress: 0.0,
            message: None,
            result: None,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    fn finish(&mut self, status: TaskStatus) {
        self.status = status;
        self.completed_at = Some(Utc::now());
    }
}

/// Process-wide task registry, held in application state
pub struct TaskTracker {
    tasks: Mutex<HashMap<String, TrackedTask>>,
    retention: ChronoDuration,
    max_tasks: usize,
}

impl TaskTracker {
    pub fn new(retention_secs: u64, max_tasks: usize) -> Self {
        Self {
            tasks: Mutex::new(HashMap::new()),
            retention: ChronoDuration::seconds(retention_secs as i64),
            max_tasks,
        }
    }

    fn tasks(&self) -> MutexGuard<'_, HashMap<String, TrackedTask>> {
        self.tasks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Apply `f` to the task if it exists; returns `f`'s verdict
    fn with_task(&self, task_id: &str, f: impl FnOnce(&mut TrackedTask) -> bool) -> bool {
        match self.tasks().get_mut(task_id) {
            Some(task) => f(task),
            None => false,
        }
    }

    /// Register a new pending task and return its id
    pub fn create(&self, task_type: &str) -> String {
        let task = TrackedTask::new(task_type);
        let task_id = task.task_id.clone();
        self.tasks().insert(task_id.clone(), task);
        tracing::debug!(task_id = %task_id, task_type, "Task created");
        task_id
    }

    /// PENDING → RUNNING
    pub fn start(&self, task_id: &str) -> bool {
        self.with_task(task_id, |task| {
            if task.status != TaskStatus::Pending {
                return false;
            }
            task.status = TaskStatus::Running;
            task.started_at = Some(Utc::now());
            true
        })
    }

    /// Progress/message update; only while RUNNING
    pub fn update(&self, task_id: &str, progress: f64, message: Option<String>) -> bool {
        self.with_task(task_id, |task| {
            if task.status != TaskStatus::Running {
                return false;
            }
            task.progress = if progress.is_finite() {
                progress.clamp(0.0, 1.0)
            } else {
                task.progress
            };
            if message.is_some() {
                task.message = message;
            }
            true
        })
    }

    /// Mark COMPLETED with an optional result payload
    pub fn complete(&self, task_id: &str, result: Option<serde_json::Value>) -> bool {
        self.with_task(task_id, |task| {
            if task.status.is_terminal() {
                return false;
            }
            task.progress = 1.0;
            task.result = result;
            task.finish(TaskStatus::Completed);
            true
        })
    }

    /// Mark FAILED with an error message
    pub fn fail(&self, task_id: &str, error: impl Into<String>) -> bool {
        let error = error.into();
        self.with_task(task_id, |task| {
            if task.status.is_terminal() {
                return false;
            }
            task.error = Some(error);
            task.finish(TaskStatus::Failed);
            true
        })
    }

    /// Mark CANCELLED; refused once the task is terminal
    pub fn cancel(&self, task_id: &str) -> bool {
        self.with_task(task_id, |task| {
            if task.status.is_terminal() {
                return false;
            }
            task.finish(TaskStatus::Cancelled);
            true
        })
    }

    pub fn get(&self, task_id: &str) -> Option<TrackedTask> {
        self.tasks().get(task_id).cloned()
    }

    pub fn status(&self, task_id: &str) -> Option<TaskStatus> {
        self.tasks().get(task_id).map(|t| t.status)
    }

    /// All tasks, newest first
    pub fn list(&self) -> Vec<TrackedTask> {
        let mut tasks: Vec<TrackedTask> = self.tasks().values().cloned().collect();
        tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        tasks
    }

    /// Tasks still pending or running
    pub fn active_count(&self) -> usize {
        self.tasks()
            .values()
            .filter(|t| !t.status.is_terminal())
            .count()
    }

    pub fn len(&self) -> usize {
        self.tasks().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove expired terminal tasks, then the oldest terminal tasks while
    /// over the size bound. Returns the number removed.
    pub fn sweep(&self, now: DateTime<Utc>) -> usize {
        let mut tasks = self.tasks();
        let before = tasks.len();
        let cutoff = now - self.retention;

        tasks.retain(|_, task| {
            !(task.status.is_terminal() && task.completed_at.is_some_and(|done| done < cutoff))
        });

        if tasks.len() > self.max_tasks {
            let mut terminal: Vec<(DateTime<Utc>, String)> = tasks
                .values()
                .filter(|t| t.status.is_terminal())
                .map(|t| (t.completed_at.unwrap_or(t.created_at), t.task_id.clone()))
                .collect();
            terminal.sort();

            let excess = tasks.len() - self.max_tasks;
            for (_, task_id) in terminal.into_iter().take(excess) {
                tasks.remove(&task_id);
            }
        }

        let removed = before - tasks.len();
        if removed > 0 {
            tracing::debug!(removed, remaining = tasks.len(), "Task sweep");
        }
        removed
    }
}

impl Default for TaskTracker {
    fn default() -> Self {
        Self::new(DEFAULT_RETENTION_SECS, DEFAULT_MAX_TASKS)
    }
}
