//! Crash-resumable task queue.
//!
//! A durable ordered list of task records (`task-queue.json`), re-persisted
//! with an atomic rename after every mutation. On restart,
//! [`TaskQueue::recover_tasks`] returns every task that was running at the
//! crash together with its most recent checkpoint so the owner can resume
//! from there instead of from scratch.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use windward_core::error::WindwardError;
use windward_core::types::Timestamp;

use crate::fsutil::write_atomic;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

/// A named, durable, resumable point within a long-running task.
/// Checkpoint names are opaque strings whose meaning is documented per
/// task type (e.g. MARKETS_FETCHED, SEGMENTS_CREATED, RESEARCH_COMPLETE).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub name: String,
    pub data: serde_json::Value,
    pub timestamp: Timestamp,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub task_id: String,
    pub task_type: String,
    pub input: serde_json::Value,
    pub status: TaskStatus,
    pub created_at: Timestamp,
    pub started_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
    pub checkpoints: Vec<Checkpoint>,
    pub output: Option<serde_json::Value>,
    pub error: Option<String>,
}

impl Task {
    pub fn latest_checkpoint(&self) -> Option<&Checkpoint> {
        self.checkpoints.last()
    }
}

/// A task found running after a crash, plus where to resume.
#[derive(Debug, Clone)]
pub struct RecoveredTask {
    pub task: Task,
    pub resume_from: Option<String>,
}

pub struct TaskQueue {
    path: PathBuf,
    tasks: Mutex<Vec<Task>>,
    counter: AtomicU64,
}

impl TaskQueue {
    /// Open the queue at `path`, loading any persisted tasks. A missing
    /// file is an empty queue; an unreadable one is treated the same after
    /// a warning (the orphan-free invariant favors an empty restart over a
    /// poisoned one).
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let tasks = match std::fs::read(&path) {
            Ok(bytes) => match serde_json::from_slice(&bytes) {
                Ok(tasks) => tasks,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "task queue unreadable, starting empty");
                    Vec::new()
                }
            },
            Err(_) => Vec::new(),
        };
        Self { path, tasks: Mutex::new(tasks), counter: AtomicU64::new(0) }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create a pending task record and persist it.
    pub fn add_task(
        &self,
        task_type: &str,
        input: serde_json::Value,
        now: Timestamp,
    ) -> Result<Task, WindwardError> {
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        let task = Task {
            task_id: format!("task-{}-{}-{n}", std::process::id(), now),
            task_type: task_type.to_string(),
            input,
            status: TaskStatus::Pending,
            created_at: now,
            started_at: None,
            completed_at: None,
            checkpoints: Vec::new(),
            output: None,
            error: None,
        };
        let mut tasks = self.tasks.lock().expect("task queue lock poisoned");
        tasks.push(task.clone());
        self.persist(&tasks)?;
        Ok(task)
    }

    pub fn start_task(&self, task_id: &str, now: Timestamp) -> Result<(), WindwardError> {
        self.mutate(task_id, |t| {
            t.status = TaskStatus::Running;
            t.started_at = Some(now);
        })
    }

    pub fn add_checkpoint(
        &self,
        task_id: &str,
        name: &str,
        data: serde_json::Value,
        now: Timestamp,
    ) -> Result<(), WindwardError> {
        self.mutate(task_id, |t| {
            t.checkpoints.push(Checkpoint {
                name: name.to_string(),
                data,
                timestamp: now,
            });
        })
    }

    /// Mark a task completed and prune it from the durable list.
    pub fn complete_task(
        &self,
        task_id: &str,
        output: serde_json::Value,
        now: Timestamp,
    ) -> Result<(), WindwardError> {
        let mut tasks = self.tasks.lock().expect("task queue lock poisoned");
        let idx = tasks
            .iter()
            .position(|t| t.task_id == task_id)
            .ok_or_else(|| WindwardError::TaskNotFound(task_id.to_string()))?;
        tasks[idx].status = TaskStatus::Completed;
        tasks[idx].completed_at = Some(now);
        tasks[idx].output = Some(output);
        info!(task_id, "task completed");
        tasks.remove(idx);
        self.persist(&tasks)
    }

    pub fn fail_task(&self, task_id: &str, error: &str, now: Timestamp) -> Result<(), WindwardError> {
        self.mutate(task_id, |t| {
            t.status = TaskStatus::Failed;
            t.completed_at = Some(now);
            t.error = Some(error.to_string());
        })
    }

    /// Every task that was running at the last crash, with its most recent
    /// checkpoint name as the resume point.
    pub fn recover_tasks(&self) -> Vec<RecoveredTask> {
        let tasks = self.tasks.lock().expect("task queue lock poisoned");
        tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Running)
            .map(|t| RecoveredTask {
                task: t.clone(),
                resume_from: t.latest_checkpoint().map(|c| c.name.clone()),
            })
            .collect()
    }

    pub fn get(&self, task_id: &str) -> Option<Task> {
        let tasks = self.tasks.lock().expect("task queue lock poisoned");
        tasks.iter().find(|t| t.task_id == task_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.tasks.lock().expect("task queue lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn mutate<F: FnOnce(&mut Task)>(&self, task_id: &str, f: F) -> Result<(), WindwardError> {
        let mut tasks = self.tasks.lock().expect("task queue lock poisoned");
        let task = tasks
            .iter_mut()
            .find(|t| t.task_id == task_id)
            .ok_or_else(|| WindwardError::TaskNotFound(task_id.to_string()))?;
        f(task);
        self.persist(&tasks)
    }

    fn persist(&self, tasks: &[Task]) -> Result<(), WindwardError> {
        let bytes = serde_json::to_vec_pretty(tasks)?;
        write_atomic(&self.path, &bytes)
            .map_err(|e| WindwardError::Io(format!("{}: {e}", self.path.display())))
    }
}
