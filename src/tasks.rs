//! Task Lifecycle Manager: at most one active run per conversation.
//!
//! The manager is the only owner of task state. Every mutation happens under
//! one lock; the per-task [`CancelHandle`] is the only thing stored for
//! cancellation.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::future::Future;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::cancel::{CancelCause, CancelHandle};

/// Completed-task records kept when no size is configured.
pub const DEFAULT_COMPLETED_HISTORY: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Running,
    Cancelling,
    Completed,
    Cancelled,
    Timeout,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Cancelled | TaskStatus::Timeout | TaskStatus::Failed
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStatus::Running => "running",
            TaskStatus::Cancelling => "cancelling",
            TaskStatus::Completed => "completed",
            TaskStatus::Cancelled => "cancelled",
            TaskStatus::Timeout => "timeout",
            TaskStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// An active conversational run.
#[derive(Debug, Clone, Serialize)]
pub struct Task {
    pub conversation_id: String,
    pub message: String,
    pub started_at: DateTime<Utc>,
    pub status: TaskStatus,
    #[serde(skip)]
    pub cancel: CancelHandle,
}

#[derive(Debug, Clone, Serialize)]
pub struct CompletedTask {
    pub conversation_id: String,
    pub message: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub status: TaskStatus,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TaskError {
    #[error("a task is already running for conversation {0}")]
    AlreadyRunning(String),

    #[error("task for conversation {conversation_id} has already finished ({status})")]
    NotCancellable {
        conversation_id: String,
        status: TaskStatus,
    },
}

#[derive(Default)]
struct Inner {
    active: HashMap<String, Task>,
    completed: VecDeque<CompletedTask>,
}

pub struct TaskManager {
    inner: RwLock<Inner>,
    history_limit: usize,
}

impl Default for TaskManager {
    fn default() -> Self {
        Self::new(DEFAULT_COMPLETED_HISTORY)
    }
}

impl TaskManager {
    pub fn new(history_limit: usize) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            history_limit,
        }
    }

    /// Register a running task. Fails if the conversation already has one.
    pub async fn start_task(
        &self,
        conversation_id: &str,
        message: &str,
        cancel: CancelHandle,
    ) -> Result<Task, TaskError> {
        let mut inner = self.inner.write().await;
        if inner.active.contains_key(conversation_id) {
            return Err(TaskError::AlreadyRunning(conversation_id.to_string()));
        }
        let task = Task {
            conversation_id: conversation_id.to_string(),
            message: message.to_string(),
            started_at: Utc::now(),
            status: TaskStatus::Running,
            cancel,
        };
        inner.active.insert(conversation_id.to_string(), task.clone());
        tracing::info!(conversation_id = %conversation_id, "Task started");
        Ok(task)
    }

    /// Ask the active task to stop. Returns `Ok(false)` when nothing is
    /// running for the conversation.
    pub async fn cancel_task(&self, conversation_id: &str, cause: CancelCause) -> Result<bool, TaskError> {
        let mut inner = self.inner.write().await;
        let Some(task) = inner.active.get_mut(conversation_id) else {
            return Ok(false);
        };
        if task.status.is_terminal() {
            return Err(TaskError::NotCancellable {
                conversation_id: conversation_id.to_string(),
                status: task.status,
            });
        }
        task.status = TaskStatus::Cancelling;
        task.cancel.cancel(cause);
        tracing::info!(conversation_id = %conversation_id, cause = %cause, "Task cancellation requested");
        Ok(true)
    }

    /// Publish a status before the run has fully unwound.
    pub async fn update_task_status(&self, conversation_id: &str, status: TaskStatus) {
        let mut inner = self.inner.write().await;
        if let Some(task) = inner.active.get_mut(conversation_id) {
            task.status = status;
        }
    }

    /// Remove the active entry and record it in the completed history.
    pub async fn finish_task(&self, conversation_id: &str, status: TaskStatus) {
        let mut inner = self.inner.write().await;
        let Some(task) = inner.active.remove(conversation_id) else {
            return;
        };
        task.cancel.release();

        if self.history_limit > 0 {
            if inner.completed.len() >= self.history_limit {
                inner.completed.pop_front();
            }
            inner.completed.push_back(CompletedTask {
                conversation_id: task.conversation_id,
                message: task.message,
                started_at: task.started_at,
                completed_at: Utc::now(),
                status,
            });
        }
        tracing::info!(conversation_id = %conversation_id, status = %status, "Task finished");
    }

    /// Drop an active entry without recording it, for runs that never began.
    pub async fn discard_task(&self, conversation_id: &str) {
        if let Some(task) = self.inner.write().await.active.remove(conversation_id) {
            task.cancel.release();
        }
    }

    /// Run `f` only if the conversation has no active task. No task can start
    /// for any conversation until `f` completes.
    pub async fn while_idle<F, Fut, T>(&self, conversation_id: &str, f: F) -> Result<T, TaskError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let inner = self.inner.write().await;
        if inner.active.contains_key(conversation_id) {
            return Err(TaskError::AlreadyRunning(conversation_id.to_string()));
        }
        let out = f().await;
        drop(inner);
        Ok(out)
    }

    pub async fn get_task(&self, conversation_id: &str) -> Option<Task> {
        self.inner.read().await.active.get(conversation_id).cloned()
    }

    /// Active tasks, oldest first.
    pub async fn get_active_tasks(&self) -> Vec<Task> {
        let mut tasks: Vec<Task> = self.inner.read().await.active.values().cloned().collect();
        tasks.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        tasks
    }

    /// Completed tasks, most recent first.
    pub async fn get_completed_tasks(&self) -> Vec<CompletedTask> {
        self.inner.read().await.completed.iter().rev().cloned().collect()
    }
}
