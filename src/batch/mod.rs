//! Batch Queue Engine.
//!
//! A queue is an ordered list of messages executed unattended, one at a time,
//! by a single worker. Every task gets a fresh conversation and its own
//! cancel handle; queue-level cancel/pause never touches the per-conversation
//! [`TaskManager`](crate::tasks::TaskManager).

mod manager;
mod worker;

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cancel::CancelHandle;

pub use manager::BatchQueueManager;
pub use worker::BatchRunner;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    Pending,
    Running,
    Paused,
    Completed,
    Cancelled,
}

impl QueueStatus {
    pub fn is_finished(&self) -> bool {
        matches!(self, QueueStatus::Completed | QueueStatus::Cancelled)
    }
}

impl fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            QueueStatus::Pending => "pending",
            QueueStatus::Running => "running",
            QueueStatus::Paused => "paused",
            QueueStatus::Completed => "completed",
            QueueStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for QueueStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(QueueStatus::Pending),
            "running" => Ok(QueueStatus::Running),
            "paused" => Ok(QueueStatus::Paused),
            "completed" => Ok(QueueStatus::Completed),
            "cancelled" => Ok(QueueStatus::Cancelled),
            other => Err(format!("unknown queue status: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchTaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl fmt::Display for BatchTaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BatchTaskStatus::Pending => "pending",
            BatchTaskStatus::Running => "running",
            BatchTaskStatus::Completed => "completed",
            BatchTaskStatus::Failed => "failed",
            BatchTaskStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchTask {
    pub id: String,
    pub message: String,
    pub status: BatchTaskStatus,
    #[serde(default)]
    pub result: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub mcp_execution_ids: Vec<String>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    /// Only set while the task is running.
    #[serde(skip)]
    pub cancel: Option<CancelHandle>,
}

impl BatchTask {
    pub(crate) fn pending(message: String) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            message,
            status: BatchTaskStatus::Pending,
            result: None,
            error: None,
            conversation_id: None,
            mcp_execution_ids: Vec::new(),
            started_at: None,
            completed_at: None,
            cancel: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchQueue {
    pub id: String,
    pub title: String,
    /// Named role policy; empty means the default role.
    #[serde(default)]
    pub role: String,
    pub status: QueueStatus,
    pub tasks: Vec<BatchTask>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl BatchQueue {
    pub fn task(&self, task_id: &str) -> Option<&BatchTask> {
        self.tasks.iter().find(|t| t.id == task_id)
    }

    pub(crate) fn task_mut(&mut self, task_id: &str) -> Option<&mut BatchTask> {
        self.tasks.iter_mut().find(|t| t.id == task_id)
    }

    pub(crate) fn running_task_mut(&mut self) -> Option<&mut BatchTask> {
        self.tasks.iter_mut().find(|t| t.status == BatchTaskStatus::Running)
    }

    pub fn count(&self, status: BatchTaskStatus) -> usize {
        self.tasks.iter().filter(|t| t.status == status).count()
    }
}

/// Filter and page for [`BatchQueueManager::list_queues`].
#[derive(Debug, Clone)]
pub struct QueueFilter {
    pub status: Option<QueueStatus>,
    /// Case-insensitive match on queue id or title.
    pub keyword: Option<String>,
    pub limit: usize,
    pub offset: usize,
}

impl Default for QueueFilter {
    fn default() -> Self {
        Self {
            status: None,
            keyword: None,
            limit: 10,
            offset: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct QueuePage {
    pub queues: Vec<BatchQueue>,
    pub total: usize,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BatchError {
    #[error("batch queue not found: {0}")]
    QueueNotFound(String),

    #[error("task {task_id} not found in queue {queue_id}")]
    TaskNotFound { queue_id: String, task_id: String },

    #[error("a batch queue needs at least one non-empty message")]
    EmptyQueue,

    #[error("task message must not be empty")]
    EmptyMessage,

    #[error("batch queue {0} is already running")]
    AlreadyRunning(String),

    #[error("cannot {action} queue {queue_id} while it is {status}")]
    InvalidQueueState {
        queue_id: String,
        status: QueueStatus,
        action: &'static str,
    },

    #[error("task {task_id} is {status}; only pending tasks can be changed")]
    TaskNotPending {
        task_id: String,
        status: BatchTaskStatus,
    },
}

/// How a worker run of one task ended.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct TaskOutcome {
    pub status: BatchTaskStatus,
    pub result: Option<String>,
    pub error: Option<String>,
    pub mcp_execution_ids: Vec<String>,
}

/// A task handed to the worker by [`BatchQueueManager`].
#[derive(Debug, Clone)]
pub(crate) struct ClaimedTask {
    pub queue_id: String,
    pub task_id: String,
    pub message: String,
    pub role: String,
}
