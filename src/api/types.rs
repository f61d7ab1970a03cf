//! API request and response types.

use serde::{Deserialize, Serialize};

use crate::batch::BatchTask;
use crate::store::{Conversation, StoredMessage};

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub model: String,
    /// Whether conversations and queues survive a restart.
    pub persistent: bool,
}

/// Request to cancel the active run of a conversation.
#[derive(Debug, Clone, Deserialize)]
pub struct CancelTaskRequest {
    pub conversation_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CancelTaskResponse {
    pub conversation_id: String,
    /// `false` when nothing was running.
    pub cancelled: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PageQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
}

fn default_limit() -> usize {
    20
}

/// A conversation with its stored messages, oldest first.
#[derive(Debug, Clone, Serialize)]
pub struct ConversationDetail {
    #[serde(flatten)]
    pub conversation: Conversation,
    pub messages: Vec<StoredMessage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateQueueRequest {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub role: String,
    pub tasks: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueueListQuery {
    pub status: Option<String>,
    pub keyword: Option<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TaskMessageRequest {
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct AddTaskResponse {
    pub queue_id: String,
    pub task: BatchTask,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionListQuery {
    #[serde(default = "default_execution_limit")]
    pub limit: usize,
}

fn default_execution_limit() -> usize {
    50
}
