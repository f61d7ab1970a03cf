//! Persistence collaborator: conversations, messages, ReAct snapshots and
//! batch queue state.

mod memory;
mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::agent::AgentLoopResult;
use crate::batch::BatchQueue;
use crate::llm::{ChatMessage, Role};

pub use memory::InMemoryStore;
pub use sqlite::SqliteStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("time parse error: {0}")]
    Chrono(#[from] chrono::ParseError),

    #[error("storage task join error: {0}")]
    Task(String),

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("invalid stored data: {0}")]
    InvalidData(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Conversation {
    pub id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredMessage {
    pub id: String,
    pub conversation_id: String,
    pub role: Role,
    pub content: String,
    pub mcp_execution_ids: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl StoredMessage {
    pub fn to_chat_message(&self) -> ChatMessage {
        ChatMessage {
            role: self.role,
            content: Some(self.content.clone()),
            tool_calls: None,
            tool_call_id: None,
        }
    }
}

/// Last ReAct input/output of a conversation.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReactSnapshot {
    pub input: Option<String>,
    pub output: Option<String>,
}

#[async_trait]
pub trait Store: Send + Sync {
    /// Whether data survives a restart.
    fn is_persistent(&self) -> bool;

    async fn create_conversation(&self, title: &str) -> Result<Conversation, StoreError>;
    async fn get_conversation(&self, id: &str) -> Result<Option<Conversation>, StoreError>;
    /// Most recently updated first.
    async fn list_conversations(&self, limit: usize, offset: usize) -> Result<Vec<Conversation>, StoreError>;
    async fn delete_conversation(&self, id: &str) -> Result<(), StoreError>;

    async fn add_message(
        &self,
        conversation_id: &str,
        role: Role,
        content: &str,
        mcp_execution_ids: &[String],
    ) -> Result<StoredMessage, StoreError>;
    async fn update_message(&self, message_id: &str, content: &str, mcp_execution_ids: &[String]) -> Result<(), StoreError>;
    /// Oldest first.
    async fn list_messages(&self, conversation_id: &str) -> Result<Vec<StoredMessage>, StoreError>;

    async fn save_react_snapshot(&self, conversation_id: &str, snapshot: &ReactSnapshot) -> Result<(), StoreError>;
    async fn get_react_snapshot(&self, conversation_id: &str) -> Result<Option<ReactSnapshot>, StoreError>;

    async fn save_batch_queue(&self, queue: &BatchQueue) -> Result<(), StoreError>;
    async fn load_batch_queues(&self) -> Result<Vec<BatchQueue>, StoreError>;
    async fn delete_batch_queue(&self, id: &str) -> Result<(), StoreError>;
}

/// Write the final assistant reply of a run. Updates the placeholder message
/// when there is one, otherwise (or if the update fails) adds a new message.
/// Failures are logged only.
pub async fn record_reply(
    store: &dyn Store,
    conversation_id: &str,
    placeholder_id: Option<&str>,
    content: &str,
    mcp_execution_ids: &[String],
) {
    if let Some(id) = placeholder_id {
        match store.update_message(id, content, mcp_execution_ids).await {
            Ok(()) => return,
            Err(e) => {
                tracing::warn!(conversation_id = %conversation_id, error = %e, "Failed to update assistant message");
            }
        }
    }
    if let Err(e) = store
        .add_message(conversation_id, Role::Assistant, content, mcp_execution_ids)
        .await
    {
        tracing::error!(conversation_id = %conversation_id, error = %e, "Failed to save assistant message");
    }
}

/// Persist the ReAct input/output of a run, if it produced any.
pub async fn record_react_snapshot(store: &dyn Store, conversation_id: &str, result: &AgentLoopResult) {
    if result.last_react_input.is_none() && result.last_react_output.is_none() {
        return;
    }
    let snapshot = ReactSnapshot {
        input: result.last_react_input.clone(),
        output: result.last_react_output.clone(),
    };
    if let Err(e) = store.save_react_snapshot(conversation_id, &snapshot).await {
        tracing::warn!(conversation_id = %conversation_id, error = %e, "Failed to save ReAct snapshot");
    }
}
