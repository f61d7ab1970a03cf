//! In-memory store (non-persistent).

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{Conversation, ReactSnapshot, Store, StoreError, StoredMessage};
use crate::batch::BatchQueue;
use crate::llm::Role;

#[derive(Clone, Default)]
pub struct InMemoryStore {
    conversations: Arc<RwLock<HashMap<String, Conversation>>>,
    messages: Arc<RwLock<Vec<StoredMessage>>>,
    snapshots: Arc<RwLock<HashMap<String, ReactSnapshot>>>,
    queues: Arc<RwLock<HashMap<String, BatchQueue>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn touch(&self, conversation_id: &str) {
        if let Some(conv) = self.conversations.write().await.get_mut(conversation_id) {
            conv.updated_at = Utc::now();
        }
    }
}

#[async_trait]
impl Store for InMemoryStore {
    fn is_persistent(&self) -> bool {
        false
    }

    async fn create_conversation(&self, title: &str) -> Result<Conversation, StoreError> {
        let now = Utc::now();
        let conversation = Conversation {
            id: Uuid::new_v4().to_string(),
            title: title.to_string(),
            created_at: now,
            updated_at: now,
        };
        self.conversations
            .write()
            .await
            .insert(conversation.id.clone(), conversation.clone());
        Ok(conversation)
    }

    async fn get_conversation(&self, id: &str) -> Result<Option<Conversation>, StoreError> {
        Ok(self.conversations.read().await.get(id).cloned())
    }

    async fn list_conversations(&self, limit: usize, offset: usize) -> Result<Vec<Conversation>, StoreError> {
        let mut conversations: Vec<Conversation> = self.conversations.read().await.values().cloned().collect();
        conversations.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(conversations.into_iter().skip(offset).take(limit).collect())
    }

    async fn delete_conversation(&self, id: &str) -> Result<(), StoreError> {
        self.conversations.write().await.remove(id);
        self.messages.write().await.retain(|m| m.conversation_id != id);
        self.snapshots.write().await.remove(id);
        Ok(())
    }

    async fn add_message(
        &self,
        conversation_id: &str,
        role: Role,
        content: &str,
        mcp_execution_ids: &[String],
    ) -> Result<StoredMessage, StoreError> {
        if !self.conversations.read().await.contains_key(conversation_id) {
            return Err(StoreError::NotFound {
                kind: "conversation",
                id: conversation_id.to_string(),
            });
        }
        let message = StoredMessage {
            id: Uuid::new_v4().to_string(),
            conversation_id: conversation_id.to_string(),
            role,
            content: content.to_string(),
            mcp_execution_ids: mcp_execution_ids.to_vec(),
            created_at: Utc::now(),
        };
        self.messages.write().await.push(message.clone());
        self.touch(conversation_id).await;
        Ok(message)
    }

    async fn update_message(&self, message_id: &str, content: &str, mcp_execution_ids: &[String]) -> Result<(), StoreError> {
        let mut messages = self.messages.write().await;
        let message = messages
            .iter_mut()
            .find(|m| m.id == message_id)
            .ok_or_else(|| StoreError::NotFound {
                kind: "message",
                id: message_id.to_string(),
            })?;
        message.content = content.to_string();
        message.mcp_execution_ids = mcp_execution_ids.to_vec();
        Ok(())
    }

    async fn list_messages(&self, conversation_id: &str) -> Result<Vec<StoredMessage>, StoreError> {
        Ok(self
            .messages
            .read()
            .await
            .iter()
            .filter(|m| m.conversation_id == conversation_id)
            .cloned()
            .collect())
    }

    async fn save_react_snapshot(&self, conversation_id: &str, snapshot: &ReactSnapshot) -> Result<(), StoreError> {
        self.snapshots
            .write()
            .await
            .insert(conversation_id.to_string(), snapshot.clone());
        Ok(())
    }

    async fn get_react_snapshot(&self, conversation_id: &str) -> Result<Option<ReactSnapshot>, StoreError> {
        Ok(self.snapshots.read().await.get(conversation_id).cloned())
    }

    async fn save_batch_queue(&self, queue: &BatchQueue) -> Result<(), StoreError> {
        self.queues.write().await.insert(queue.id.clone(), queue.clone());
        Ok(())
    }

    async fn load_batch_queues(&self) -> Result<Vec<BatchQueue>, StoreError> {
        Ok(self.queues.read().await.values().cloned().collect())
    }

    async fn delete_batch_queue(&self, id: &str) -> Result<(), StoreError> {
        self.queues.write().await.remove(id);
        Ok(())
    }
}
