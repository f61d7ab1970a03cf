//! Conversational runs: one user message, one loop run, under the task
//! manager's per-conversation exclusivity.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::agent::{restore_react_history, Agent, AgentLoopResult, LoopFailure, ProgressSink};
use crate::cancel::{CancelCause, CancelHandle};
use crate::config::RoleSet;
use crate::llm::{ChatMessage, Role};
use crate::store::{self, Store, StoreError};
use crate::tasks::{TaskError, TaskManager, TaskStatus};
use crate::text::title_from_message;

const CONVERSATION_TITLE_CHARS: usize = 50;
const PLACEHOLDER_REPLY: &str = "Processing...";
const CANCELLED_REPLY: &str = "Task was cancelled by the user; further operations were stopped.";

#[derive(Debug, Clone, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatOutcome {
    pub conversation_id: String,
    pub status: TaskStatus,
    pub response: String,
    pub mcp_execution_ids: Vec<String>,
    pub error: Option<String>,
}

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("message must not be empty")]
    EmptyMessage,

    #[error("conversation not found: {0}")]
    ConversationNotFound(String),

    #[error(transparent)]
    Task(#[from] TaskError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("run aborted: {0}")]
    Aborted(String),
}

/// Entry point for conversational runs.
#[derive(Clone)]
pub struct ChatService {
    agent: Arc<Agent>,
    tasks: Arc<TaskManager>,
    store: Arc<dyn Store>,
    roles: Arc<RoleSet>,
    timeout: Duration,
}

impl ChatService {
    pub fn new(
        agent: Arc<Agent>,
        tasks: Arc<TaskManager>,
        store: Arc<dyn Store>,
        roles: Arc<RoleSet>,
        timeout: Duration,
    ) -> Self {
        Self {
            agent,
            tasks,
            store,
            roles,
            timeout,
        }
    }

    pub fn tasks(&self) -> &Arc<TaskManager> {
        &self.tasks
    }

    /// Run one message to completion.
    ///
    /// The loop runs on its own task: dropping the returned future does not
    /// stop it. Only [`ChatService::cancel`] or the configured timeout do.
    pub async fn run(&self, request: ChatRequest, sink: Arc<dyn ProgressSink>) -> Result<ChatOutcome, ChatError> {
        let message = request.message.trim().to_string();
        if message.is_empty() {
            return Err(ChatError::EmptyMessage);
        }

        let existing = request.conversation_id.filter(|id| !id.is_empty());
        let conversation_id = match &existing {
            Some(id) => id.clone(),
            None => {
                self.store
                    .create_conversation(&title_from_message(&message, CONVERSATION_TITLE_CHARS))
                    .await?
                    .id
            }
        };

        let cancel = CancelHandle::new();
        self.tasks
            .start_task(&conversation_id, &message, cancel.clone())
            .await?;

        // Checked under the reservation so a concurrent delete cannot slip in.
        if existing.is_some() {
            match self.store.get_conversation(&conversation_id).await {
                Ok(Some(_)) => {}
                Ok(None) => {
                    self.tasks.discard_task(&conversation_id).await;
                    return Err(ChatError::ConversationNotFound(conversation_id));
                }
                Err(e) => {
                    self.tasks.discard_task(&conversation_id).await;
                    return Err(e.into());
                }
            }
        }

        let history = self.load_history(&conversation_id).await;
        let role_name = request.role.unwrap_or_default();

        let service = self.clone();
        let run = tokio::spawn(async move {
            let id = conversation_id.clone();
            let outcome = AssertUnwindSafe(service.execute(conversation_id, message, role_name, history, cancel, sink))
                .catch_unwind()
                .await;
            match outcome {
                Ok(outcome) => Ok(outcome),
                Err(panic) => {
                    let reason = panic_message(panic.as_ref());
                    tracing::error!(conversation_id = %id, reason = %reason, "Conversation task panicked");
                    service.tasks.finish_task(&id, TaskStatus::Failed).await;
                    Err(ChatError::Aborted(reason))
                }
            }
        });
        run.await.map_err(|e| ChatError::Aborted(e.to_string()))?
    }

    /// Request cancellation of the conversation's active run.
    pub async fn cancel(&self, conversation_id: &str) -> Result<bool, ChatError> {
        Ok(self.tasks.cancel_task(conversation_id, CancelCause::Cancelled).await?)
    }

    /// History to replay: the stored ReAct snapshot when usable, otherwise
    /// the stored messages.
    pub async fn load_history(&self, conversation_id: &str) -> Vec<ChatMessage> {
        match self.store.get_react_snapshot(conversation_id).await {
            Ok(Some(snapshot)) => {
                if let Some(input) = snapshot.input.as_deref().filter(|i| !i.is_empty()) {
                    match restore_react_history(input, snapshot.output.as_deref()) {
                        Ok(messages) => {
                            tracing::debug!(conversation_id = %conversation_id, messages = messages.len(), "Restored history from ReAct snapshot");
                            return messages;
                        }
                        Err(e) => {
                            tracing::warn!(conversation_id = %conversation_id, error = %e, "Unusable ReAct snapshot, falling back to messages");
                        }
                    }
                }
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(conversation_id = %conversation_id, error = %e, "Failed to read ReAct snapshot");
            }
        }

        match self.store.list_messages(conversation_id).await {
            Ok(messages) => messages.iter().map(|m| m.to_chat_message()).collect(),
            Err(e) => {
                tracing::warn!(conversation_id = %conversation_id, error = %e, "Failed to load message history");
                Vec::new()
            }
        }
    }

    async fn execute(
        &self,
        conversation_id: String,
        message: String,
        role_name: String,
        history: Vec<ChatMessage>,
        cancel: CancelHandle,
        sink: Arc<dyn ProgressSink>,
    ) -> ChatOutcome {
        let role = self.roles.resolve(&role_name);

        if let Err(e) = self.store.add_message(&conversation_id, Role::User, &message, &[]).await {
            tracing::warn!(conversation_id = %conversation_id, error = %e, "Failed to save user message");
        }
        let placeholder = match self
            .store
            .add_message(&conversation_id, Role::Assistant, PLACEHOLDER_REPLY, &[])
            .await
        {
            Ok(m) => Some(m.id),
            Err(e) => {
                tracing::warn!(conversation_id = %conversation_id, error = %e, "Failed to create assistant message");
                None
            }
        };

        tracing::info!(conversation_id = %conversation_id, role = %role_name, history = history.len(), "Running conversation task");

        let timer = cancel.arm_timeout(self.timeout);
        let run = self
            .agent
            .run_loop(&cancel, &role.apply(&message), &history, &role.policy, sink.as_ref())
            .await;
        timer.abort();

        let (status, reply, result, error) = match run {
            Ok(result) => (TaskStatus::Completed, result.response.clone(), result, None),
            Err(failure) => self.describe_failure(&conversation_id, failure),
        };

        self.tasks.update_task_status(&conversation_id, status).await;

        store::record_reply(
            self.store.as_ref(),
            &conversation_id,
            placeholder.as_deref(),
            &reply,
            &result.mcp_execution_ids,
        )
        .await;
        store::record_react_snapshot(self.store.as_ref(), &conversation_id, &result).await;

        self.tasks.finish_task(&conversation_id, status).await;

        ChatOutcome {
            conversation_id,
            status,
            response: reply,
            mcp_execution_ids: result.mcp_execution_ids,
            error,
        }
    }

    fn describe_failure(
        &self,
        conversation_id: &str,
        failure: LoopFailure,
    ) -> (TaskStatus, String, AgentLoopResult, Option<String>) {
        match failure.cancel_cause() {
            Some(CancelCause::Cancelled) => {
                tracing::info!(conversation_id = %conversation_id, "Conversation task cancelled");
                let reply = failure
                    .partial
                    .last_react_output
                    .clone()
                    .unwrap_or_else(|| CANCELLED_REPLY.to_string());
                (TaskStatus::Cancelled, reply, failure.partial, None)
            }
            Some(CancelCause::Timeout) => {
                let error = format!("task timed out after {} seconds", self.timeout.as_secs());
                tracing::warn!(conversation_id = %conversation_id, "Conversation task timed out");
                (TaskStatus::Timeout, format!("Execution failed: {}", error), failure.partial, Some(error))
            }
            None => {
                let error = failure.to_string();
                tracing::error!(conversation_id = %conversation_id, error = %error, "Conversation task failed");
                (TaskStatus::Failed, format!("Execution failed: {}", error), failure.partial, Some(error))
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "run panicked".to_string()
    }
}
