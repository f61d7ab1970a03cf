//! The per-queue worker and the execution of one batch task.

use std::sync::Arc;
use std::time::Duration;

use crate::agent::{Agent, LogSink};
use crate::cancel::{CancelCause, CancelHandle};
use crate::config::RoleSet;
use crate::llm::Role;
use crate::store::{self, Store};
use crate::text::title_from_message;

use super::manager::BatchQueueManager;
use super::{BatchTaskStatus, ClaimedTask, TaskOutcome};

const CONVERSATION_TITLE_CHARS: usize = 50;
const PLACEHOLDER_REPLY: &str = "Processing...";
const CANCELLED_REPLY: &str = "Task was cancelled by the user; further operations were stopped.";

/// Runs batch tasks: one fresh conversation and one loop run per task.
pub struct BatchRunner {
    agent: Arc<Agent>,
    store: Arc<dyn Store>,
    roles: Arc<RoleSet>,
    task_timeout: Duration,
}

impl BatchRunner {
    pub fn new(agent: Arc<Agent>, store: Arc<dyn Store>, roles: Arc<RoleSet>, task_timeout: Duration) -> Self {
        Self {
            agent,
            store,
            roles,
            task_timeout,
        }
    }

    async fn run_task(&self, manager: &BatchQueueManager, task: &ClaimedTask, cancel: &CancelHandle) -> TaskOutcome {
        let title = title_from_message(&task.message, CONVERSATION_TITLE_CHARS);
        let conversation = match self.store.create_conversation(&title).await {
            Ok(c) => c,
            Err(e) => {
                tracing::error!(queue_id = %task.queue_id, task_id = %task.task_id, error = %e, "Failed to create conversation");
                return TaskOutcome {
                    status: BatchTaskStatus::Failed,
                    result: None,
                    error: Some(format!("failed to create conversation: {}", e)),
                    mcp_execution_ids: Vec::new(),
                };
            }
        };
        manager
            .attach_conversation(&task.queue_id, &task.task_id, &conversation.id)
            .await;

        let role = self.roles.resolve(&task.role);
        let message = role.apply(&task.message);

        // The stored user message is the original, without the role prompt.
        if let Err(e) = self.store.add_message(&conversation.id, Role::User, &task.message, &[]).await {
            tracing::warn!(conversation_id = %conversation.id, error = %e, "Failed to save user message");
        }
        let placeholder = match self
            .store
            .add_message(&conversation.id, Role::Assistant, PLACEHOLDER_REPLY, &[])
            .await
        {
            Ok(m) => Some(m.id),
            Err(e) => {
                tracing::warn!(conversation_id = %conversation.id, error = %e, "Failed to create assistant message");
                None
            }
        };

        tracing::info!(
            queue_id = %task.queue_id,
            task_id = %task.task_id,
            conversation_id = %conversation.id,
            role = %task.role,
            "Running batch task"
        );

        let sink = LogSink {
            scope: format!("batch:{}:{}", task.queue_id, task.task_id),
        };
        let timer = cancel.arm_timeout(self.task_timeout);
        let run = self
            .agent
            .run_loop(cancel, &message, &[], &role.policy, &sink)
            .await;
        cancel.release();
        timer.abort();

        match run {
            Ok(result) => {
                store::record_reply(
                    self.store.as_ref(),
                    &conversation.id,
                    placeholder.as_deref(),
                    &result.response,
                    &result.mcp_execution_ids,
                )
                .await;
                store::record_react_snapshot(self.store.as_ref(), &conversation.id, &result).await;
                TaskOutcome {
                    status: BatchTaskStatus::Completed,
                    result: Some(result.response),
                    error: None,
                    mcp_execution_ids: result.mcp_execution_ids,
                }
            }
            Err(failure) => {
                let partial = &failure.partial;
                let outcome = match failure.cancel_cause() {
                    Some(CancelCause::Cancelled) => {
                        tracing::info!(queue_id = %task.queue_id, task_id = %task.task_id, "Batch task cancelled");
                        let reply = partial
                            .last_react_output
                            .clone()
                            .unwrap_or_else(|| CANCELLED_REPLY.to_string());
                        TaskOutcome {
                            status: BatchTaskStatus::Cancelled,
                            result: Some(reply),
                            error: None,
                            mcp_execution_ids: partial.mcp_execution_ids.clone(),
                        }
                    }
                    Some(CancelCause::Timeout) => {
                        tracing::warn!(queue_id = %task.queue_id, task_id = %task.task_id, "Batch task timed out");
                        TaskOutcome {
                            status: BatchTaskStatus::Failed,
                            result: partial.last_react_output.clone(),
                            error: Some(format!("task timed out after {} seconds", self.task_timeout.as_secs())),
                            mcp_execution_ids: partial.mcp_execution_ids.clone(),
                        }
                    }
                    None => {
                        tracing::error!(queue_id = %task.queue_id, task_id = %task.task_id, error = %failure, "Batch task failed");
                        TaskOutcome {
                            status: BatchTaskStatus::Failed,
                            result: partial.last_react_output.clone(),
                            error: Some(failure.to_string()),
                            mcp_execution_ids: partial.mcp_execution_ids.clone(),
                        }
                    }
                };

                let reply = match (&outcome.status, &outcome.error) {
                    (BatchTaskStatus::Failed, Some(error)) => format!("Execution failed: {}", error),
                    _ => outcome.result.clone().unwrap_or_default(),
                };
                store::record_reply(
                    self.store.as_ref(),
                    &conversation.id,
                    placeholder.as_deref(),
                    &reply,
                    &outcome.mcp_execution_ids,
                )
                .await;
                store::record_react_snapshot(self.store.as_ref(), &conversation.id, partial).await;
                outcome
            }
        }
    }
}

/// Worker loop for one queue. Exits when the queue stops running or runs
/// out of pending tasks.
pub(super) async fn run_queue(manager: Arc<BatchQueueManager>, queue_id: String) {
    tracing::info!(queue_id = %queue_id, "Batch worker started");
    loop {
        let cancel = CancelHandle::new();
        let Some(task) = manager.claim_next(&queue_id, &cancel).await else {
            break;
        };
        let outcome = manager.runner().run_task(&manager, &task, &cancel).await;
        manager.complete_task(&queue_id, &task.task_id, outcome).await;
    }
    tracing::info!(queue_id = %queue_id, "Batch worker exited");
}
