//! In-process [`ToolBridge`] backed by a [`ToolRegistry`].

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Map, Value};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{
    BridgeError, ExecutionStatus, ToolBridge, ToolContext, ToolExecution, ToolOutput, ToolRegistry,
    ToolStats,
};
use crate::cancel::CancelHandle;

/// Executions older than this many calls are forgotten.
const MAX_RECORDED_EXECUTIONS: usize = 1000;

#[derive(Default)]
struct Ledger {
    executions: VecDeque<ToolExecution>,
    stats: HashMap<String, ToolStats>,
}

impl Ledger {
    fn push(&mut self, execution: ToolExecution) {
        if self.executions.len() >= MAX_RECORDED_EXECUTIONS {
            self.executions.pop_front();
        }
        self.executions.push_back(execution);
    }

    fn finish(&mut self, id: &str, outcome: Result<&str, &str>) {
        let Some(execution) = self.executions.iter_mut().rev().find(|e| e.id == id) else {
            return;
        };
        let now = Utc::now();
        execution.completed_at = Some(now);
        execution.duration_ms = Some((now - execution.started_at).num_milliseconds());

        let stats = self
            .stats
            .entry(execution.tool_name.clone())
            .or_insert_with(|| ToolStats {
                tool_name: execution.tool_name.clone(),
                ..ToolStats::default()
            });
        stats.total_calls += 1;
        stats.last_call_at = Some(now);

        match outcome {
            Ok(text) => {
                execution.status = ExecutionStatus::Completed;
                execution.result = Some(text.to_string());
                stats.success_calls += 1;
            }
            Err(error) => {
                execution.status = ExecutionStatus::Failed;
                execution.error = Some(error.to_string());
                stats.failed_calls += 1;
            }
        }
    }
}

/// Runs built-in tools in this process and keeps an execution ledger for
/// the monitoring side channels.
pub struct LocalToolBridge {
    registry: ToolRegistry,
    ctx: ToolContext,
    ledger: Arc<RwLock<Ledger>>,
}

impl LocalToolBridge {
    pub fn new(registry: ToolRegistry, ctx: ToolContext) -> Self {
        Self {
            registry,
            ctx,
            ledger: Arc::new(RwLock::new(Ledger::default())),
        }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }
}

#[async_trait]
impl ToolBridge for LocalToolBridge {
    async fn call(
        &self,
        cancel: &CancelHandle,
        name: &str,
        arguments: Map<String, Value>,
    ) -> Result<ToolOutput, BridgeError> {
        let tool = self
            .registry
            .get(name)
            .ok_or_else(|| BridgeError::UnknownTool(name.to_string()))?;

        let id = Uuid::new_v4().to_string();
        self.ledger.write().await.push(ToolExecution {
            id: id.clone(),
            tool_name: name.to_string(),
            arguments: arguments.clone(),
            status: ExecutionStatus::Running,
            result: None,
            error: None,
            started_at: Utc::now(),
            completed_at: None,
            duration_ms: None,
        });

        tracing::debug!(tool = %name, execution_id = %id, "Dispatching tool");

        // Dropping the execute future kills any child process it spawned.
        let outcome = tokio::select! {
            res = tool.execute(&arguments, &self.ctx) => res.map_err(BridgeError::Execution),
            _ = cancel.cancelled() => Err(BridgeError::Cancelled),
        };

        let mut ledger = self.ledger.write().await;
        match outcome {
            Ok(text) => {
                ledger.finish(&id, Ok(&text));
                tracing::debug!(tool = %name, execution_id = %id, "Tool completed");
                Ok(ToolOutput {
                    text,
                    execution_id: id,
                })
            }
            Err(e) => {
                ledger.finish(&id, Err(&e.to_string()));
                tracing::warn!(tool = %name, execution_id = %id, error = %e, "Tool failed");
                Err(e)
            }
        }
    }

    async fn stats(&self) -> HashMap<String, ToolStats> {
        self.ledger.read().await.stats.clone()
    }

    async fn get_execution(&self, id: &str) -> Option<ToolExecution> {
        self.ledger
            .read()
            .await
            .executions
            .iter()
            .find(|e| e.id == id)
            .cloned()
    }

    async fn list_executions(&self, limit: usize) -> Vec<ToolExecution> {
        self.ledger
            .read()
            .await
            .executions
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect()
    }
}
