//! Tool Dispatch Bridge and the built-in security tool catalog.
//!
//! The loop engine only sees [`ToolBridge`]: call a tool by name with
//! normalized arguments, get back text plus an execution id. The bridge also
//! exposes read-only monitoring channels (per-tool stats, execution lookup).
//!
//! [`LocalToolBridge`] is the bundled implementation. It dispatches to the
//! [`Tool`]s held by a [`ToolRegistry`] and records every execution.

mod bridge;
mod knowledge;
mod scanners;
mod terminal;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::cancel::CancelHandle;
use crate::llm::ToolDefinition;

pub use bridge::LocalToolBridge;

pub const TOOL_SEARCH_KNOWLEDGE_BASE: &str = "search_knowledge_base";
pub const TOOL_LIST_SKILLS: &str = "list_skills";
pub const TOOL_READ_SKILL: &str = "read_skill";

/// Result of a successful bridge call.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutput {
    pub text: String,
    /// Never empty; can be passed to [`ToolBridge::get_execution`].
    pub execution_id: String,
}

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("unknown tool: {0}")]
    UnknownTool(String),

    #[error("tool execution was cancelled")]
    Cancelled,

    #[error("{0:#}")]
    Execution(anyhow::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Running,
    Completed,
    Failed,
}

/// Record of one tool invocation.
#[derive(Debug, Clone, Serialize)]
pub struct ToolExecution {
    pub id: String,
    pub tool_name: String,
    pub arguments: Map<String, Value>,
    pub status: ExecutionStatus,
    pub result: Option<String>,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
}

/// Aggregate counters for one tool.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ToolStats {
    pub tool_name: String,
    pub total_calls: u64,
    pub success_calls: u64,
    pub failed_calls: u64,
    pub last_call_at: Option<DateTime<Utc>>,
}

/// Synchronous call/result interface to the tool-execution service.
///
/// Implementations must tolerate concurrent calls from independent loop
/// runs, and should stop work promptly once `cancel` fires.
#[async_trait]
pub trait ToolBridge: Send + Sync {
    async fn call(
        &self,
        cancel: &CancelHandle,
        name: &str,
        arguments: Map<String, Value>,
    ) -> Result<ToolOutput, BridgeError>;

    async fn stats(&self) -> HashMap<String, ToolStats>;

    async fn get_execution(&self, id: &str) -> Option<ToolExecution>;

    /// Most recent executions first.
    async fn list_executions(&self, limit: usize) -> Vec<ToolExecution>;
}

/// Everything a built-in tool needs from its environment.
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub workdir: PathBuf,
    pub timeout: Duration,
    pub skills_dir: Option<PathBuf>,
    pub knowledge_dir: Option<PathBuf>,
}

impl Default for ToolContext {
    fn default() -> Self {
        Self {
            workdir: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            timeout: Duration::from_secs(600),
            skills_dir: None,
            knowledge_dir: None,
        }
    }
}

/// A built-in tool.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON schema of the arguments object.
    fn parameters_schema(&self) -> Value;

    async fn execute(&self, args: &Map<String, Value>, ctx: &ToolContext) -> anyhow::Result<String>;
}

/// Ordered set of tools, keyed by name.
#[derive(Clone)]
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolRegistry {
    /// Registry with the full built-in catalog: network scan, injection
    /// probe, web server scan, directory enumeration, command execution,
    /// knowledge search and skills.
    pub fn new() -> Self {
        let mut registry = Self::empty();
        registry.register(Arc::new(scanners::Nmap));
        registry.register(Arc::new(scanners::Sqlmap));
        registry.register(Arc::new(scanners::Nikto));
        registry.register(Arc::new(scanners::Dirb));
        registry.register(Arc::new(terminal::Exec));
        registry.register(Arc::new(knowledge::SearchKnowledgeBase));
        registry.register(Arc::new(knowledge::ListSkills));
        registry.register(Arc::new(knowledge::ReadSkill));
        registry
    }

    pub fn empty() -> Self {
        Self { tools: Vec::new() }
    }

    /// Add a tool, replacing any tool with the same name.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.retain(|t| t.name() != tool.name());
        self.tools.push(tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.iter().find(|t| t.name() == name).cloned()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Tool schema in catalog order.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools
            .iter()
            .map(|t| ToolDefinition::function(t.name(), t.description(), t.parameters_schema()))
            .collect()
    }
}

/// Restrict a catalog to `allow_list`. An empty allow-list means everything.
pub fn filter_catalog(catalog: &[ToolDefinition], allow_list: &[String]) -> Vec<ToolDefinition> {
    if allow_list.is_empty() {
        return catalog.to_vec();
    }
    catalog
        .iter()
        .filter(|def| allow_list.iter().any(|allowed| allowed == def.name()))
        .cloned()
        .collect()
}

/// Read a required string argument.
fn required_str<'a>(args: &'a Map<String, Value>, key: &str) -> anyhow::Result<&'a str> {
    args.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| anyhow::anyhow!("Missing '{}' argument", key))
}

fn optional_str<'a>(args: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    args.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_catalog_covers_security_tools() {
        let names: Vec<String> = ToolRegistry::new()
            .definitions()
            .into_iter()
            .map(|d| d.function.name)
            .collect();
        assert_eq!(
            names,
            vec![
                "nmap",
                "sqlmap",
                "nikto",
                "dirb",
                "exec",
                TOOL_SEARCH_KNOWLEDGE_BASE,
                TOOL_LIST_SKILLS,
                TOOL_READ_SKILL
            ]
        );
    }

    #[test]
    fn empty_allow_list_keeps_full_catalog() {
        let catalog = ToolRegistry::new().definitions();
        assert_eq!(filter_catalog(&catalog, &[]).len(), catalog.len());
    }

    #[test]
    fn allow_list_filters_catalog() {
        let catalog = ToolRegistry::new().definitions();
        let filtered = filter_catalog(&catalog, &["nmap".to_string(), "missing".to_string()]);
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].name(), "nmap");
    }

    #[test]
    fn required_str_rejects_blank_values() {
        let args = serde_json::json!({"target": "  ", "url": "http://x"});
        let args = args.as_object().unwrap();
        assert!(required_str(args, "target").is_err());
        assert!(required_str(args, "missing").is_err());
        assert_eq!(required_str(args, "url").unwrap(), "http://x");
    }
}
