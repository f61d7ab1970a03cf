//! Test doubles shared by unit tests across the crate.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex as StdMutex;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::{Mutex, Semaphore};

use crate::agent::{ProgressEvent, ProgressKind, ProgressSink};
use crate::cancel::{CancelCause, CancelHandle};
use crate::llm::{
    ChatMessage, ChatResponse, FunctionCall, LlmClient, LlmError, Role, ToolArguments, ToolCall,
    ToolDefinition,
};
use crate::tools::{BridgeError, ToolBridge, ToolExecution, ToolOutput, ToolStats};

enum Mode {
    Script(Mutex<VecDeque<Result<ChatResponse, LlmError>>>),
    /// Every call waits for a permit, then answers with the user message.
    Gated(Semaphore),
    Hang,
}

/// `LlmClient` that plays back canned responses and records every request.
pub struct ScriptedLlm {
    mode: Mode,
    requests: Mutex<Vec<Vec<ChatMessage>>>,
    offered: Mutex<Vec<Vec<String>>>,
}

impl ScriptedLlm {
    pub fn new(script: Vec<Result<ChatResponse, LlmError>>) -> Self {
        Self::with_mode(Mode::Script(Mutex::new(script.into())))
    }

    /// Each call blocks until [`ScriptedLlm::release`] hands out a permit,
    /// then stops with `done: <user message>`.
    pub fn gated() -> Self {
        Self::with_mode(Mode::Gated(Semaphore::new(0)))
    }

    /// Never answers.
    pub fn hanging() -> Self {
        Self::with_mode(Mode::Hang)
    }

    fn with_mode(mode: Mode) -> Self {
        Self {
            mode,
            requests: Mutex::new(Vec::new()),
            offered: Mutex::new(Vec::new()),
        }
    }

    pub fn release(&self, calls: usize) {
        if let Mode::Gated(gate) = &self.mode {
            gate.add_permits(calls);
        }
    }

    pub fn stop(content: &str) -> ChatResponse {
        ChatResponse {
            content: Some(content.to_string()),
            tool_calls: Vec::new(),
            finish_reason: Some("stop".to_string()),
        }
    }

    pub fn tool_call(id: &str, name: &str, arguments: &str) -> ChatResponse {
        ChatResponse {
            content: None,
            tool_calls: vec![ToolCall {
                id: id.to_string(),
                call_type: "function".to_string(),
                function: FunctionCall {
                    name: name.to_string(),
                    arguments: ToolArguments::from_json_str(arguments),
                },
            }],
            finish_reason: Some("tool_calls".to_string()),
        }
    }

    pub async fn requests(&self) -> Vec<Vec<ChatMessage>> {
        self.requests.lock().await.clone()
    }

    pub async fn offered_tools(&self) -> Vec<Vec<String>> {
        self.offered.lock().await.clone()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn chat_completion(
        &self,
        _model: &str,
        messages: &[ChatMessage],
        tools: Option<&[ToolDefinition]>,
    ) -> Result<ChatResponse, LlmError> {
        self.requests.lock().await.push(messages.to_vec());
        self.offered.lock().await.push(
            tools
                .unwrap_or_default()
                .iter()
                .map(|t| t.name().to_string())
                .collect(),
        );

        match &self.mode {
            Mode::Script(script) => script.lock().await.pop_front().unwrap_or(Err(LlmError::EmptyResponse)),
            Mode::Gated(gate) => {
                let permit = gate.acquire().await.map_err(|_| LlmError::EmptyResponse)?;
                permit.forget();
                let user = messages
                    .iter()
                    .rev()
                    .find(|m| m.role == Role::User)
                    .map(|m| m.text_content().to_string())
                    .unwrap_or_default();
                Ok(Self::stop(&format!("done: {}", user)))
            }
            Mode::Hang => {
                futures::future::pending::<()>().await;
                Err(LlmError::EmptyResponse)
            }
        }
    }
}

/// `ToolBridge` that records calls and succeeds unless the tool is listed as
/// failing.
#[derive(Default)]
pub struct RecordingBridge {
    failing: Vec<String>,
    /// Calling this tool cancels the run's handle after recording the call.
    cancels_on: Option<String>,
    calls: Mutex<Vec<(String, Map<String, Value>)>>,
}

impl RecordingBridge {
    pub fn failing(tool: &str) -> Self {
        Self {
            failing: vec![tool.to_string()],
            ..Self::default()
        }
    }

    pub fn cancelling_on(tool: &str) -> Self {
        Self {
            cancels_on: Some(tool.to_string()),
            ..Self::default()
        }
    }

    pub async fn calls(&self) -> Vec<(String, Map<String, Value>)> {
        self.calls.lock().await.clone()
    }
}

#[async_trait]
impl ToolBridge for RecordingBridge {
    async fn call(
        &self,
        cancel: &CancelHandle,
        name: &str,
        arguments: Map<String, Value>,
    ) -> Result<ToolOutput, BridgeError> {
        let mut calls = self.calls.lock().await;
        calls.push((name.to_string(), arguments));
        if self.cancels_on.as_deref() == Some(name) {
            cancel.cancel(CancelCause::Cancelled);
        }
        if self.failing.iter().any(|f| f == name) {
            return Err(BridgeError::Execution(anyhow::anyhow!("{} crashed", name)));
        }
        Ok(ToolOutput {
            text: format!("{} ok", name),
            execution_id: format!("exec-{}", calls.len()),
        })
    }

    async fn stats(&self) -> HashMap<String, ToolStats> {
        let mut stats: HashMap<String, ToolStats> = HashMap::new();
        for (name, _) in self.calls.lock().await.iter() {
            let entry = stats.entry(name.clone()).or_insert_with(|| ToolStats {
                tool_name: name.clone(),
                ..ToolStats::default()
            });
            entry.total_calls += 1;
        }
        stats
    }

    async fn get_execution(&self, _id: &str) -> Option<ToolExecution> {
        None
    }

    async fn list_executions(&self, _limit: usize) -> Vec<ToolExecution> {
        Vec::new()
    }
}

/// Keeps every emitted event.
#[derive(Default)]
pub struct CollectingSink {
    events: StdMutex<Vec<ProgressEvent>>,
}

impl CollectingSink {
    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn kinds(&self) -> Vec<ProgressKind> {
        self.events().into_iter().map(|e| e.kind).collect()
    }
}

impl ProgressSink for CollectingSink {
    fn emit(&self, event: ProgressEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}
