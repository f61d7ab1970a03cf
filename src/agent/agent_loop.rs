//! Core agent loop implementation.

use std::sync::Arc;

use serde::Serialize;
use serde_json::json;
use thiserror::Error;

use crate::cancel::{CancelCause, CancelHandle};
use crate::llm::{ChatMessage, LlmClient, LlmError, ToolCall, ToolDefinition};
use crate::text::truncate_for_log;
use crate::tools::{filter_catalog, ToolBridge};

use super::history::assemble_messages;
use super::progress::{ProgressEvent, ProgressKind, ProgressSink};
use super::prompt::build_system_prompt;

/// Iteration cap used when none is configured.
pub const DEFAULT_MAX_ITERATIONS: usize = 10;

/// Response returned when the iteration cap is hit without a final answer.
pub const MAX_ITERATIONS_RESPONSE: &str = "Maximum number of iterations reached";

const RESULT_PREVIEW_CHARS: usize = 500;

/// Outcome of one loop run. Populated as far as the run got, even when it
/// failed.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AgentLoopResult {
    pub response: String,
    pub mcp_execution_ids: Vec<String>,
    /// JSON message list as last sent to the model.
    pub last_react_input: Option<String>,
    /// Latest assistant text.
    pub last_react_output: Option<String>,
}

#[derive(Debug, Error)]
pub enum LoopError {
    #[error("model call failed: {0}")]
    Llm(#[from] LlmError),

    #[error("run {0}")]
    Cancelled(CancelCause),
}

/// A failed run together with the state accumulated before it failed.
#[derive(Debug, Error)]
#[error("{error}")]
pub struct LoopFailure {
    #[source]
    pub error: LoopError,
    pub partial: AgentLoopResult,
}

impl LoopFailure {
    /// Cause recorded on the cancel handle, if the run was stopped by it.
    pub fn cancel_cause(&self) -> Option<CancelCause> {
        match self.error {
            LoopError::Cancelled(cause) => Some(cause),
            LoopError::Llm(_) => None,
        }
    }
}

/// Tool and skill policy for one run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunPolicy {
    /// Empty means the full catalog.
    pub allowed_tools: Vec<String>,
    pub skill_hints: Vec<String>,
}

impl RunPolicy {
    fn allows(&self, tool: &str) -> bool {
        self.allowed_tools.is_empty() || self.allowed_tools.iter().any(|t| t == tool)
    }
}

/// The autonomous agent.
///
/// One `Agent` is shared by every run; all per-run state lives on the stack
/// of [`Agent::run_loop`].
pub struct Agent {
    llm: Arc<dyn LlmClient>,
    bridge: Arc<dyn ToolBridge>,
    catalog: Vec<ToolDefinition>,
    model: String,
    max_iterations: usize,
}

impl Agent {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        bridge: Arc<dyn ToolBridge>,
        catalog: Vec<ToolDefinition>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            llm,
            bridge,
            catalog,
            model: model.into(),
            max_iterations: DEFAULT_MAX_ITERATIONS,
        }
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations.max(1);
        self
    }

    pub fn bridge(&self) -> &Arc<dyn ToolBridge> {
        &self.bridge
    }

    /// Drive one model/tool conversation to completion.
    ///
    /// Tool calls from one model turn run sequentially in the order given.
    /// Tool failures are fed back to the model as tool messages; model
    /// failures and cancellation end the run with a [`LoopFailure`].
    pub async fn run_loop(
        &self,
        cancel: &CancelHandle,
        user_message: &str,
        history: &[ChatMessage],
        policy: &RunPolicy,
        sink: &dyn ProgressSink,
    ) -> Result<AgentLoopResult, LoopFailure> {
        let system_prompt = build_system_prompt(&policy.skill_hints);
        let mut messages = assemble_messages(&system_prompt, history, user_message);
        let tools = filter_catalog(&self.catalog, &policy.allowed_tools);
        let mut result = AgentLoopResult {
            last_react_input: serde_json::to_string(&messages).ok(),
            ..AgentLoopResult::default()
        };

        tracing::info!(
            history = history.len(),
            messages = messages.len(),
            tools = tools.len(),
            "Starting agent loop"
        );

        for iteration in 0..self.max_iterations {
            if cancel.is_cancelled() {
                return Err(self.cancelled(cancel, result, sink));
            }

            tracing::debug!(iteration = iteration + 1, messages = messages.len(), "Calling model");
            sink.emit(ProgressEvent::new(
                ProgressKind::Progress,
                format!("Calling model (iteration {})", iteration + 1),
                json!({ "iteration": iteration + 1 }),
            ));

            result.last_react_input = serde_json::to_string(&messages).ok();

            let tool_schema = (!tools.is_empty()).then_some(tools.as_slice());
            let response = tokio::select! {
                res = self.llm.chat_completion(&self.model, &messages, tool_schema) => res,
                _ = cancel.cancelled() => return Err(self.cancelled(cancel, result, sink)),
            };

            let response = match response {
                Ok(r) => r,
                Err(e) => {
                    tracing::error!(iteration = iteration + 1, error = %e, "Model call failed");
                    sink.emit(ProgressEvent::new(
                        ProgressKind::Error,
                        format!("Model call failed: {}", e),
                        json!({ "iteration": iteration + 1 }),
                    ));
                    return Err(LoopFailure {
                        error: LoopError::Llm(e),
                        partial: result,
                    });
                }
            };

            if let Some(content) = response.content.as_ref().filter(|c| !c.is_empty()) {
                result.last_react_output = Some(content.clone());
            }

            if !response.tool_calls.is_empty() {
                messages.push(ChatMessage::assistant_with_tools(
                    response.content.clone(),
                    response.tool_calls.clone(),
                ));
                for call in &response.tool_calls {
                    if cancel.is_cancelled() {
                        result.last_react_input = serde_json::to_string(&messages).ok();
                        return Err(self.cancelled(cancel, result, sink));
                    }
                    let reply = self.dispatch(cancel, call, policy, sink, &mut result).await;
                    messages.push(ChatMessage::tool(call.id.clone(), reply));
                }
                result.last_react_input = serde_json::to_string(&messages).ok();
                continue;
            }

            let content = response.content.clone().unwrap_or_default();
            messages.push(ChatMessage::assistant(content.clone()));
            result.last_react_input = serde_json::to_string(&messages).ok();

            if response.is_stop() {
                tracing::info!(
                    iterations = iteration + 1,
                    executions = result.mcp_execution_ids.len(),
                    "Agent loop finished"
                );
                result.response = content;
                return Ok(result);
            }
        }

        tracing::warn!(max_iterations = self.max_iterations, "Agent loop hit the iteration cap");
        result.response = MAX_ITERATIONS_RESPONSE.to_string();
        Ok(result)
    }

    /// Run one tool call through the bridge and return the text for the
    /// tool message. Never fails.
    async fn dispatch(
        &self,
        cancel: &CancelHandle,
        call: &ToolCall,
        policy: &RunPolicy,
        sink: &dyn ProgressSink,
        result: &mut AgentLoopResult,
    ) -> String {
        let name = call.function.name.as_str();
        let arguments = call.function.arguments.to_map();

        sink.emit(ProgressEvent::new(
            ProgressKind::ToolCall,
            format!("Calling tool: {}", name),
            json!({ "tool": name, "arguments": arguments, "tool_call_id": call.id }),
        ));

        if !policy.allows(name) {
            tracing::warn!(tool = %name, "Model requested a tool outside the allow-list");
            let text = format!("Tool execution failed: tool '{}' is not available for this task", name);
            sink.emit(ProgressEvent::new(
                ProgressKind::ToolResult,
                format!("Tool {} refused", name),
                json!({ "tool": name, "arguments": arguments, "success": false, "result": text }),
            ));
            return text;
        }

        match self.bridge.call(cancel, name, arguments.clone()).await {
            Ok(output) => {
                result.mcp_execution_ids.push(output.execution_id.clone());
                sink.emit(ProgressEvent::new(
                    ProgressKind::ToolResult,
                    format!("Tool {} completed", name),
                    json!({
                        "tool": name,
                        "arguments": arguments,
                        "success": true,
                        "execution_id": output.execution_id,
                        "result": truncate_for_log(&output.text, RESULT_PREVIEW_CHARS),
                    }),
                ));
                output.text
            }
            Err(e) => {
                let text = format!("Tool execution failed: {}", e);
                sink.emit(ProgressEvent::new(
                    ProgressKind::ToolResult,
                    format!("Tool {} failed", name),
                    json!({ "tool": name, "arguments": arguments, "success": false, "result": text }),
                ));
                text
            }
        }
    }

    fn cancelled(&self, cancel: &CancelHandle, partial: AgentLoopResult, sink: &dyn ProgressSink) -> LoopFailure {
        let cause = cancel.cause().unwrap_or(CancelCause::Cancelled);
        tracing::info!(cause = %cause, "Agent loop stopped");
        sink.emit(ProgressEvent::new(
            ProgressKind::Cancelled,
            format!("Run {}", cause),
            json!({ "cause": cause }),
        ));
        LoopFailure {
            error: LoopError::Cancelled(cause),
            partial,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::llm::{ChatResponse, Role};
    use crate::testing::{CollectingSink, RecordingBridge, ScriptedLlm};
    use crate::tools::ToolRegistry;

    fn agent(llm: Arc<ScriptedLlm>, bridge: Arc<RecordingBridge>) -> Agent {
        Agent::new(llm, bridge, ToolRegistry::new().definitions(), "test-model")
    }

    #[tokio::test]
    async fn stop_without_tools_returns_content() {
        let llm = Arc::new(ScriptedLlm::new(vec![Ok(ScriptedLlm::stop("all clear"))]));
        let bridge = Arc::new(RecordingBridge::default());
        let sink = CollectingSink::default();

        let result = agent(llm.clone(), bridge.clone())
            .run_loop(&CancelHandle::new(), "scan 10.0.0.1", &[], &RunPolicy::default(), &sink)
            .await
            .expect("run should succeed");

        assert_eq!(result.response, "all clear");
        assert!(result.mcp_execution_ids.is_empty());
        assert_eq!(result.last_react_output.as_deref(), Some("all clear"));
        assert!(bridge.calls().await.is_empty());

        let sent = llm.requests().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0][0].role, Role::System);
        assert_eq!(sent[0].last().map(|m| m.text_content()), Some("scan 10.0.0.1"));
    }

    #[tokio::test]
    async fn single_tool_call_then_stop() {
        let llm = Arc::new(ScriptedLlm::new(vec![
            Ok(ScriptedLlm::tool_call("call_1", "nmap", "{\"target\":\"10.0.0.1\"}")),
            Ok(ScriptedLlm::stop("port 22 open")),
        ]));
        let bridge = Arc::new(RecordingBridge::default());
        let sink = CollectingSink::default();

        let result = agent(llm.clone(), bridge.clone())
            .run_loop(&CancelHandle::new(), "scan", &[], &RunPolicy::default(), &sink)
            .await
            .expect("run should succeed");

        assert_eq!(result.response, "port 22 open");
        assert_eq!(result.mcp_execution_ids.len(), 1);

        let calls = bridge.calls().await;
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "nmap");
        assert_eq!(calls[0].1["target"], "10.0.0.1");

        let second = &llm.requests().await[1];
        let tool_msgs: Vec<_> = second.iter().filter(|m| m.role == Role::Tool).collect();
        assert_eq!(tool_msgs.len(), 1);
        assert_eq!(tool_msgs[0].tool_call_id.as_deref(), Some("call_1"));

        let kinds = sink.kinds();
        let call_pos = kinds.iter().position(|k| *k == ProgressKind::ToolCall).unwrap();
        let result_pos = kinds.iter().position(|k| *k == ProgressKind::ToolResult).unwrap();
        assert!(call_pos < result_pos);
    }

    #[tokio::test]
    async fn iteration_cap_is_not_an_error() {
        let script = (0..DEFAULT_MAX_ITERATIONS)
            .map(|i| Ok(ScriptedLlm::tool_call(&format!("call_{i}"), "nmap", "{}")))
            .collect();
        let llm = Arc::new(ScriptedLlm::new(script));
        let bridge = Arc::new(RecordingBridge::default());

        let result = agent(llm.clone(), bridge.clone())
            .run_loop(&CancelHandle::new(), "loop", &[], &RunPolicy::default(), &CollectingSink::default())
            .await
            .expect("cap is reported as a response");

        assert_eq!(result.response, MAX_ITERATIONS_RESPONSE);
        assert_eq!(llm.requests().await.len(), DEFAULT_MAX_ITERATIONS);
        assert_eq!(result.mcp_execution_ids.len(), DEFAULT_MAX_ITERATIONS);
    }

    #[tokio::test]
    async fn tool_errors_are_fed_back_to_the_model() {
        let llm = Arc::new(ScriptedLlm::new(vec![
            Ok(ScriptedLlm::tool_call("call_1", "sqlmap", "{}")),
            Ok(ScriptedLlm::stop("adapted")),
        ]));
        let bridge = Arc::new(RecordingBridge::failing("sqlmap"));

        let result = agent(llm.clone(), bridge)
            .run_loop(&CancelHandle::new(), "probe", &[], &RunPolicy::default(), &CollectingSink::default())
            .await
            .expect("tool failure is not fatal");

        assert_eq!(result.response, "adapted");
        assert!(result.mcp_execution_ids.is_empty());
        let second = &llm.requests().await[1];
        let tool_msg = second.iter().find(|m| m.role == Role::Tool).unwrap();
        assert!(tool_msg.text_content().starts_with("Tool execution failed"));
    }

    #[tokio::test]
    async fn disallowed_tools_are_refused_and_hidden() {
        let llm = Arc::new(ScriptedLlm::new(vec![
            Ok(ScriptedLlm::tool_call("call_1", "exec", "{\"command\":\"id\"}")),
            Ok(ScriptedLlm::stop("ok")),
        ]));
        let bridge = Arc::new(RecordingBridge::default());
        let policy = RunPolicy {
            allowed_tools: vec!["nmap".to_string()],
            skill_hints: vec!["recon".to_string()],
        };

        agent(llm.clone(), bridge.clone())
            .run_loop(&CancelHandle::new(), "go", &[], &policy, &CollectingSink::default())
            .await
            .expect("run should succeed");

        assert!(bridge.calls().await.is_empty());
        let offered = llm.offered_tools().await;
        assert_eq!(offered[0], vec!["nmap".to_string()]);
        let first = &llm.requests().await[0];
        assert!(first[0].text_content().contains("- recon"));
    }

    #[tokio::test]
    async fn model_error_keeps_partial_state() {
        let llm = Arc::new(ScriptedLlm::new(vec![
            Ok(ScriptedLlm::tool_call("call_1", "nmap", "{\"target\":\"a\"}")),
            Err(LlmError::Api {
                status: 500,
                message: "boom".to_string(),
            }),
        ]));
        let bridge = Arc::new(RecordingBridge::default());
        let sink = CollectingSink::default();

        let failure = agent(llm, bridge)
            .run_loop(&CancelHandle::new(), "scan", &[], &RunPolicy::default(), &sink)
            .await
            .expect_err("model error aborts the run");

        assert!(matches!(failure.error, LoopError::Llm(_)));
        assert_eq!(failure.cancel_cause(), None);
        assert_eq!(failure.partial.mcp_execution_ids.len(), 1);
        let input = failure.partial.last_react_input.expect("input captured");
        assert!(input.contains("call_1"));
        assert!(sink.kinds().contains(&ProgressKind::Error));
    }

    #[tokio::test]
    async fn cancellation_before_start_reports_cause() {
        let llm = Arc::new(ScriptedLlm::new(vec![Ok(ScriptedLlm::stop("never"))]));
        let cancel = CancelHandle::new();
        cancel.cancel(CancelCause::Timeout);
        let sink = CollectingSink::default();

        let failure = agent(llm.clone(), Arc::new(RecordingBridge::default()))
            .run_loop(&cancel, "scan", &[], &RunPolicy::default(), &sink)
            .await
            .expect_err("cancelled run fails");

        assert_eq!(failure.cancel_cause(), Some(CancelCause::Timeout));
        assert!(llm.requests().await.is_empty());
        assert_eq!(sink.kinds(), vec![ProgressKind::Cancelled]);

        let input = failure.partial.last_react_input.expect("input recorded at loop entry");
        let sent: Vec<ChatMessage> = serde_json::from_str(&input).unwrap();
        assert_eq!(sent[0].role, Role::System);
        assert_eq!(sent.last().map(|m| m.text_content()), Some("scan"));
    }

    #[tokio::test]
    async fn cancellation_stops_remaining_tool_calls_of_a_turn() {
        let mut turn = ScriptedLlm::tool_call("call_1", "nmap", "{\"target\":\"10.0.0.1\"}");
        turn.tool_calls
            .extend(ScriptedLlm::tool_call("call_2", "nikto", "{\"target\":\"10.0.0.1\"}").tool_calls);
        let llm = Arc::new(ScriptedLlm::new(vec![Ok(turn), Ok(ScriptedLlm::stop("never"))]));
        let bridge = Arc::new(RecordingBridge::cancelling_on("nmap"));
        let sink = CollectingSink::default();

        let failure = agent(llm.clone(), bridge.clone())
            .run_loop(&CancelHandle::new(), "scan", &[], &RunPolicy::default(), &sink)
            .await
            .expect_err("cancelled run fails");

        assert_eq!(failure.cancel_cause(), Some(CancelCause::Cancelled));
        let calls: Vec<String> = bridge.calls().await.into_iter().map(|(name, _)| name).collect();
        assert_eq!(calls, vec!["nmap".to_string()]);
        assert_eq!(llm.requests().await.len(), 1);
        assert_eq!(failure.partial.mcp_execution_ids, vec!["exec-1".to_string()]);
        assert_eq!(sink.kinds().last(), Some(&ProgressKind::Cancelled));
    }

    #[tokio::test]
    async fn cancellation_interrupts_a_pending_model_call() {
        let llm = Arc::new(ScriptedLlm::hanging());
        let cancel = CancelHandle::new();
        let agent = Arc::new(agent(llm, Arc::new(RecordingBridge::default())));

        let run = {
            let agent = agent.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                agent
                    .run_loop(&cancel, "scan", &[], &RunPolicy::default(), &CollectingSink::default())
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel(CancelCause::Cancelled);

        let failure = run.await.unwrap().expect_err("cancelled");
        assert_eq!(failure.cancel_cause(), Some(CancelCause::Cancelled));
        assert!(failure.partial.last_react_input.is_some());
    }

    #[tokio::test]
    async fn history_is_replayed_before_the_new_message() {
        let llm = Arc::new(ScriptedLlm::new(vec![Ok(ChatResponse {
            content: Some("noted".to_string()),
            tool_calls: Vec::new(),
            finish_reason: Some("stop".to_string()),
        })]));
        let history = vec![
            ChatMessage::user("earlier"),
            ChatMessage::assistant(""),
            ChatMessage::assistant("earlier answer"),
        ];

        agent(llm.clone(), Arc::new(RecordingBridge::default()))
            .run_loop(&CancelHandle::new(), "now", &history, &RunPolicy::default(), &CollectingSink::default())
            .await
            .expect("run should succeed");

        let sent = &llm.requests().await[0];
        let texts: Vec<&str> = sent.iter().skip(1).map(|m| m.text_content()).collect();
        assert_eq!(texts, vec!["earlier", "earlier answer", "now"]);
    }
}
