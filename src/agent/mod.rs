//! Agent module - the ReAct loop engine.
//!
//! The agent follows a "tools in a loop" pattern:
//! 1. Build context with the system prompt, replayable history and the user message
//! 2. Call the model with the tools this run may use
//! 3. If the model requests tool calls, run them one by one through the bridge and feed results back
//! 4. Repeat until the model stops or the iteration cap is reached

mod agent_loop;
mod history;
mod progress;
mod prompt;

pub use agent_loop::{
    Agent, AgentLoopResult, LoopError, LoopFailure, RunPolicy, DEFAULT_MAX_ITERATIONS,
    MAX_ITERATIONS_RESPONSE,
};
pub use history::{assemble_messages, repair_orphan_tool_messages, restore_react_history, HistoryError};
pub use progress::{ChannelSink, LogSink, NoopSink, ProgressEvent, ProgressKind, ProgressSink};
pub use prompt::{build_system_prompt, SYSTEM_PROMPT};
