//! Conversation history handed to the loop: assembly from stored messages,
//! resumption from a ReAct snapshot, and orphan tool-message repair.

use std::collections::{HashMap, HashSet};

use thiserror::Error;

use crate::llm::{ChatMessage, Role};

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("invalid ReAct snapshot: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("ReAct snapshot contains no replayable messages")]
    Empty,
}

/// Whether a history message is replayed to the model.
///
/// Placeholder turns (empty content, no tool calls) are dropped. Assistant
/// turns that only carry tool calls are kept so their tool answers still
/// have a parent.
fn is_replayable(msg: &ChatMessage) -> bool {
    if msg.role == Role::System {
        return false;
    }
    !msg.text_content().is_empty() || (msg.role == Role::Assistant && msg.has_tool_calls())
}

/// Build the model conversation for one run: system prompt, replayable
/// history, then the new user message.
pub fn assemble_messages(system_prompt: &str, history: &[ChatMessage], user_message: &str) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(history.len() + 2);
    messages.push(ChatMessage::system(system_prompt));
    messages.extend(repair_orphan_tool_messages(
        history.iter().filter(|m| is_replayable(m)).cloned().collect(),
    ));
    messages.push(ChatMessage::user(user_message));
    messages
}

/// Make a message list safe to replay.
///
/// - tool calls that never receive a later tool answer are removed from their
///   assistant message;
/// - tool messages that answer no earlier assistant tool call are dropped;
/// - assistant messages left with neither content nor calls are dropped.
///
/// Applying the repair twice gives the same result as applying it once.
pub fn repair_orphan_tool_messages(messages: Vec<ChatMessage>) -> Vec<ChatMessage> {
    // Index of the last tool message answering each call id.
    let mut last_answer: HashMap<String, usize> = HashMap::new();
    for (idx, msg) in messages.iter().enumerate() {
        if msg.role == Role::Tool {
            if let Some(id) = &msg.tool_call_id {
                last_answer.insert(id.clone(), idx);
            }
        }
    }

    let mut issued: HashSet<String> = HashSet::new();
    let mut repaired = Vec::with_capacity(messages.len());

    for (idx, mut msg) in messages.into_iter().enumerate() {
        match msg.role {
            Role::Assistant => {
                if let Some(calls) = msg.tool_calls.take() {
                    let kept: Vec<_> = calls
                        .into_iter()
                        .filter(|c| last_answer.get(&c.id).is_some_and(|&answer| answer > idx))
                        .collect();
                    if !kept.is_empty() {
                        issued.extend(kept.iter().map(|c| c.id.clone()));
                        msg.tool_calls = Some(kept);
                    }
                }
                if msg.text_content().is_empty() && !msg.has_tool_calls() {
                    continue;
                }
                repaired.push(msg);
            }
            Role::Tool => {
                let known = msg.tool_call_id.as_ref().is_some_and(|id| issued.contains(id));
                if known {
                    repaired.push(msg);
                } else {
                    tracing::debug!(tool_call_id = ?msg.tool_call_id, "Dropping orphaned tool message");
                }
            }
            _ => repaired.push(msg),
        }
    }

    repaired
}

/// Rebuild replayable history from a stored ReAct snapshot.
///
/// `input_json` is a serialized message list as captured by the loop; system
/// messages are skipped since every run adds its own. `output` is the last
/// assistant text: it replaces the content of a trailing tool-call-free
/// assistant message, or is appended as a new assistant message.
pub fn restore_react_history(input_json: &str, output: Option<&str>) -> Result<Vec<ChatMessage>, HistoryError> {
    let parsed: Vec<ChatMessage> = serde_json::from_str(input_json)?;
    let mut messages: Vec<ChatMessage> = parsed.into_iter().filter(|m| m.role != Role::System).collect();

    if let Some(output) = output.filter(|o| !o.is_empty()) {
        match messages.last_mut() {
            Some(last) if last.role == Role::Assistant && !last.has_tool_calls() => {
                last.content = Some(output.to_string());
            }
            _ => messages.push(ChatMessage::assistant(output)),
        }
    }

    let messages = repair_orphan_tool_messages(messages);
    if messages.is_empty() {
        return Err(HistoryError::Empty);
    }
    Ok(messages)
}
