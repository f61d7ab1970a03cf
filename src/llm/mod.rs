//! Language-model chat types and client abstraction.
//!
//! The loop engine talks to the model through [`LlmClient`], a synchronous
//! request/response contract: one ordered message list (plus an optional
//! tool schema) in, one [`ChatResponse`] out. Streaming to end users, if any,
//! is layered above this crate.

mod openai;

use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use thiserror::Error;

pub use openai::OpenAiClient;

/// Role of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "system" => Ok(Role::System),
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            "tool" => Ok(Role::Tool),
            other => Err(format!("unknown message role: {}", other)),
        }
    }
}

/// A single message in a model conversation.
///
/// `tool_calls` is only set on assistant messages, `tool_call_id` only on
/// tool messages (it names the call the message answers).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self::text(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::text(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::text(Role::Assistant, content)
    }

    /// Assistant turn that requests tool calls. Empty content is stored as `None`.
    pub fn assistant_with_tools(content: Option<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.filter(|c| !c.is_empty()),
            tool_calls: Some(tool_calls),
            tool_call_id: None,
        }
    }

    pub fn tool(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: Some(tool_call_id.into()),
        }
    }

    fn text(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    /// Message text, or `""` when absent.
    pub fn text_content(&self) -> &str {
        self.content.as_deref().unwrap_or("")
    }

    pub fn has_tool_calls(&self) -> bool {
        self.tool_calls.as_ref().is_some_and(|calls| !calls.is_empty())
    }
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type", default = "default_call_type")]
    pub call_type: String,
    pub function: FunctionCall,
}

fn default_call_type() -> String {
    "function".to_string()
}

/// Name and arguments of a tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    #[serde(default)]
    pub arguments: ToolArguments,
}

/// Tool-call arguments, normalized once when the call is decoded.
///
/// Models send arguments as a JSON object, as a JSON-encoded string, or not
/// at all. Strings that decode to an object become [`ToolArguments::Object`];
/// any other string is kept verbatim as [`ToolArguments::RawString`].
#[derive(Debug, Clone, PartialEq, Default)]
pub enum ToolArguments {
    Object(Map<String, Value>),
    RawString(String),
    #[default]
    Empty,
}

impl ToolArguments {
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(map) => ToolArguments::Object(map),
            Value::String(raw) => Self::from_json_str(&raw),
            Value::Null => ToolArguments::Empty,
            other => ToolArguments::RawString(other.to_string()),
        }
    }

    pub fn from_json_str(raw: &str) -> Self {
        if raw.trim().is_empty() {
            return ToolArguments::Empty;
        }
        match serde_json::from_str::<Value>(raw) {
            Ok(Value::Object(map)) => ToolArguments::Object(map),
            _ => ToolArguments::RawString(raw.to_string()),
        }
    }

    /// The argument mapping handed to the tool bridge.
    pub fn to_map(&self) -> Map<String, Value> {
        match self {
            ToolArguments::Object(map) => map.clone(),
            ToolArguments::RawString(raw) => {
                let mut map = Map::new();
                map.insert("raw".to_string(), Value::String(raw.clone()));
                map
            }
            ToolArguments::Empty => Map::new(),
        }
    }

    /// Wire form expected by OpenAI-compatible endpoints (a JSON string).
    pub fn to_wire_string(&self) -> String {
        match self {
            ToolArguments::Object(map) => Value::Object(map.clone()).to_string(),
            ToolArguments::RawString(raw) => raw.clone(),
            ToolArguments::Empty => "{}".to_string(),
        }
    }
}

impl Serialize for ToolArguments {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_wire_string())
    }
}

impl<'de> Deserialize<'de> for ToolArguments {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Option::<Value>::deserialize(deserializer)?;
        Ok(value.map(ToolArguments::from_value).unwrap_or_default())
    }
}

/// OpenAI-style function tool definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    #[serde(rename = "type")]
    pub tool_type: String,
    pub function: FunctionDefinition,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

impl ToolDefinition {
    pub fn function(name: &str, description: &str, parameters: Value) -> Self {
        Self {
            tool_type: "function".to_string(),
            function: FunctionDefinition {
                name: name.to_string(),
                description: description.to_string(),
                parameters,
            },
        }
    }

    pub fn name(&self) -> &str {
        &self.function.name
    }
}

/// One model turn.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatResponse {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCall>,
    pub finish_reason: Option<String>,
}

impl ChatResponse {
    pub fn is_stop(&self) -> bool {
        self.finish_reason.as_deref() == Some("stop")
    }
}

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("model request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("model API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("failed to decode model response: {0}")]
    Decode(String),

    #[error("model returned no choices")]
    EmptyResponse,
}

/// Chat-completion endpoint.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn chat_completion(
        &self,
        model: &str,
        messages: &[ChatMessage],
        tools: Option<&[ToolDefinition]>,
    ) -> Result<ChatResponse, LlmError>;
}
