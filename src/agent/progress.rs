//! Progress events emitted by a running loop.

use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressKind {
    Progress,
    ToolCall,
    ToolResult,
    Error,
    Cancelled,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProgressEvent {
    #[serde(rename = "type")]
    pub kind: ProgressKind,
    pub message: String,
    pub data: Value,
}

impl ProgressEvent {
    pub fn new(kind: ProgressKind, message: impl Into<String>, data: Value) -> Self {
        Self {
            kind,
            message: message.into(),
            data,
        }
    }
}

/// Receiver of progress events.
///
/// `emit` is synchronous and must return quickly; the loop never waits on a
/// sink. Implementations that forward elsewhere should drop events rather
/// than block.
pub trait ProgressSink: Send + Sync {
    fn emit(&self, event: ProgressEvent);
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

impl ProgressSink for NoopSink {
    fn emit(&self, _event: ProgressEvent) {}
}

/// Forwards events into a bounded channel, dropping them when it is full or
/// closed.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<ProgressEvent>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<ProgressEvent>) -> Self {
        Self { tx }
    }
}

impl ProgressSink for ChannelSink {
    fn emit(&self, event: ProgressEvent) {
        if let Err(e) = self.tx.try_send(event) {
            tracing::trace!("Dropping progress event: {}", e);
        }
    }
}

/// Logs every event through `tracing`.
#[derive(Debug, Clone, Default)]
pub struct LogSink {
    pub scope: String,
}

impl ProgressSink for LogSink {
    fn emit(&self, event: ProgressEvent) {
        match event.kind {
            ProgressKind::Error => tracing::warn!(scope = %self.scope, "{}", event.message),
            _ => tracing::debug!(scope = %self.scope, kind = ?event.kind, "{}", event.message),
        }
    }
}
