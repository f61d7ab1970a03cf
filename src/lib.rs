//! # cyberstrike
//!
//! An autonomous security-testing orchestrator.
//!
//! This library provides:
//! - A tool-calling agent loop that drives a model through scanners,
//!   command execution and a skills/knowledge library
//! - Per-conversation task exclusivity with cause-aware cancellation
//! - Unattended batch queues that run many loops one after another
//! - An HTTP API for runs, queues and tool monitoring
//!
//! ## Architecture
//!
//! The agent follows the "tools in a loop" pattern:
//! 1. Receive a message via the API or a batch queue
//! 2. Build context from the system prompt, the replayed history and the
//!    tools the active role allows
//! 3. Call the model, dispatch any tool calls through the tool bridge
//! 4. Feed results back to the model, repeat until it answers or the
//!    iteration cap is reached
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use cyberstrike::agent::{Agent, NoopSink, RunPolicy};
//! use cyberstrike::cancel::CancelHandle;
//!
//! let agent = Agent::new(llm, bridge, catalog, "gpt-4o");
//! let result = agent
//!     .run_loop(&CancelHandle::new(), "Scan 10.0.0.1", &[], &RunPolicy::default(), &NoopSink)
//!     .await?;
//! ```

pub mod agent;
pub mod api;
pub mod batch;
pub mod cancel;
pub mod chat;
pub mod config;
pub mod llm;
pub mod store;
pub mod tasks;
pub mod text;
pub mod tools;

#[cfg(test)]
mod testing;

pub use config::Config;
