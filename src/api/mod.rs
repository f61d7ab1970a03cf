//! HTTP control surface.
//!
//! A thin JSON layer over the chat service, the task manager, the batch
//! queue engine and the tool bridge's monitoring channels. The core types
//! never depend on anything in here.

mod agent;
mod batch;
mod monitor;
mod routes;
mod types;

pub use routes::{router, serve, AppState};
pub use types::*;
