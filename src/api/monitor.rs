//! Tool execution monitoring.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};

use crate::tools::{ToolBridge, ToolExecution, ToolStats};

use super::routes::AppState;
use super::types::ExecutionListQuery;

pub async fn stats(State(state): State<Arc<AppState>>) -> Json<HashMap<String, ToolStats>> {
    Json(state.bridge.stats().await)
}

pub async fn list_executions(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ExecutionListQuery>,
) -> Json<Vec<ToolExecution>> {
    Json(state.bridge.list_executions(query.limit.min(500)).await)
}

pub async fn get_execution(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<ToolExecution>, (StatusCode, String)> {
    state
        .bridge
        .get_execution(&id)
        .await
        .map(Json)
        .ok_or_else(|| (StatusCode::NOT_FOUND, format!("Execution {} not found", id)))
}
