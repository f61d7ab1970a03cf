//! Batch queue endpoints.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};

use crate::batch::{BatchError, BatchQueue, QueueFilter, QueuePage, QueueStatus};

use super::routes::AppState;
use super::types::{AddTaskResponse, CreateQueueRequest, QueueListQuery, TaskMessageRequest};

fn batch_error(e: BatchError) -> (StatusCode, String) {
    let status = match &e {
        BatchError::QueueNotFound(_) | BatchError::TaskNotFound { .. } => StatusCode::NOT_FOUND,
        BatchError::EmptyQueue | BatchError::EmptyMessage => StatusCode::BAD_REQUEST,
        BatchError::AlreadyRunning(_) | BatchError::InvalidQueueState { .. } | BatchError::TaskNotPending { .. } => {
            StatusCode::CONFLICT
        }
    };
    (status, e.to_string())
}

fn ok_json() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "ok": true }))
}

pub async fn create_queue(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateQueueRequest>,
) -> Result<Json<BatchQueue>, (StatusCode, String)> {
    let queue = state
        .batch
        .create_queue(&req.title, &req.role, &req.tasks)
        .await
        .map_err(batch_error)?;
    Ok(Json(queue))
}

pub async fn list_queues(
    State(state): State<Arc<AppState>>,
    Query(query): Query<QueueListQuery>,
) -> Result<Json<QueuePage>, (StatusCode, String)> {
    let mut filter = QueueFilter::default();
    if let Some(status) = query.status.as_deref().filter(|s| !s.is_empty() && *s != "all") {
        filter.status = Some(
            status
                .parse::<QueueStatus>()
                .map_err(|e| (StatusCode::BAD_REQUEST, e))?,
        );
    }
    filter.keyword = query.keyword.filter(|k| !k.trim().is_empty());
    if let Some(limit) = query.limit {
        filter.limit = limit.clamp(1, 100);
    }
    filter.offset = query.offset.unwrap_or(0);

    Ok(Json(state.batch.list_queues(&filter).await))
}

pub async fn get_queue(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<BatchQueue>, (StatusCode, String)> {
    state
        .batch
        .get_queue(&id)
        .await
        .map(Json)
        .ok_or_else(|| batch_error(BatchError::QueueNotFound(id)))
}

pub async fn start_queue(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, (StatusCode, String)> {
    state.batch.start_queue(&id).await.map_err(batch_error)?;
    Ok(ok_json())
}

pub async fn pause_queue(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, (StatusCode, String)> {
    state.batch.pause_queue(&id).await.map_err(batch_error)?;
    Ok(ok_json())
}

pub async fn cancel_queue(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, (StatusCode, String)> {
    state.batch.cancel_queue(&id).await.map_err(batch_error)?;
    Ok(ok_json())
}

pub async fn delete_queue(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, (StatusCode, String)> {
    state.batch.delete_queue(&id).await.map_err(batch_error)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn add_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<TaskMessageRequest>,
) -> Result<Json<AddTaskResponse>, (StatusCode, String)> {
    let task = state.batch.add_task(&id, &req.message).await.map_err(batch_error)?;
    Ok(Json(AddTaskResponse { queue_id: id, task }))
}

pub async fn update_task(
    State(state): State<Arc<AppState>>,
    Path((id, task_id)): Path<(String, String)>,
    Json(req): Json<TaskMessageRequest>,
) -> Result<Json<serde_json::Value>, (StatusCode, String)> {
    state
        .batch
        .update_task_message(&id, &task_id, &req.message)
        .await
        .map_err(batch_error)?;
    Ok(ok_json())
}

pub async fn delete_task(
    State(state): State<Arc<AppState>>,
    Path((id, task_id)): Path<(String, String)>,
) -> Result<StatusCode, (StatusCode, String)> {
    state.batch.delete_task(&id, &task_id).await.map_err(batch_error)?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::BatchTaskStatus;

    #[test]
    fn errors_map_to_http_statuses() {
        assert_eq!(batch_error(BatchError::QueueNotFound("q".into())).0, StatusCode::NOT_FOUND);
        assert_eq!(batch_error(BatchError::EmptyQueue).0, StatusCode::BAD_REQUEST);
        assert_eq!(batch_error(BatchError::AlreadyRunning("q".into())).0, StatusCode::CONFLICT);
        let (status, body) = batch_error(BatchError::TaskNotPending {
            task_id: "t".into(),
            status: BatchTaskStatus::Running,
        });
        assert_eq!(status, StatusCode::CONFLICT);
        assert!(body.contains("running"));
    }
}
