//! Conversational run endpoints.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};

use crate::agent::LogSink;
use crate::chat::{ChatError, ChatOutcome, ChatRequest};
use crate::store::{Conversation, Store, StoreError};
use crate::tasks::{CompletedTask, Task, TaskError};

use super::routes::AppState;
use super::types::{CancelTaskRequest, CancelTaskResponse, ConversationDetail, PageQuery};

fn chat_error(e: ChatError) -> (StatusCode, String) {
    let status = match &e {
        ChatError::EmptyMessage => StatusCode::BAD_REQUEST,
        ChatError::ConversationNotFound(_) => StatusCode::NOT_FOUND,
        ChatError::Task(TaskError::AlreadyRunning(_)) | ChatError::Task(TaskError::NotCancellable { .. }) => {
            StatusCode::CONFLICT
        }
        ChatError::Store(_) | ChatError::Aborted(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, e.to_string())
}

fn store_error(e: StoreError) -> (StatusCode, String) {
    match e {
        StoreError::NotFound { .. } => (StatusCode::NOT_FOUND, e.to_string()),
        _ => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

/// Run one message to completion and return the final answer.
///
/// The run keeps going if the client disconnects.
pub async fn run(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<ChatOutcome>, (StatusCode, String)> {
    tracing::info!(
        conversation_id = ?req.conversation_id,
        role = ?req.role,
        message_len = req.message.len(),
        "Received agent loop request"
    );
    let sink = Arc::new(LogSink {
        scope: "agent-loop".to_string(),
    });
    let outcome = state.chat.run(req, sink).await.map_err(chat_error)?;
    Ok(Json(outcome))
}

pub async fn cancel(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CancelTaskRequest>,
) -> Result<Json<CancelTaskResponse>, (StatusCode, String)> {
    if req.conversation_id.trim().is_empty() {
        return Err((StatusCode::BAD_REQUEST, "conversation_id is required".to_string()));
    }
    let cancelled = state.chat.cancel(&req.conversation_id).await.map_err(chat_error)?;
    Ok(Json(CancelTaskResponse {
        conversation_id: req.conversation_id,
        cancelled,
    }))
}

pub async fn active_tasks(State(state): State<Arc<AppState>>) -> Json<Vec<Task>> {
    Json(state.tasks.get_active_tasks().await)
}

pub async fn completed_tasks(State(state): State<Arc<AppState>>) -> Json<Vec<CompletedTask>> {
    Json(state.tasks.get_completed_tasks().await)
}

pub async fn list_conversations(
    State(state): State<Arc<AppState>>,
    Query(page): Query<PageQuery>,
) -> Result<Json<Vec<Conversation>>, (StatusCode, String)> {
    let conversations = state
        .store
        .list_conversations(page.limit, page.offset)
        .await
        .map_err(store_error)?;
    Ok(Json(conversations))
}

pub async fn get_conversation(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<ConversationDetail>, (StatusCode, String)> {
    let conversation = state
        .store
        .get_conversation(&id)
        .await
        .map_err(store_error)?
        .ok_or_else(|| (StatusCode::NOT_FOUND, format!("Conversation {} not found", id)))?;
    let messages = state.store.list_messages(&id).await.map_err(store_error)?;
    Ok(Json(ConversationDetail { conversation, messages }))
}

/// Delete a conversation. Refused while a run is active on it.
pub async fn delete_conversation(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, (StatusCode, String)> {
    state
        .tasks
        .while_idle(&id, || state.store.delete_conversation(&id))
        .await
        .map_err(|_| {
            (
                StatusCode::CONFLICT,
                format!("Conversation {} has an active task", id),
            )
        })?
        .map_err(store_error)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_roles(State(state): State<Arc<AppState>>) -> Json<Vec<String>> {
    Json(state.roles.names())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::store::InMemoryStore;
    use crate::tasks::TaskStatus;
    use crate::testing::{RecordingBridge, ScriptedLlm};
    use crate::tools::ToolRegistry;

    fn state(llm: ScriptedLlm) -> Arc<AppState> {
        state_with(Arc::new(llm))
    }

    fn state_with(llm: Arc<ScriptedLlm>) -> Arc<AppState> {
        let config = Config::from_lookup(|key: &str| match key {
            "OPENAI_API_KEY" => Some("test".to_string()),
            "DATABASE_PATH" => Some(String::new()),
            _ => None,
        })
        .expect("config");
        Arc::new(AppState::new(
            &config,
            llm,
            Arc::new(RecordingBridge::default()),
            ToolRegistry::new().definitions(),
            Arc::new(InMemoryStore::new()),
        ))
    }

    #[tokio::test]
    async fn run_returns_the_final_answer() {
        let state = state(ScriptedLlm::new(vec![Ok(ScriptedLlm::stop("no open ports"))]));
        let Json(outcome) = run(
            State(state.clone()),
            Json(ChatRequest {
                message: "scan 10.0.0.1".to_string(),
                conversation_id: None,
                role: None,
            }),
        )
        .await
        .expect("run");
        assert_eq!(outcome.status, TaskStatus::Completed);
        assert_eq!(outcome.response, "no open ports");

        let Json(detail) = get_conversation(State(state.clone()), Path(outcome.conversation_id.clone()))
            .await
            .expect("conversation");
        assert_eq!(detail.messages.len(), 2);

        let Json(completed) = completed_tasks(State(state)).await;
        assert_eq!(completed.len(), 1);
    }

    #[tokio::test]
    async fn blank_message_is_a_bad_request() {
        let state = state(ScriptedLlm::new(vec![]));
        let (status, _) = run(
            State(state),
            Json(ChatRequest {
                message: " ".to_string(),
                conversation_id: None,
                role: None,
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn cancel_without_active_run_reports_false() {
        let state = state(ScriptedLlm::new(vec![]));
        let Json(resp) = cancel(
            State(state),
            Json(CancelTaskRequest {
                conversation_id: "c1".to_string(),
            }),
        )
        .await
        .expect("cancel");
        assert!(!resp.cancelled);
    }

    #[tokio::test]
    async fn delete_is_refused_while_a_run_is_active() {
        let llm = Arc::new(ScriptedLlm::gated());
        let state = state_with(llm.clone());
        let conversation = state.store.create_conversation("t").await.expect("create");

        let running = {
            let state = state.clone();
            let id = conversation.id.clone();
            tokio::spawn(async move {
                run(
                    State(state),
                    Json(ChatRequest {
                        message: "scan 10.0.0.1".to_string(),
                        conversation_id: Some(id),
                        role: None,
                    }),
                )
                .await
            })
        };
        while state.tasks.get_task(&conversation.id).await.is_none() {
            tokio::task::yield_now().await;
        }

        let (status, _) = delete_conversation(State(state.clone()), Path(conversation.id.clone()))
            .await
            .unwrap_err();
        assert_eq!(status, StatusCode::CONFLICT);

        llm.release(1);
        running.await.expect("join").expect("run");
        let status = delete_conversation(State(state.clone()), Path(conversation.id.clone()))
            .await
            .expect("delete");
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert!(state.store.get_conversation(&conversation.id).await.expect("get").is_none());
    }

    #[tokio::test]
    async fn missing_conversation_is_not_found() {
        let state = state(ScriptedLlm::new(vec![]));
        let (status, _) = get_conversation(State(state), Path("nope".to_string()))
            .await
            .unwrap_err();
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
