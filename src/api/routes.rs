//! Application state, router and server startup.

use std::sync::Arc;

use axum::{
    routing::{get, post, put},
    Json, Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::agent::Agent;
use crate::batch::{BatchQueueManager, BatchRunner};
use crate::chat::ChatService;
use crate::config::{Config, RoleSet};
use crate::llm::{LlmClient, ToolDefinition};
use crate::store::Store;
use crate::tasks::TaskManager;
use crate::tools::ToolBridge;

use super::types::HealthResponse;
use super::{agent, batch, monitor};

/// Shared application state.
pub struct AppState {
    pub chat: ChatService,
    pub tasks: Arc<TaskManager>,
    pub batch: Arc<BatchQueueManager>,
    pub bridge: Arc<dyn ToolBridge>,
    pub store: Arc<dyn Store>,
    pub roles: Arc<RoleSet>,
    pub model: String,
}

impl AppState {
    /// Wire the core services together. One agent is shared by chat runs and
    /// batch workers.
    pub fn new(
        config: &Config,
        llm: Arc<dyn LlmClient>,
        bridge: Arc<dyn ToolBridge>,
        catalog: Vec<ToolDefinition>,
        store: Arc<dyn Store>,
    ) -> Self {
        let agent = Arc::new(
            Agent::new(llm, bridge.clone(), catalog, config.model.clone())
                .with_max_iterations(config.max_iterations),
        );
        let roles = Arc::new(config.roles.clone());
        let tasks = Arc::new(TaskManager::new(config.completed_task_history));

        let chat = ChatService::new(
            agent.clone(),
            tasks.clone(),
            store.clone(),
            roles.clone(),
            config.task_timeout,
        );
        let runner = BatchRunner::new(agent, store.clone(), roles.clone(), config.batch_task_timeout);
        let batch = Arc::new(BatchQueueManager::new(store.clone(), runner));

        Self {
            chat,
            tasks,
            batch,
            bridge,
            store,
            roles,
            model: config.model.clone(),
        }
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/health", get(health))
        .route("/api/roles", get(agent::list_roles))
        // Conversational runs
        .route("/api/agent-loop", post(agent::run))
        .route("/api/agent-loop/cancel", post(agent::cancel))
        .route("/api/agent-loop/tasks", get(agent::active_tasks))
        .route("/api/agent-loop/tasks/completed", get(agent::completed_tasks))
        .route("/api/conversations", get(agent::list_conversations))
        .route(
            "/api/conversations/:id",
            get(agent::get_conversation).delete(agent::delete_conversation),
        )
        // Batch queues
        .route("/api/batch-tasks", post(batch::create_queue).get(batch::list_queues))
        .route(
            "/api/batch-tasks/:id",
            get(batch::get_queue).delete(batch::delete_queue),
        )
        .route("/api/batch-tasks/:id/start", post(batch::start_queue))
        .route("/api/batch-tasks/:id/pause", post(batch::pause_queue))
        .route("/api/batch-tasks/:id/cancel", post(batch::cancel_queue))
        .route("/api/batch-tasks/:id/tasks", post(batch::add_task))
        .route(
            "/api/batch-tasks/:id/tasks/:task_id",
            put(batch::update_task).delete(batch::delete_task),
        )
        // Tool monitoring
        .route("/api/monitor/stats", get(monitor::stats))
        .route("/api/monitor/executions", get(monitor::list_executions))
        .route("/api/monitor/executions/:id", get(monitor::get_execution))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health(axum::extract::State(state): axum::extract::State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        model: state.model.clone(),
        persistent: state.store.is_persistent(),
    })
}

/// Bind and serve until the process is stopped.
pub async fn serve(config: &Config, state: Arc<AppState>) -> anyhow::Result<()> {
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, router(state)).await?;
    Ok(())
}
