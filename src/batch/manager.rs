//! Queue registry and state transitions.
//!
//! All queue state lives behind one lock. Every transition is persisted
//! while the lock is held so the store never sees an older state after a
//! newer one.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;

use super::worker::{self, BatchRunner};
use super::{
    BatchError, BatchQueue, BatchTask, BatchTaskStatus, ClaimedTask, QueueFilter, QueuePage,
    QueueStatus, TaskOutcome,
};
use crate::cancel::{CancelCause, CancelHandle};
use crate::store::{Store, StoreError};

#[derive(Default)]
struct Inner {
    queues: HashMap<String, BatchQueue>,
    /// Queues with a live worker, including one that is winding down.
    workers: HashSet<String>,
}

pub struct BatchQueueManager {
    inner: Mutex<Inner>,
    store: Arc<dyn Store>,
    runner: Arc<BatchRunner>,
}

impl BatchQueueManager {
    pub fn new(store: Arc<dyn Store>, runner: BatchRunner) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            store,
            runner: Arc::new(runner),
        }
    }

    pub(super) fn runner(&self) -> &BatchRunner {
        &self.runner
    }

    /// Load persisted queues. Queues that were running come back paused and
    /// their running task goes back to pending.
    pub async fn restore(&self) -> Result<usize, StoreError> {
        let queues = self.store.load_batch_queues().await?;
        let mut inner = self.inner.lock().await;
        let count = queues.len();

        for mut queue in queues {
            let mut changed = false;
            if queue.status == QueueStatus::Running {
                queue.status = QueueStatus::Paused;
                changed = true;
            }
            for task in queue.tasks.iter_mut().filter(|t| t.status == BatchTaskStatus::Running) {
                task.status = BatchTaskStatus::Pending;
                task.started_at = None;
                changed = true;
            }
            if changed {
                tracing::info!(queue_id = %queue.id, "Interrupted batch queue restored as paused");
                self.persist(&queue).await;
            }
            inner.queues.insert(queue.id.clone(), queue);
        }

        tracing::info!(count, "Batch queues restored");
        Ok(count)
    }

    /// Build a pending queue with one task per non-empty message.
    pub async fn create_queue(&self, title: &str, role: &str, messages: &[String]) -> Result<BatchQueue, BatchError> {
        let tasks: Vec<BatchTask> = messages
            .iter()
            .map(|m| m.trim())
            .filter(|m| !m.is_empty())
            .map(|m| BatchTask::pending(m.to_string()))
            .collect();
        if tasks.is_empty() {
            return Err(BatchError::EmptyQueue);
        }

        let queue = BatchQueue {
            id: uuid::Uuid::new_v4().to_string(),
            title: title.trim().to_string(),
            role: role.trim().to_string(),
            status: QueueStatus::Pending,
            tasks,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        };

        let mut inner = self.inner.lock().await;
        self.persist(&queue).await;
        inner.queues.insert(queue.id.clone(), queue.clone());
        tracing::info!(queue_id = %queue.id, tasks = queue.tasks.len(), role = %queue.role, "Batch queue created");
        Ok(queue)
    }

    pub async fn get_queue(&self, queue_id: &str) -> Option<BatchQueue> {
        self.inner.lock().await.queues.get(queue_id).cloned()
    }

    /// Newest queues first.
    pub async fn list_queues(&self, filter: &QueueFilter) -> QueuePage {
        let inner = self.inner.lock().await;
        let keyword = filter
            .keyword
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .map(str::to_lowercase);

        let mut matching: Vec<&BatchQueue> = inner
            .queues
            .values()
            .filter(|q| filter.status.map_or(true, |s| q.status == s))
            .filter(|q| {
                keyword.as_deref().map_or(true, |k| {
                    q.id.to_lowercase().contains(k) || q.title.to_lowercase().contains(k)
                })
            })
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));

        QueuePage {
            total: matching.len(),
            queues: matching
                .into_iter()
                .skip(filter.offset)
                .take(filter.limit)
                .cloned()
                .collect(),
        }
    }

    /// Start or resume a queue.
    pub async fn start_queue(self: &Arc<Self>, queue_id: &str) -> Result<(), BatchError> {
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;
        let queue = inner
            .queues
            .get_mut(queue_id)
            .ok_or_else(|| BatchError::QueueNotFound(queue_id.to_string()))?;

        match queue.status {
            QueueStatus::Running => return Err(BatchError::AlreadyRunning(queue_id.to_string())),
            QueueStatus::Completed | QueueStatus::Cancelled => {
                return Err(BatchError::InvalidQueueState {
                    queue_id: queue_id.to_string(),
                    status: queue.status,
                    action: "start",
                })
            }
            QueueStatus::Pending | QueueStatus::Paused => {}
        }

        queue.status = QueueStatus::Running;
        queue.started_at.get_or_insert_with(Utc::now);
        let snapshot = queue.clone();
        self.persist(&snapshot).await;

        // A paused worker that has not exited yet will pick the queue back up.
        if inner.workers.insert(queue_id.to_string()) {
            let manager = Arc::clone(self);
            let id = queue_id.to_string();
            tokio::spawn(async move { worker::run_queue(manager, id).await });
            tracing::info!(queue_id = %queue_id, "Batch queue started");
        } else {
            tracing::info!(queue_id = %queue_id, "Batch queue resumed on its existing worker");
        }
        Ok(())
    }

    /// Stop after the running task finishes.
    pub async fn pause_queue(&self, queue_id: &str) -> Result<(), BatchError> {
        let mut inner = self.inner.lock().await;
        let queue = inner
            .queues
            .get_mut(queue_id)
            .ok_or_else(|| BatchError::QueueNotFound(queue_id.to_string()))?;
        if queue.status != QueueStatus::Running {
            return Err(BatchError::InvalidQueueState {
                queue_id: queue_id.to_string(),
                status: queue.status,
                action: "pause",
            });
        }
        queue.status = QueueStatus::Paused;
        let snapshot = queue.clone();
        self.persist(&snapshot).await;
        tracing::info!(queue_id = %queue_id, "Batch queue paused");
        Ok(())
    }

    /// Cancel the queue and the task it is running. Pending tasks stay pending.
    pub async fn cancel_queue(&self, queue_id: &str) -> Result<(), BatchError> {
        let mut inner = self.inner.lock().await;
        let queue = inner
            .queues
            .get_mut(queue_id)
            .ok_or_else(|| BatchError::QueueNotFound(queue_id.to_string()))?;
        if queue.status.is_finished() {
            return Err(BatchError::InvalidQueueState {
                queue_id: queue_id.to_string(),
                status: queue.status,
                action: "cancel",
            });
        }
        queue.status = QueueStatus::Cancelled;
        queue.completed_at = Some(Utc::now());
        if let Some(cancel) = queue.running_task_mut().and_then(|t| t.cancel.as_ref()) {
            cancel.cancel(CancelCause::Cancelled);
        }
        let snapshot = queue.clone();
        self.persist(&snapshot).await;
        tracing::info!(queue_id = %queue_id, "Batch queue cancelled");
        Ok(())
    }

    /// Remove a queue, cancelling its running task first.
    pub async fn delete_queue(&self, queue_id: &str) -> Result<(), BatchError> {
        let mut inner = self.inner.lock().await;
        let mut queue = inner
            .queues
            .remove(queue_id)
            .ok_or_else(|| BatchError::QueueNotFound(queue_id.to_string()))?;
        if let Some(cancel) = queue.running_task_mut().and_then(|t| t.cancel.as_ref()) {
            cancel.cancel(CancelCause::Cancelled);
        }
        if let Err(e) = self.store.delete_batch_queue(queue_id).await {
            tracing::warn!(queue_id = %queue_id, error = %e, "Failed to delete batch queue from store");
        }
        tracing::info!(queue_id = %queue_id, "Batch queue deleted");
        Ok(())
    }

    pub async fn add_task(&self, queue_id: &str, message: &str) -> Result<BatchTask, BatchError> {
        let message = message.trim();
        if message.is_empty() {
            return Err(BatchError::EmptyMessage);
        }
        let mut inner = self.inner.lock().await;
        let queue = inner
            .queues
            .get_mut(queue_id)
            .ok_or_else(|| BatchError::QueueNotFound(queue_id.to_string()))?;
        if queue.status.is_finished() {
            return Err(BatchError::InvalidQueueState {
                queue_id: queue_id.to_string(),
                status: queue.status,
                action: "add a task to",
            });
        }
        let task = BatchTask::pending(message.to_string());
        queue.tasks.push(task.clone());
        let snapshot = queue.clone();
        self.persist(&snapshot).await;
        Ok(task)
    }

    pub async fn update_task_message(&self, queue_id: &str, task_id: &str, message: &str) -> Result<(), BatchError> {
        let message = message.trim();
        if message.is_empty() {
            return Err(BatchError::EmptyMessage);
        }
        let mut inner = self.inner.lock().await;
        let queue = inner
            .queues
            .get_mut(queue_id)
            .ok_or_else(|| BatchError::QueueNotFound(queue_id.to_string()))?;
        let task = pending_task(queue, task_id)?;
        task.message = message.to_string();
        let snapshot = queue.clone();
        self.persist(&snapshot).await;
        Ok(())
    }

    pub async fn delete_task(&self, queue_id: &str, task_id: &str) -> Result<(), BatchError> {
        let mut inner = self.inner.lock().await;
        let queue = inner
            .queues
            .get_mut(queue_id)
            .ok_or_else(|| BatchError::QueueNotFound(queue_id.to_string()))?;
        pending_task(queue, task_id)?;
        queue.tasks.retain(|t| t.id != task_id);
        let snapshot = queue.clone();
        self.persist(&snapshot).await;
        Ok(())
    }

    pub async fn has_worker(&self, queue_id: &str) -> bool {
        self.inner.lock().await.workers.contains(queue_id)
    }

    /// Hand the next pending task to the worker, or retire the worker.
    ///
    /// Returns `None` when the queue is gone, no longer running, or has no
    /// pending task left (the queue is then marked completed). The worker
    /// registration is dropped in the same critical section.
    pub(super) async fn claim_next(&self, queue_id: &str, cancel: &CancelHandle) -> Option<ClaimedTask> {
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;

        let Some(queue) = inner.queues.get_mut(queue_id) else {
            inner.workers.remove(queue_id);
            return None;
        };
        if queue.status != QueueStatus::Running {
            tracing::info!(queue_id = %queue_id, status = %queue.status, "Batch worker stopping");
            inner.workers.remove(queue_id);
            return None;
        }

        let role = queue.role.clone();
        let Some(task) = queue.tasks.iter_mut().find(|t| t.status == BatchTaskStatus::Pending) else {
            queue.status = QueueStatus::Completed;
            queue.completed_at = Some(Utc::now());
            let snapshot = queue.clone();
            self.persist(&snapshot).await;
            inner.workers.remove(queue_id);
            tracing::info!(queue_id = %queue_id, "Batch queue completed");
            return None;
        };

        task.status = BatchTaskStatus::Running;
        task.started_at = Some(Utc::now());
        task.cancel = Some(cancel.clone());
        let claimed = ClaimedTask {
            queue_id: queue_id.to_string(),
            task_id: task.id.clone(),
            message: task.message.clone(),
            role,
        };
        let snapshot = queue.clone();
        self.persist(&snapshot).await;
        Some(claimed)
    }

    pub(super) async fn attach_conversation(&self, queue_id: &str, task_id: &str, conversation_id: &str) {
        let mut inner = self.inner.lock().await;
        let Some(queue) = inner.queues.get_mut(queue_id) else {
            return;
        };
        if let Some(task) = queue.task_mut(task_id) {
            task.conversation_id = Some(conversation_id.to_string());
            let snapshot = queue.clone();
            self.persist(&snapshot).await;
        }
    }

    pub(super) async fn complete_task(&self, queue_id: &str, task_id: &str, outcome: TaskOutcome) {
        let mut inner = self.inner.lock().await;
        let Some(queue) = inner.queues.get_mut(queue_id) else {
            return;
        };
        let Some(task) = queue.task_mut(task_id) else {
            return;
        };
        task.status = outcome.status;
        task.result = outcome.result;
        task.error = outcome.error;
        task.mcp_execution_ids = outcome.mcp_execution_ids;
        task.completed_at = Some(Utc::now());
        task.cancel = None;
        tracing::info!(queue_id = %queue_id, task_id = %task_id, status = %task.status, "Batch task finished");
        let snapshot = queue.clone();
        self.persist(&snapshot).await;
    }

    async fn persist(&self, queue: &BatchQueue) {
        if let Err(e) = self.store.save_batch_queue(queue).await {
            tracing::warn!(queue_id = %queue.id, error = %e, "Failed to persist batch queue");
        }
    }
}

fn pending_task<'a>(queue: &'a mut BatchQueue, task_id: &str) -> Result<&'a mut BatchTask, BatchError> {
    let queue_id = queue.id.clone();
    let task = queue.task_mut(task_id).ok_or_else(|| BatchError::TaskNotFound {
        queue_id,
        task_id: task_id.to_string(),
    })?;
    if task.status != BatchTaskStatus::Pending {
        return Err(BatchError::TaskNotPending {
            task_id: task_id.to_string(),
            status: task.status,
        });
    }
    Ok(task)
}

#[cfg(test)]
mod tests {
    use std::future::Future;
    use std::time::Duration;

    use super::*;
    use crate::agent::Agent;
    use crate::config::RoleSet;
    use crate::store::InMemoryStore;
    use crate::testing::{RecordingBridge, ScriptedLlm};
    use crate::tools::ToolRegistry;

    struct Fixture {
        manager: Arc<BatchQueueManager>,
        llm: Arc<ScriptedLlm>,
        store: Arc<InMemoryStore>,
    }

    fn fixture() -> Fixture {
        let llm = Arc::new(ScriptedLlm::gated());
        let store = Arc::new(InMemoryStore::new());
        let agent = Agent::new(
            llm.clone(),
            Arc::new(RecordingBridge::default()),
            ToolRegistry::new().definitions(),
            "test-model",
        );
        let runner = BatchRunner::new(
            Arc::new(agent),
            store.clone(),
            Arc::new(RoleSet::default()),
            Duration::from_secs(60),
        );
        Fixture {
            manager: Arc::new(BatchQueueManager::new(store.clone(), runner)),
            llm,
            store,
        }
    }

    async fn wait_until<F, Fut>(mut check: F)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = bool>,
    {
        for _ in 0..400 {
            if check().await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached in time");
    }

    #[tokio::test(start_paused = true)]
    async fn timed_out_task_fails_and_worker_moves_on() {
        let store = Arc::new(InMemoryStore::new());
        let agent = Agent::new(
            Arc::new(ScriptedLlm::hanging()),
            Arc::new(RecordingBridge::default()),
            ToolRegistry::new().definitions(),
            "test-model",
        );
        let runner = BatchRunner::new(
            Arc::new(agent),
            store.clone(),
            Arc::new(RoleSet::default()),
            Duration::from_secs(5),
        );
        let manager = Arc::new(BatchQueueManager::new(store.clone(), runner));

        let queue = manager.create_queue("slow", "", &messages(&["one", "two"])).await.unwrap();
        manager.start_queue(&queue.id).await.unwrap();

        let mut finished = None;
        for _ in 0..120 {
            let q = manager.get_queue(&queue.id).await.unwrap();
            if q.status.is_finished() && !manager.has_worker(&queue.id).await {
                finished = Some(q);
                break;
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
        let queue = finished.expect("queue finished");

        assert_eq!(queue.status, QueueStatus::Completed);
        for task in &queue.tasks {
            assert_eq!(task.status, BatchTaskStatus::Failed);
            assert_eq!(task.error.as_deref(), Some("task timed out after 5 seconds"));
            assert!(task.cancel.is_none());
            assert!(task.completed_at.is_some());

            let conversation_id = task.conversation_id.as_deref().unwrap();
            let stored = store.list_messages(conversation_id).await.unwrap();
            assert_eq!(stored[1].content, "Execution failed: task timed out after 5 seconds");
        }
    }

    fn messages(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    async fn task_statuses(manager: &BatchQueueManager, queue_id: &str) -> Vec<BatchTaskStatus> {
        manager
            .get_queue(queue_id)
            .await
            .expect("queue exists")
            .tasks
            .iter()
            .map(|t| t.status)
            .collect()
    }

    #[tokio::test]
    async fn create_skips_blank_messages() {
        let fx = fixture();
        let queue = fx
            .manager
            .create_queue("audit", "", &messages(&["scan a", "  ", "scan b"]))
            .await
            .expect("queue created");
        assert_eq!(queue.tasks.len(), 2);
        assert_eq!(queue.status, QueueStatus::Pending);
        assert!(queue.tasks.iter().all(|t| t.status == BatchTaskStatus::Pending));

        let err = fx.manager.create_queue("empty", "", &messages(&["", " "])).await.unwrap_err();
        assert_eq!(err, BatchError::EmptyQueue);
    }

    #[tokio::test]
    async fn queue_runs_every_task_in_order() {
        let fx = fixture();
        let queue = fx
            .manager
            .create_queue("audit", "", &messages(&["scan a", "scan b"]))
            .await
            .unwrap();
        fx.llm.release(2);
        fx.manager.start_queue(&queue.id).await.expect("started");

        let (manager, id) = (fx.manager.clone(), queue.id.clone());
        wait_until(|| {
            let (manager, id) = (manager.clone(), id.clone());
            async move { !manager.has_worker(&id).await }
        })
        .await;

        let done = fx.manager.get_queue(&queue.id).await.unwrap();
        assert_eq!(done.status, QueueStatus::Completed);
        assert_eq!(done.tasks[0].result.as_deref(), Some("done: scan a"));
        assert_eq!(done.tasks[1].result.as_deref(), Some("done: scan b"));
        assert!(done.tasks.iter().all(|t| t.conversation_id.is_some()));
        assert_ne!(done.tasks[0].conversation_id, done.tasks[1].conversation_id);

        // Each task starts a clean conversation.
        for request in fx.llm.requests().await {
            assert_eq!(request.len(), 2);
        }
    }

    #[tokio::test]
    async fn cancel_while_second_task_runs() {
        let fx = fixture();
        let queue = fx
            .manager
            .create_queue("audit", "", &messages(&["one", "two", "three"]))
            .await
            .unwrap();
        fx.llm.release(1);
        fx.manager.start_queue(&queue.id).await.unwrap();

        let llm = fx.llm.clone();
        wait_until(|| {
            let llm = llm.clone();
            async move { llm.requests().await.len() == 2 }
        })
        .await;
        fx.manager.cancel_queue(&queue.id).await.expect("cancelled");

        let (manager, id) = (fx.manager.clone(), queue.id.clone());
        wait_until(|| {
            let (manager, id) = (manager.clone(), id.clone());
            async move { !manager.has_worker(&id).await }
        })
        .await;

        let queue = fx.manager.get_queue(&queue.id).await.unwrap();
        assert_eq!(queue.status, QueueStatus::Cancelled);
        assert_eq!(
            queue.tasks.iter().map(|t| t.status).collect::<Vec<_>>(),
            vec![BatchTaskStatus::Completed, BatchTaskStatus::Cancelled, BatchTaskStatus::Pending]
        );
        assert!(queue.tasks[1].cancel.is_none());
    }

    #[tokio::test]
    async fn pause_lets_the_running_task_finish_and_resume_continues() {
        let fx = fixture();
        let queue = fx
            .manager
            .create_queue("audit", "", &messages(&["one", "two", "three"]))
            .await
            .unwrap();
        fx.llm.release(1);
        fx.manager.start_queue(&queue.id).await.unwrap();

        let llm = fx.llm.clone();
        wait_until(|| {
            let llm = llm.clone();
            async move { llm.requests().await.len() == 2 }
        })
        .await;
        fx.manager.pause_queue(&queue.id).await.expect("paused");
        fx.llm.release(1);

        let (manager, id) = (fx.manager.clone(), queue.id.clone());
        wait_until(|| {
            let (manager, id) = (manager.clone(), id.clone());
            async move { !manager.has_worker(&id).await }
        })
        .await;

        assert_eq!(fx.manager.get_queue(&queue.id).await.unwrap().status, QueueStatus::Paused);
        assert_eq!(
            task_statuses(&fx.manager, &queue.id).await,
            vec![BatchTaskStatus::Completed, BatchTaskStatus::Completed, BatchTaskStatus::Pending]
        );

        fx.llm.release(1);
        fx.manager.start_queue(&queue.id).await.expect("resumed");
        wait_until(|| {
            let (manager, id) = (manager.clone(), id.clone());
            async move { !manager.has_worker(&id).await }
        })
        .await;

        let requests = fx.llm.requests().await;
        assert_eq!(requests.len(), 3);
        assert_eq!(requests[2].last().unwrap().text_content(), "three");
        assert_eq!(fx.manager.get_queue(&queue.id).await.unwrap().status, QueueStatus::Completed);
    }

    #[tokio::test]
    async fn starting_a_running_queue_is_rejected() {
        let fx = fixture();
        let queue = fx.manager.create_queue("audit", "", &messages(&["one"])).await.unwrap();
        fx.manager.start_queue(&queue.id).await.unwrap();
        let err = fx.manager.start_queue(&queue.id).await.unwrap_err();
        assert_eq!(err, BatchError::AlreadyRunning(queue.id.clone()));
        fx.manager.cancel_queue(&queue.id).await.unwrap();
    }

    #[tokio::test]
    async fn only_pending_tasks_can_be_edited() {
        let fx = fixture();
        let queue = fx
            .manager
            .create_queue("audit", "", &messages(&["one", "two"]))
            .await
            .unwrap();
        fx.manager.start_queue(&queue.id).await.unwrap();

        let llm = fx.llm.clone();
        wait_until(|| {
            let llm = llm.clone();
            async move { llm.requests().await.len() == 1 }
        })
        .await;

        let running = &queue.tasks[0].id;
        let pending = &queue.tasks[1].id;
        assert!(matches!(
            fx.manager.update_task_message(&queue.id, running, "changed").await,
            Err(BatchError::TaskNotPending { status: BatchTaskStatus::Running, .. })
        ));
        assert!(matches!(
            fx.manager.delete_task(&queue.id, running).await,
            Err(BatchError::TaskNotPending { .. })
        ));

        fx.manager.update_task_message(&queue.id, pending, "two, edited").await.expect("pending edit");
        let added = fx.manager.add_task(&queue.id, "three").await.expect("added while running");
        fx.manager.delete_task(&queue.id, &added.id).await.expect("pending delete");

        let current = fx.manager.get_queue(&queue.id).await.unwrap();
        assert_eq!(current.tasks.len(), 2);
        assert_eq!(current.tasks[1].message, "two, edited");

        fx.manager.cancel_queue(&queue.id).await.unwrap();
        assert!(matches!(
            fx.manager.add_task(&queue.id, "late").await,
            Err(BatchError::InvalidQueueState { status: QueueStatus::Cancelled, .. })
        ));
    }

    #[tokio::test]
    async fn delete_cancels_the_running_task() {
        let fx = fixture();
        let queue = fx.manager.create_queue("audit", "", &messages(&["one", "two"])).await.unwrap();
        fx.manager.start_queue(&queue.id).await.unwrap();

        let llm = fx.llm.clone();
        wait_until(|| {
            let llm = llm.clone();
            async move { llm.requests().await.len() == 1 }
        })
        .await;
        fx.manager.delete_queue(&queue.id).await.expect("deleted");

        let (manager, id) = (fx.manager.clone(), queue.id.clone());
        wait_until(|| {
            let (manager, id) = (manager.clone(), id.clone());
            async move { !manager.has_worker(&id).await }
        })
        .await;
        assert!(fx.manager.get_queue(&queue.id).await.is_none());
        assert!(fx.store.load_batch_queues().await.unwrap().is_empty());
        assert_eq!(fx.llm.requests().await.len(), 1);
    }

    #[tokio::test]
    async fn list_filters_and_pages() {
        let fx = fixture();
        let alpha = fx.manager.create_queue("Alpha audit", "", &messages(&["a"])).await.unwrap();
        tokio::time::sleep(Duration::from_millis(2)).await;
        let beta = fx.manager.create_queue("beta sweep", "", &messages(&["b"])).await.unwrap();
        fx.manager.cancel_queue(&beta.id).await.unwrap();

        let all = fx.manager.list_queues(&QueueFilter::default()).await;
        assert_eq!(all.total, 2);
        assert_eq!(all.queues[0].id, beta.id);

        let cancelled = fx
            .manager
            .list_queues(&QueueFilter {
                status: Some(QueueStatus::Cancelled),
                ..QueueFilter::default()
            })
            .await;
        assert_eq!(cancelled.total, 1);

        let keyword = fx
            .manager
            .list_queues(&QueueFilter {
                keyword: Some("ALPHA".to_string()),
                ..QueueFilter::default()
            })
            .await;
        assert_eq!(keyword.queues.len(), 1);
        assert_eq!(keyword.queues[0].id, alpha.id);

        let page = fx
            .manager
            .list_queues(&QueueFilter {
                limit: 1,
                offset: 1,
                ..QueueFilter::default()
            })
            .await;
        assert_eq!(page.total, 2);
        assert_eq!(page.queues[0].id, alpha.id);
    }

    #[tokio::test]
    async fn restore_pauses_interrupted_queues() {
        let fx = fixture();
        let mut queue = BatchQueue {
            id: "q1".to_string(),
            title: "interrupted".to_string(),
            role: String::new(),
            status: QueueStatus::Running,
            tasks: vec![BatchTask::pending("one".to_string()), BatchTask::pending("two".to_string())],
            created_at: Utc::now(),
            started_at: Some(Utc::now()),
            completed_at: None,
        };
        queue.tasks[0].status = BatchTaskStatus::Running;
        fx.store.save_batch_queue(&queue).await.unwrap();

        assert_eq!(fx.manager.restore().await.unwrap(), 1);
        let restored = fx.manager.get_queue("q1").await.unwrap();
        assert_eq!(restored.status, QueueStatus::Paused);
        assert_eq!(
            task_statuses(&fx.manager, "q1").await,
            vec![BatchTaskStatus::Pending, BatchTaskStatus::Pending]
        );
        assert!(!fx.manager.has_worker("q1").await);
    }
}
