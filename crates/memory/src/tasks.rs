//! In-memory task store.

use async_trait::async_trait;
use chrono::Utc;
use conclave_core::error::StoreError;
use conclave_core::store::{StoreResult, TaskStore};
use conclave_core::task::{Task, TaskMode, TaskResult, TaskSource, TaskStatus};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Tasks keyed by id. Useful for tests and single-process deployments.
#[derive(Clone, Default)]
pub struct InMemoryTaskStore {
    tasks: Arc<RwLock<HashMap<Uuid, Task>>>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every task, oldest first. Handy in assertions.
    pub async fn all(&self) -> Vec<Task> {
        let mut tasks: Vec<Task> = self.tasks.read().await.values().cloned().collect();
        tasks.sort_by_key(|t| t.created_at);
        tasks
    }

    async fn modify(&self, id: Uuid, f: impl FnOnce(&mut Task)) -> StoreResult<()> {
        let mut tasks = self.tasks.write().await;
        let task = tasks
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found("task", id))?;
        f(task);
        task.updated_at = Utc::now();
        Ok(())
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn create(&self, task: Task) -> StoreResult<()> {
        let mut tasks = self.tasks.write().await;
        if tasks.contains_key(&task.id) {
            return Err(StoreError::Conflict(format!("task {} already exists", task.id)));
        }
        tasks.insert(task.id, task);
        Ok(())
    }

    async fn get(&self, id: Uuid) -> StoreResult<Option<Task>> {
        Ok(self.tasks.read().await.get(&id).cloned())
    }

    async fn update(&self, task: Task) -> StoreResult<()> {
        let id = task.id;
        self.modify(id, |t| *t = task).await
    }

    async fn update_mode_and_status(
        &self,
        id: Uuid,
        mode: TaskMode,
        status: TaskStatus,
    ) -> StoreResult<()> {
        self.modify(id, |t| {
            t.mode = mode;
            t.status = status;
        })
        .await
    }

    async fn update_status(&self, id: Uuid, status: TaskStatus) -> StoreResult<()> {
        self.modify(id, |t| {
            t.status = status;
            if status.is_terminal() {
                t.completed_at = Some(Utc::now());
            }
        })
        .await
    }

    async fn update_goal(&self, id: Uuid, goal: &str) -> StoreResult<()> {
        self.modify(id, |t| t.goal = goal.to_string()).await
    }

    async fn set_result(&self, id: Uuid, result: TaskResult) -> StoreResult<()> {
        self.modify(id, |t| {
            if t.status.is_terminal() {
                return;
            }
            t.result = Some(result);
            t.error = None;
            t.status = TaskStatus::Completed;
            t.completed_at = Some(Utc::now());
        })
        .await
    }

    async fn set_error(&self, id: Uuid, error: &str) -> StoreResult<()> {
        self.modify(id, |t| {
            if t.status.is_terminal() {
                return;
            }
            t.error = Some(error.to_string());
            t.status = TaskStatus::Failed;
            t.completed_at = Some(Utc::now());
        })
        .await
    }

    async fn set_daemon_id(&self, id: Uuid, daemon_id: Uuid) -> StoreResult<()> {
        self.modify(id, |t| t.daemon_id = Some(daemon_id)).await
    }

    async fn add_sub_task(&self, parent_id: Uuid, child_id: Uuid) -> StoreResult<()> {
        self.modify(parent_id, |t| {
            if !t.sub_task_ids.contains(&child_id) {
                t.sub_task_ids.push(child_id);
            }
        })
        .await
    }

    async fn recent_for_session(
        &self,
        session_id: Uuid,
        project_id: Option<Uuid>,
        limit: usize,
    ) -> StoreResult<Vec<Task>> {
        let tasks = self.tasks.read().await;
        let mut recent: Vec<Task> = tasks
            .values()
            .filter(|t| t.session_id == session_id && t.parent_task_id.is_none())
            .filter(|t| project_id.is_none() || t.project_id == project_id)
            .cloned()
            .collect();
        recent.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        recent.truncate(limit);
        Ok(recent)
    }

    async fn root_task_id(&self, id: Uuid) -> StoreResult<Uuid> {
        let tasks = self.tasks.read().await;
        let task = tasks.get(&id).ok_or_else(|| StoreError::not_found("task", id))?;
        Ok(task.retry_of_task_id.unwrap_or(task.id))
    }

    async fn count_manual_retries(&self, root_id: Uuid) -> StoreResult<usize> {
        let tasks = self.tasks.read().await;
        Ok(tasks
            .values()
            .filter(|t| t.source == TaskSource::ManualRetry && t.retry_of_task_id == Some(root_id))
            .count())
    }
}
