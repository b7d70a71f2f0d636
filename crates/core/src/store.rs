//! Store traits: the persistence seams the orchestrator runs against.
//!
//! Every store is async and object safe so the orchestrator can hold them as
//! `Arc<dyn ...>`. Lookups return `Ok(None)` on a miss; writes against a
//! missing record return [`StoreError::NotFound`].

use async_trait::async_trait;
use std::sync::Arc;
use uuid::Uuid;

use crate::daemon::{Daemon, DaemonMessage, DaemonStatus, WorkingMemoryEntry};
use crate::engram::EngramEntry;
use crate::error::StoreError;
use crate::session::{Project, SavedDocument, Session, Skill};
use crate::task::{Task, TaskMode, TaskResult, TaskStatus};
use crate::template::{DaemonTemplate, TemplateLearning};

pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn create(&self, task: Task) -> StoreResult<()>;

    async fn get(&self, id: Uuid) -> StoreResult<Option<Task>>;

    /// Replace a task wholesale (follow-up reuse).
    async fn update(&self, task: Task) -> StoreResult<()>;

    async fn update_mode_and_status(
        &self,
        id: Uuid,
        mode: TaskMode,
        status: TaskStatus,
    ) -> StoreResult<()>;

    async fn update_status(&self, id: Uuid, status: TaskStatus) -> StoreResult<()>;

    async fn update_goal(&self, id: Uuid, goal: &str) -> StoreResult<()>;

    /// Mark completed with `result`. A cancelled task stays cancelled.
    async fn set_result(&self, id: Uuid, result: TaskResult) -> StoreResult<()>;

    /// Mark failed with `error`. No-op once the task is terminal.
    async fn set_error(&self, id: Uuid, error: &str) -> StoreResult<()>;

    async fn set_daemon_id(&self, id: Uuid, daemon_id: Uuid) -> StoreResult<()>;

    async fn add_sub_task(&self, parent_id: Uuid, child_id: Uuid) -> StoreResult<()>;

    /// Newest first. When `project_id` is set only that project's tasks count.
    async fn recent_for_session(
        &self,
        session_id: Uuid,
        project_id: Option<Uuid>,
        limit: usize,
    ) -> StoreResult<Vec<Task>>;

    /// The task a retry chain started from (`retry_of_task_id`, else itself).
    async fn root_task_id(&self, id: Uuid) -> StoreResult<Uuid>;

    /// Manual retries already created against `root_id`.
    async fn count_manual_retries(&self, root_id: Uuid) -> StoreResult<usize>;
}

#[async_trait]
pub trait DaemonStore: Send + Sync {
    async fn create(&self, daemon: Daemon) -> StoreResult<()>;

    async fn get(&self, id: Uuid) -> StoreResult<Option<Daemon>>;

    async fn update_status(
        &self,
        id: Uuid,
        status: DaemonStatus,
        current_action: &str,
        progress: f64,
    ) -> StoreResult<()>;

    async fn set_iterations(&self, id: Uuid, iterations: usize) -> StoreResult<()>;

    async fn add_working_memory(&self, id: Uuid, entry: WorkingMemoryEntry) -> StoreResult<()>;

    async fn append_messages(&self, id: Uuid, messages: Vec<DaemonMessage>) -> StoreResult<()>;

    /// Executing or waiting daemons owned by `user_id`.
    async fn active_for_user(&self, user_id: &str) -> StoreResult<Vec<Daemon>>;

    /// Fail every daemon still marked executing. Returns how many changed.
    async fn cleanup_stale(&self) -> StoreResult<usize>;
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn get_or_create(&self, user_id: &str) -> StoreResult<Session>;

    async fn get(&self, id: Uuid) -> StoreResult<Option<Session>>;

    async fn touch(&self, id: Uuid) -> StoreResult<()>;

    /// Also counts the task toward the session total.
    async fn add_active_task(&self, id: Uuid, task_id: Uuid) -> StoreResult<()>;

    async fn remove_active_task(&self, id: Uuid, task_id: Uuid) -> StoreResult<()>;

    /// Keeps only the newest [`crate::session::MAX_RECENT_TASKS`] ids.
    async fn add_recent_task(&self, id: Uuid, task_id: Uuid) -> StoreResult<()>;

    async fn remove_recent_task(&self, id: Uuid, task_id: Uuid) -> StoreResult<()>;

    async fn add_active_daemon(&self, id: Uuid, daemon_id: Uuid) -> StoreResult<()>;

    async fn remove_active_daemon(&self, id: Uuid, daemon_id: Uuid) -> StoreResult<()>;

    async fn increment_stats(&self, id: Uuid, success: bool) -> StoreResult<()>;
}

#[async_trait]
pub trait ProjectStore: Send + Sync {
    async fn get(&self, id: Uuid) -> StoreResult<Option<Project>>;

    /// Oldest first.
    async fn list_for_user(&self, user_id: &str) -> StoreResult<Vec<Project>>;
}

#[async_trait]
pub trait TemplateStore: Send + Sync {
    /// System templates plus the user's own, active only.
    async fn list_for_user(&self, user_id: &str) -> StoreResult<Vec<DaemonTemplate>>;

    /// User templates shadow system templates with the same slug.
    async fn get_by_slug(&self, user_id: &str, slug: &str) -> StoreResult<Option<DaemonTemplate>>;

    async fn increment_stats(
        &self,
        user_id: &str,
        slug: &str,
        success: bool,
        iterations: usize,
    ) -> StoreResult<()>;

    /// Reinforces an existing learning with the same key, else appends.
    async fn add_learning(
        &self,
        user_id: &str,
        slug: &str,
        learning: TemplateLearning,
    ) -> StoreResult<()>;
}

#[async_trait]
pub trait EngramStore: Send + Sync {
    async fn write(&self, entry: EngramEntry) -> StoreResult<()>;

    /// Newest first.
    async fn recent(&self, session_id: Uuid, limit: usize) -> StoreResult<Vec<EngramEntry>>;
}

#[async_trait]
pub trait SaveStore: Send + Sync {
    /// Documents owned by `user_id`, in the order requested. Unknown ids are skipped.
    async fn get_many(&self, user_id: &str, ids: &[Uuid]) -> StoreResult<Vec<SavedDocument>>;
}

#[async_trait]
pub trait SkillCatalog: Send + Sync {
    /// Known skills among `ids`, in the order requested.
    async fn get_many(&self, ids: &[String]) -> StoreResult<Vec<Skill>>;

    /// Skill ids that match the message.
    async fn route(&self, message: &str) -> StoreResult<Vec<String>>;
}

/// Every store the orchestrator needs, bundled for construction.
#[derive(Clone)]
pub struct Stores {
    pub tasks: Arc<dyn TaskStore>,
    pub daemons: Arc<dyn DaemonStore>,
    pub sessions: Arc<dyn SessionStore>,
    pub projects: Arc<dyn ProjectStore>,
    pub templates: Arc<dyn TemplateStore>,
    pub engrams: Arc<dyn EngramStore>,
    pub saves: Arc<dyn SaveStore>,
    pub skills: Arc<dyn SkillCatalog>,
}
