//! Task: the user-visible unit of work.
//!
//! A task is created `pending` when a message arrives, moves to `executing`
//! once a mode is chosen, and terminates exactly once as completed, failed
//! or cancelled.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Executing,
    WaitingInput,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Executing => "executing",
            TaskStatus::WaitingInput => "waiting_input",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Dispatch strategy recorded on the task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskMode {
    PendingClassification,
    Quick,
    Daemon,
    MultiDaemon,
}

/// What created the task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskSource {
    User,
    Decomposition,
    AutoRetry,
    ManualRetry,
    Routine,
}

/// A produced artifact (file, image, code, link).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub kind: String,
    pub name: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

/// Output of a completed task.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub summary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub artifacts: Vec<Artifact>,
}

impl TaskResult {
    pub fn summary(summary: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub session_id: Uuid,
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_task_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<Uuid>,

    pub prompt: String,
    pub goal: String,
    pub source: TaskSource,

    pub mode: TaskMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub daemon_id: Option<Uuid>,

    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<TaskResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sub_task_ids: Vec<Uuid>,

    #[serde(default)]
    pub model_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub routine_id: Option<Uuid>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_of_task_id: Option<Uuid>,
    #[serde(default)]
    pub manual_retry_count: usize,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    /// A fresh pending task awaiting classification.
    pub fn new(session_id: Uuid, user_id: impl Into<String>, prompt: impl Into<String>) -> Self {
        let prompt = prompt.into();
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            session_id,
            user_id: user_id.into(),
            parent_task_id: None,
            project_id: None,
            goal: prompt.clone(),
            prompt,
            source: TaskSource::User,
            mode: TaskMode::PendingClassification,
            daemon_id: None,
            status: TaskStatus::Pending,
            result: None,
            error: None,
            sub_task_ids: Vec::new(),
            model_id: String::new(),
            routine_id: None,
            retry_of_task_id: None,
            manual_retry_count: 0,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    pub fn with_source(mut self, source: TaskSource) -> Self {
        self.source = source;
        self
    }

    pub fn is_routine(&self) -> bool {
        self.source == TaskSource::Routine
    }

    /// Summary of the result, if one was recorded.
    pub fn summary(&self) -> Option<&str> {
        self.result
            .as_ref()
            .map(|r| r.summary.as_str())
            .filter(|s| !s.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_task_is_pending_classification() {
        let task = Task::new(Uuid::new_v4(), "u1", "research rust");
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.mode, TaskMode::PendingClassification);
        assert_eq!(task.goal, "research rust");
        assert_eq!(task.source, TaskSource::User);
    }

    #[test]
    fn terminal_statuses() {
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(TaskStatus::Cancelled.is_terminal());
        assert!(!TaskStatus::Executing.is_terminal());
        assert!(!TaskStatus::WaitingInput.is_terminal());
        assert!(!TaskStatus::Pending.is_terminal());
    }

    #[test]
    fn mode_and_source_serialize_snake_case() {
        assert_eq!(
            serde_json::to_string(&TaskMode::MultiDaemon).unwrap(),
            "\"multi_daemon\""
        );
        assert_eq!(
            serde_json::to_string(&TaskSource::ManualRetry).unwrap(),
            "\"manual_retry\""
        );
    }

    #[test]
    fn empty_summary_reads_as_none() {
        let mut task = Task::new(Uuid::new_v4(), "u1", "x");
        task.result = Some(TaskResult::summary(""));
        assert!(task.summary().is_none());
        task.result = Some(TaskResult::summary("done"));
        assert_eq!(task.summary(), Some("done"));
    }
}
