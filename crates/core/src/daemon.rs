//! Daemons (autonomous agent instances bound to a task) and the
//! updates they report to its supervisor.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::message::MessageToolCall;
use crate::task::Artifact;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DaemonStatus {
    Idle,
    Executing,
    WaitingInput,
    Completed,
    Failed,
}

impl DaemonStatus {
    pub fn is_active(self) -> bool {
        matches!(self, DaemonStatus::Executing | DaemonStatus::WaitingInput)
    }
}

/// An intermediate result kept in a daemon's working memory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkingMemoryEntry {
    pub key: String,
    pub value: String,
    /// One-line summary for context injection.
    pub summary: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonToolResult {
    pub tool_call_id: String,
    pub content: String,
    #[serde(default)]
    pub is_error: bool,
}

/// A persisted transcript entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonMessage {
    pub role: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call: Option<MessageToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_result: Option<DaemonToolResult>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Daemon {
    pub id: Uuid,
    pub session_id: Uuid,
    pub user_id: String,
    pub task_id: Uuid,

    pub role: String,
    pub role_label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_slug: Option<String>,
    pub persona: String,
    pub assigned_tools: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub assigned_skill_ids: Vec<String>,

    pub plan_index: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<usize>,
    /// Predecessor label to summary, injected before launch.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub dependency_results: BTreeMap<String, String>,

    pub status: DaemonStatus,
    #[serde(default)]
    pub current_action: String,
    /// 0.0 to 1.0
    #[serde(default)]
    pub progress: f64,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub working_memory: Vec<WorkingMemoryEntry>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub messages: Vec<DaemonMessage>,

    #[serde(default)]
    pub model_id: String,

    #[serde(default)]
    pub iterations: usize,
    pub max_iterations: usize,
    #[serde(default)]
    pub retry_count: usize,
    pub max_retries: usize,

    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Daemon {
    /// An idle daemon for `task_id`. The current action starts as the task
    /// description so the runner can recover it before the first status write.
    pub fn new(
        session_id: Uuid,
        user_id: impl Into<String>,
        task_id: Uuid,
        role: impl Into<String>,
        task_summary: impl Into<String>,
    ) -> Self {
        let role = role.into();
        Self {
            id: Uuid::new_v4(),
            session_id,
            user_id: user_id.into(),
            task_id,
            role_label: String::new(),
            role,
            template_slug: None,
            persona: String::new(),
            assigned_tools: Vec::new(),
            assigned_skill_ids: Vec::new(),
            plan_index: 0,
            depends_on: Vec::new(),
            dependency_results: BTreeMap::new(),
            status: DaemonStatus::Idle,
            current_action: task_summary.into(),
            progress: 0.0,
            working_memory: Vec::new(),
            messages: Vec::new(),
            model_id: String::new(),
            iterations: 0,
            max_iterations: 25,
            retry_count: 0,
            max_retries: 3,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }
}

/// Final output of a completed daemon.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DaemonResult {
    pub summary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub artifacts: Vec<Artifact>,
}

/// What happened, as reported by a running daemon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UpdateKind {
    Status {
        status: String,
        current_action: String,
        progress: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    ToolCall {
        tool_name: String,
        current_action: String,
    },
    ToolResult {
        tool_name: String,
        tool_result: String,
    },
    Thinking {
        content: String,
    },
    Completed {
        result: DaemonResult,
    },
    Failed {
        error: String,
        can_retry: bool,
    },
    Question {
        content: String,
    },
}

/// Snapshot sent from a daemon runner to its supervisor. Never carries
/// ownership of the daemon's mutable state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DaemonUpdate {
    pub daemon_id: Uuid,
    pub index: usize,
    pub role: String,
    #[serde(flatten)]
    pub kind: UpdateKind,
}

impl DaemonUpdate {
    /// Event name used when the update is forwarded to subscribers.
    pub fn event_type(&self) -> &'static str {
        match self.kind {
            UpdateKind::Status { .. } => "daemon_status",
            UpdateKind::ToolCall { .. } => "daemon_tool_call",
            UpdateKind::ToolResult { .. } => "daemon_tool_result",
            UpdateKind::Thinking { .. } => "daemon_thinking",
            UpdateKind::Completed { .. } => "daemon_completed",
            UpdateKind::Failed { .. } => "daemon_failed",
            UpdateKind::Question { .. } => "daemon_question",
        }
    }

    /// `completed` and `failed` end the daemon's run.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.kind,
            UpdateKind::Completed { .. } | UpdateKind::Failed { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn update(kind: UpdateKind) -> DaemonUpdate {
        DaemonUpdate {
            daemon_id: Uuid::nil(),
            index: 1,
            role: "Research Daemon".into(),
            kind,
        }
    }

    #[test]
    fn update_serializes_with_flattened_type_tag() {
        let u = update(UpdateKind::Failed {
            error: "boom".into(),
            can_retry: true,
        });
        let json = serde_json::to_value(&u).unwrap();
        assert_eq!(json["type"], "failed");
        assert_eq!(json["index"], 1);
        assert_eq!(json["can_retry"], true);
    }

    #[test]
    fn event_types_map_each_kind() {
        assert_eq!(
            update(UpdateKind::Thinking { content: "x".into() }).event_type(),
            "daemon_thinking"
        );
        assert_eq!(
            update(UpdateKind::Completed {
                result: DaemonResult::default()
            })
            .event_type(),
            "daemon_completed"
        );
        assert_eq!(
            update(UpdateKind::Question { content: "?".into() }).event_type(),
            "daemon_question"
        );
    }

    #[test]
    fn only_completed_and_failed_are_terminal() {
        assert!(update(UpdateKind::Completed {
            result: DaemonResult::default()
        })
        .is_terminal());
        assert!(!update(UpdateKind::ToolCall {
            tool_name: "search".into(),
            current_action: "Using search...".into()
        })
        .is_terminal());
    }

    #[test]
    fn new_daemon_has_default_budgets() {
        let d = Daemon::new(Uuid::new_v4(), "u", Uuid::new_v4(), "coder", "write it");
        assert_eq!(d.max_iterations, 25);
        assert_eq!(d.max_retries, 3);
        assert_eq!(d.status, DaemonStatus::Idle);
        assert_eq!(d.current_action, "write it");
    }
}
