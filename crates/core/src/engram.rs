//! Engram: long-term knowledge written as work completes and read back
//! into later prompts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngramKind {
    TaskResult,
    DaemonOutput,
    UserFact,
    StatusLog,
}

impl EngramKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EngramKind::TaskResult => "task_result",
            EngramKind::DaemonOutput => "daemon_output",
            EngramKind::UserFact => "user_fact",
            EngramKind::StatusLog => "status_log",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngramEntry {
    pub id: Uuid,
    pub session_id: Uuid,
    pub user_id: String,
    pub kind: EngramKind,
    /// e.g. `daemon_1_researcher`, `quick_<task id>`
    pub key: String,
    pub value: String,
    /// One-line summary for quick context loading.
    pub summary: String,
    /// Who wrote it: `orchestrator`, `daemon_<label>`, ...
    pub source: String,
    pub created_at: DateTime<Utc>,
}

impl EngramEntry {
    pub fn new(
        session_id: Uuid,
        user_id: impl Into<String>,
        kind: EngramKind,
        key: impl Into<String>,
        value: impl Into<String>,
        source: impl Into<String>,
    ) -> Self {
        let value = value.into();
        Self {
            id: Uuid::new_v4(),
            session_id,
            user_id: user_id.into(),
            kind,
            key: key.into(),
            summary: crate::text::truncate(&value, 200),
            value,
            source: source.into(),
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_is_truncated_value() {
        let long = "x".repeat(500);
        let entry = EngramEntry::new(
            Uuid::new_v4(),
            "u",
            EngramKind::DaemonOutput,
            "daemon_0_researcher",
            long,
            "daemon_Research Daemon",
        );
        assert_eq!(entry.summary.len(), 200);
        assert!(entry.summary.ends_with("..."));
        assert_eq!(entry.value.len(), 500);
    }
}
