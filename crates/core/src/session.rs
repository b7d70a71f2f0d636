//! Sessions and the user-owned context that shapes a request: projects,
//! saved reference documents and skills.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Recent task ids kept per session.
pub const MAX_RECENT_TASKS: usize = 20;

/// Persistent per-user session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub user_id: String,

    #[serde(default)]
    pub recent_task_ids: Vec<Uuid>,
    #[serde(default)]
    pub context_summary: String,

    #[serde(default)]
    pub active_daemon_ids: Vec<Uuid>,
    #[serde(default)]
    pub active_task_ids: Vec<Uuid>,

    #[serde(default)]
    pub pinned_skill_ids: Vec<String>,

    #[serde(default)]
    pub model_id: String,

    #[serde(default)]
    pub total_tasks: u64,
    #[serde(default)]
    pub completed_tasks: u64,
    #[serde(default)]
    pub failed_tasks: u64,

    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
}

impl Session {
    pub fn new(user_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            recent_task_ids: Vec::new(),
            context_summary: String::new(),
            active_daemon_ids: Vec::new(),
            active_task_ids: Vec::new(),
            pinned_skill_ids: Vec::new(),
            model_id: String::new(),
            total_tasks: 0,
            completed_tasks: 0,
            failed_tasks: 0,
            created_at: now,
            last_activity_at: now,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: Uuid,
    pub user_id: String,
    pub name: String,
    /// Extra instructions appended to every prompt in this project.
    #[serde(default)]
    pub system_instruction: String,
}

/// A saved item the user attaches as reference context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SavedDocument {
    pub id: Uuid,
    pub user_id: String,
    pub title: String,
    pub content: String,
}

/// A behavior pack: extra system prompt plus tools it needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Skill {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub system_prompt: String,
    #[serde(default)]
    pub required_tools: Vec<String>,
    /// Lowercase keywords that route a message to this skill.
    #[serde(default)]
    pub keywords: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_session_starts_empty() {
        let s = Session::new("u1");
        assert_eq!(s.user_id, "u1");
        assert!(s.active_task_ids.is_empty());
        assert_eq!(s.total_tasks, 0);
    }

    #[test]
    fn skill_defaults_missing_lists() {
        let skill: Skill = serde_json::from_str(r#"{"id":"s1","name":"Writer"}"#).unwrap();
        assert!(skill.required_tools.is_empty());
        assert!(skill.keywords.is_empty());
    }
}
