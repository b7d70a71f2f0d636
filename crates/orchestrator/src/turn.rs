//! One request's resolved context, shared by every dispatch mode.

use conclave_agent::skills_section;
use conclave_core::daemon::Daemon;
use conclave_core::message::Message;
use conclave_core::session::{SavedDocument, Skill};
use conclave_core::task::Task;
use conclave_core::text::truncate;
use std::collections::HashSet;
use std::fmt::Write;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Reference documents attached to one message.
pub const MAX_SAVED_DOCUMENTS: usize = 10;
const SAVED_DOCUMENT_CAP: usize = 2_000;

/// Skills resolved for one message.
pub const MAX_SKILLS: usize = 10;

/// Earlier tasks replayed as conversation history.
pub const HISTORY_TASKS: usize = 5;

pub(crate) struct Turn {
    pub user_id: String,
    pub session_id: Uuid,
    /// The top-level task this request runs under.
    pub task: Task,
    /// Empty means the provider default.
    pub model: String,
    /// The user's message with any reference documents prepended.
    pub message: String,
    pub system_prompt: String,
    /// Oldest first, ending with `message`.
    pub history: Vec<Message>,
    pub active: Vec<Daemon>,
    pub project_instruction: Option<String>,
    pub skills: Vec<Skill>,
    /// Parent of every daemon token launched for this request.
    pub cancel: CancellationToken,
}

impl Turn {
    pub fn model(&self) -> Option<&str> {
        Some(self.model.as_str()).filter(|m| !m.is_empty())
    }

    pub fn skill_tools(&self) -> Vec<String> {
        skills_section(&self.skills).1
    }
}

/// Prefix `message` with a `## Reference Documents` section.
pub fn with_reference_documents(message: &str, docs: &[SavedDocument]) -> String {
    if docs.is_empty() {
        return message.to_string();
    }
    let mut s = String::from("## Reference Documents\n\n");
    for doc in docs.iter().take(MAX_SAVED_DOCUMENTS) {
        let _ = write!(s, "### {}\n{}\n\n", doc.title, truncate(&doc.content, SAVED_DOCUMENT_CAP));
    }
    s.push_str("---\n\n");
    s.push_str(message);
    s
}

/// Replay `recent` (newest first, as stores return it) oldest first, then
/// the current message. The current task itself is skipped.
pub fn history_messages(recent: &[Task], current_task_id: Uuid, message: &str) -> Vec<Message> {
    let earlier: Vec<&Task> = recent
        .iter()
        .filter(|t| t.id != current_task_id)
        .take(HISTORY_TASKS)
        .collect();

    let mut messages = Vec::with_capacity(earlier.len() * 2 + 1);
    for task in earlier.into_iter().rev() {
        messages.push(Message::user(&task.prompt));
        if let Some(summary) = task.summary() {
            messages.push(Message::assistant(summary));
        } else if let Some(error) = task.error.as_deref().filter(|e| !e.is_empty()) {
            messages.push(Message::assistant(format!("[Task failed: {error}]")));
        }
    }
    messages.push(Message::user(message));
    messages
}

/// Drop repeats, keeping first occurrences, and cap at [`MAX_SKILLS`].
pub fn dedupe(ids: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    ids.into_iter()
        .filter(|id| seen.insert(id.clone()))
        .take(MAX_SKILLS)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use conclave_core::message::Role;
    use conclave_core::task::TaskResult;

    fn doc(title: &str, content: &str) -> SavedDocument {
        SavedDocument {
            id: Uuid::new_v4(),
            user_id: "u1".into(),
            title: title.into(),
            content: content.into(),
        }
    }

    #[test]
    fn reference_documents_are_capped() {
        let long = "z".repeat(2_500);
        let message = with_reference_documents("summarize these", &[doc("Notes", "short"), doc("Big", &long)]);
        assert!(message.starts_with("## Reference Documents\n\n### Notes\nshort\n\n### Big\n"));
        assert!(message.contains(&format!("{}...\n\n", "z".repeat(1_997))));
        assert!(message.ends_with("---\n\nsummarize these"));

        let many: Vec<_> = (0..12).map(|i| doc(&format!("d{i}"), "x")).collect();
        let message = with_reference_documents("go", &many);
        assert!(message.contains("### d9\n"));
        assert!(!message.contains("### d10\n"));

        assert_eq!(with_reference_documents("plain", &[]), "plain");
    }

    #[test]
    fn history_is_oldest_first_and_skips_current() {
        let session = Uuid::new_v4();
        let mut done = Task::new(session, "u1", "first question");
        done.result = Some(TaskResult::summary("first answer"));
        let mut failed = Task::new(session, "u1", "second question");
        failed.error = Some("tool crashed".into());
        let current = Task::new(session, "u1", "current");

        // newest first
        let recent = vec![current.clone(), failed, done];
        let history = history_messages(&recent, current.id, "current");

        let contents: Vec<&str> = history.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(
            contents,
            vec![
                "first question",
                "first answer",
                "second question",
                "[Task failed: tool crashed]",
                "current"
            ]
        );
        assert_eq!(history[1].role, Role::Assistant);
        assert_eq!(history.last().unwrap().role, Role::User);
    }

    #[test]
    fn history_keeps_five_most_recent() {
        let session = Uuid::new_v4();
        let recent: Vec<Task> = (0..8).map(|i| Task::new(session, "u1", format!("q{i}"))).collect();
        let history = history_messages(&recent, Uuid::new_v4(), "now");
        assert_eq!(history.len(), 6);
        assert_eq!(history[0].content, "q4");
        assert_eq!(history[4].content, "q0");
    }

    #[test]
    fn dedupe_preserves_order_and_caps() {
        let ids = vec!["a", "b", "a", "c", "b"].into_iter().map(String::from).collect();
        assert_eq!(dedupe(ids), vec!["a", "b", "c"]);

        let many = (0..15).map(|i| format!("s{i}")).collect();
        assert_eq!(dedupe(many).len(), MAX_SKILLS);
    }
}
