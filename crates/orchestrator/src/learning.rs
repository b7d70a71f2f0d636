//! Template statistics and background learning extraction.
//!
//! After a daemon terminates, the template it ran as (explicit slug, else its
//! role) records the outcome. Runs with enough tool activity are then mined
//! for reusable learnings in a detached task.

use chrono::Utc;
use conclave_agent::ChatService;
use conclave_core::daemon::{Daemon, DaemonMessage};
use conclave_core::message::Message;
use conclave_core::store::{DaemonStore, TemplateStore};
use conclave_core::template::{DaemonTemplate, TemplateLearning};
use conclave_core::text::truncate;
use futures::FutureExt;
use serde::Deserialize;
use std::fmt::Write;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::json::extract_array_or_object;

/// Runs with fewer tool calls teach nothing worth keeping.
pub const MIN_TOOL_CALLS: usize = 3;

const ARGS_CAP: usize = 200;
const RESULT_CAP: usize = 300;
const LOG_CAP: usize = 6_000;
const TASK_CAP: usize = 500;

const CATEGORIES: &[&str] = &["tool_usage", "workflow", "output", "constraint"];

const EXTRACTOR_SYSTEM: &str =
    "You are an AI learning extractor. Respond with ONLY valid JSON. No markdown code blocks.";

#[derive(Clone)]
pub struct LearningExtractor {
    chat: ChatService,
    daemons: Arc<dyn DaemonStore>,
    templates: Arc<dyn TemplateStore>,
}

impl LearningExtractor {
    pub fn new(chat: ChatService, daemons: Arc<dyn DaemonStore>, templates: Arc<dyn TemplateStore>) -> Self {
        Self {
            chat,
            daemons,
            templates,
        }
    }

    /// The daemon and the template it ran as, when both exist.
    async fn resolve(&self, user_id: &str, daemon_id: Uuid) -> Option<(Daemon, DaemonTemplate)> {
        let daemon = match self.daemons.get(daemon_id).await {
            Ok(Some(daemon)) => daemon,
            Ok(None) => return None,
            Err(e) => {
                warn!(daemon_id = %daemon_id, error = %e, "Daemon lookup failed");
                return None;
            }
        };
        let slug = daemon.template_slug.clone().unwrap_or_else(|| daemon.role.clone());
        match self.templates.get_by_slug(user_id, &slug).await {
            Ok(Some(template)) => Some((daemon, template)),
            Ok(None) => {
                debug!(slug = %slug, "No template for daemon");
                None
            }
            Err(e) => {
                warn!(slug = %slug, error = %e, "Template lookup failed");
                None
            }
        }
    }

    /// Count one run against the daemon's template. Inline and cheap.
    pub async fn record_stats(&self, user_id: &str, daemon_id: Uuid, success: bool) {
        let Some((daemon, template)) = self.resolve(user_id, daemon_id).await else {
            return;
        };
        info!(
            template = %template.slug,
            success,
            iterations = daemon.iterations,
            "Recording template stats"
        );
        if let Err(e) = self
            .templates
            .increment_stats(user_id, &template.slug, success, daemon.iterations)
            .await
        {
            warn!(template = %template.slug, error = %e, "Failed to record template stats");
        }
    }

    /// Extract learnings in the background. Panics are logged and dropped.
    pub fn spawn(&self, user_id: &str, model: Option<&str>, daemon_id: Uuid) {
        let extractor = self.clone();
        let user_id = user_id.to_string();
        let model = model.map(str::to_string);
        tokio::spawn(async move {
            let run = extractor.extract(&user_id, model.as_deref(), daemon_id);
            if AssertUnwindSafe(run).catch_unwind().await.is_err() {
                warn!(daemon_id = %daemon_id, "Learning extraction panicked");
            }
        });
    }

    /// One extraction pass. Returns how many learnings were stored.
    pub async fn extract(&self, user_id: &str, model: Option<&str>, daemon_id: Uuid) -> usize {
        let Some((daemon, template)) = self.resolve(user_id, daemon_id).await else {
            return 0;
        };

        let log = ToolLog::from_messages(&daemon.messages);
        if log.calls < MIN_TOOL_CALLS {
            debug!(template = %template.slug, calls = log.calls, "Too few tool calls to learn from");
            return 0;
        }
        info!(template = %template.slug, calls = log.calls, "Extracting template learnings");

        let prompt = extraction_prompt(&daemon, &template, &log);
        let raw = match self
            .chat
            .complete_sync(model, EXTRACTOR_SYSTEM, vec![Message::user(prompt)])
            .await
        {
            Ok(raw) => raw,
            Err(e) => {
                warn!(template = %template.slug, error = %e, "Learning extraction call failed");
                return 0;
            }
        };

        let mut added = 0;
        for learning in parse_learnings(&raw) {
            let key = learning.key.clone();
            match self.templates.add_learning(user_id, &template.slug, learning).await {
                Ok(()) => added += 1,
                Err(e) => warn!(template = %template.slug, key = %key, error = %e, "Failed to add learning"),
            }
        }
        if added > 0 {
            info!(template = %template.slug, added, "Stored template learnings");
        }
        added
    }
}

/// Compact record of a daemon's tool calls and their outcomes.
#[derive(Debug, Default)]
pub struct ToolLog {
    pub text: String,
    pub calls: usize,
}

impl ToolLog {
    pub fn from_messages(messages: &[DaemonMessage]) -> Self {
        let mut log = ToolLog::default();
        for m in messages {
            if let Some(call) = &m.tool_call {
                log.calls += 1;
                let _ = writeln!(
                    log.text,
                    "CALL {}: {}({})",
                    log.calls,
                    call.name,
                    truncate(&call.arguments, ARGS_CAP + 3)
                );
            }
            if let Some(result) = &m.tool_result {
                let status = if result.is_error { "ERROR" } else { "OK" };
                let _ = writeln!(log.text, "  -> {status}: {}", truncate(&result.content, RESULT_CAP + 3));
            }
        }
        log
    }
}

fn extraction_prompt(daemon: &Daemon, template: &DaemonTemplate, log: &ToolLog) -> String {
    let task = daemon
        .messages
        .iter()
        .find(|m| m.role == "user" && !m.content.is_empty())
        .map(|m| truncate(&m.content, TASK_CAP + 3))
        .unwrap_or_default();

    let mut existing = String::new();
    if !template.learnings.is_empty() {
        existing.push_str("\n\nEXISTING LEARNINGS (do not repeat these):");
        for l in &template.learnings {
            let _ = write!(existing, "\n- [{}] {} (confidence: {:.1})", l.category, l.content, l.confidence);
        }
    }

    format!(
        r#"Analyze this daemon execution and extract reusable learnings.

DAEMON ROLE: {} ({})
TASK: {task}
ITERATIONS: {}
TOOL CALLS: {}
{existing}
TOOL EXECUTION LOG:
{}

Extract 1-5 concise, actionable learnings from this execution. Focus on:
- Tool usage patterns that worked well or failed
- Workflow strategies that were effective
- Constraints or gotchas discovered
- Output patterns that should be repeated

Respond with ONLY a JSON array:
[{{"key": "short_snake_case_key", "content": "The learning in 1-2 sentences", "category": "tool_usage|workflow|output|constraint", "confidence": 0.5-1.0}}]

If nothing useful to learn, respond with: []"#,
        daemon.role,
        daemon.role_label,
        daemon.iterations,
        log.calls,
        truncate(&log.text, LOG_CAP)
    )
}

#[derive(Debug, Deserialize)]
struct RawLearning {
    #[serde(default)]
    key: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    category: String,
    #[serde(default)]
    confidence: f64,
}

/// Learnings from model output: a bare array, an object wrapping an array,
/// or one object. Entries missing a key or content are dropped; confidence
/// outside 0.3..=1.0 becomes 0.5 and unknown categories become `workflow`.
pub fn parse_learnings(raw: &str) -> Vec<TemplateLearning> {
    let Some(json) = extract_array_or_object(raw) else {
        return Vec::new();
    };
    let Ok(value) = serde_json::from_str::<serde_json::Value>(json) else {
        debug!("Learning output is not JSON");
        return Vec::new();
    };

    let entries: Vec<serde_json::Value> = match value {
        serde_json::Value::Array(items) => items,
        serde_json::Value::Object(map) => match map.values().find_map(|v| v.as_array()) {
            Some(items) => items.clone(),
            None => vec![serde_json::Value::Object(map)],
        },
        _ => Vec::new(),
    };

    let now = Utc::now();
    entries
        .into_iter()
        .filter_map(|v| serde_json::from_value::<RawLearning>(v).ok())
        .filter(|l| !l.key.is_empty() && !l.content.is_empty())
        .map(|l| TemplateLearning {
            confidence: if (0.3..=1.0).contains(&l.confidence) {
                l.confidence
            } else {
                0.5
            },
            category: if CATEGORIES.contains(&l.category.as_str()) {
                l.category
            } else {
                "workflow".into()
            },
            key: l.key,
            content: l.content,
            reinforced_count: 1,
            created_at: now,
            last_seen_at: now,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use conclave_agent::test_helpers::{FnProvider, make_text_response};
    use conclave_core::daemon::DaemonToolResult;
    use conclave_core::message::MessageToolCall;
    use conclave_memory::{InMemoryDaemonStore, InMemoryTemplateStore};
    use conclave_tools::ToolRouter;

    fn call(name: &str, args: &str) -> DaemonMessage {
        DaemonMessage {
            role: "assistant".into(),
            content: String::new(),
            tool_call: Some(MessageToolCall {
                id: format!("call_{name}"),
                name: name.into(),
                arguments: args.into(),
            }),
            tool_result: None,
            timestamp: Utc::now(),
        }
    }

    fn result(content: &str, is_error: bool) -> DaemonMessage {
        DaemonMessage {
            role: "tool".into(),
            content: content.into(),
            tool_call: None,
            tool_result: Some(DaemonToolResult {
                tool_call_id: "c".into(),
                content: content.into(),
                is_error,
            }),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn tool_log_caps_arguments_and_results() {
        let messages = vec![
            call("bash", &"a".repeat(400)),
            result(&"r".repeat(1_000), false),
            call("read_file", "{}"),
            result("permission failed", true),
        ];
        let log = ToolLog::from_messages(&messages);
        assert_eq!(log.calls, 2);
        assert!(log.text.contains(&format!("CALL 1: bash({}...)", "a".repeat(200))));
        assert!(log.text.contains(&format!("  -> OK: {}...\n", "r".repeat(300))));
        assert!(log.text.contains("CALL 2: read_file({})"));
        assert!(log.text.contains("  -> ERROR: permission failed"));
    }

    #[test]
    fn parses_arrays_wrappers_and_single_objects() {
        let array = parse_learnings(
            r#"[{"key":"use_grep","content":"Grep before reading.","category":"tool_usage","confidence":0.9},
                {"key":"b","content":"Second.","category":"output","confidence":0.6}]"#,
        );
        assert_eq!(array.len(), 2);
        assert_eq!(array[1].category, "output");

        let wrapped = parse_learnings(r#"{"learnings": [{"key":"k","content":"c","category":"workflow","confidence":0.7}]}"#);
        assert_eq!(wrapped.len(), 1);
        assert_eq!(wrapped[0].key, "k");

        let single = parse_learnings(r#"```json
{"key":"solo","content":"Only one.","category":"constraint","confidence":0.8}
```"#);
        assert_eq!(single.len(), 1);
        assert_eq!(single[0].key, "solo");

        assert!(parse_learnings("[]").is_empty());
        assert!(parse_learnings("nothing to learn").is_empty());
    }

    #[test]
    fn normalizes_confidence_and_category() {
        let learnings = parse_learnings(
            r#"[{"key":"a","content":"x","category":"vibes","confidence":0.1},
                {"key":"b","content":"y","category":"workflow","confidence":1.5},
                {"key":"","content":"dropped"},
                {"key":"c","content":""}]"#,
        );
        assert_eq!(learnings.len(), 2);
        assert_eq!(learnings[0].category, "workflow");
        assert_eq!(learnings[0].confidence, 0.5);
        assert_eq!(learnings[1].confidence, 0.5);
    }

    fn template(slug: &str) -> DaemonTemplate {
        serde_json::from_value(serde_json::json!({
            "id": Uuid::new_v4(),
            "name": "Researcher",
            "slug": slug,
            "role": "researcher",
            "role_label": "Research Daemon"
        }))
        .unwrap()
    }

    async fn fixture(
        respond: &'static str,
        messages: Vec<DaemonMessage>,
    ) -> (LearningExtractor, InMemoryTemplateStore, Arc<FnProvider>, Uuid) {
        let provider = Arc::new(FnProvider::new(move |_| Ok(make_text_response(respond))));
        let registry = Arc::new(conclave_core::tool::ToolRegistry::new());
        let chat = ChatService::new(provider.clone(), Arc::new(ToolRouter::new(registry)), "m");

        let daemons = InMemoryDaemonStore::new();
        let templates = InMemoryTemplateStore::new();
        templates.insert(template("researcher")).await;

        let mut daemon = Daemon::new(Uuid::new_v4(), "u1", Uuid::new_v4(), "researcher", "dig");
        daemon.iterations = 4;
        daemon.messages = messages;
        let id = daemon.id;
        daemons.create(daemon).await.unwrap();

        let extractor = LearningExtractor::new(chat, Arc::new(daemons), Arc::new(templates.clone()));
        (extractor, templates, provider, id)
    }

    #[tokio::test]
    async fn stats_fall_back_to_role_slug() {
        let (extractor, templates, _, id) = fixture("[]", vec![]).await;
        extractor.record_stats("u1", id, true).await;
        extractor.record_stats("u1", id, false).await;

        let stats = templates.get_by_slug("u1", "researcher").await.unwrap().unwrap().stats;
        assert_eq!(stats.total_runs, 2);
        assert_eq!(stats.successful_runs, 1);
        assert_eq!(stats.avg_iterations, 4.0);
    }

    #[tokio::test]
    async fn short_runs_skip_the_llm() {
        let (extractor, _, provider, id) =
            fixture("[]", vec![call("bash", "{}"), result("ok", false)]).await;
        assert_eq!(extractor.extract("u1", None, id).await, 0);
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test]
    async fn busy_runs_store_learnings() {
        let messages = (0..3).flat_map(|_| [call("bash", "{}"), result("ok", false)]).collect();
        let (extractor, templates, provider, id) = fixture(
            r#"[{"key":"batch_calls","content":"Batch shell commands.","category":"tool_usage","confidence":0.8}]"#,
            messages,
        )
        .await;

        assert_eq!(extractor.extract("u1", None, id).await, 1);
        assert_eq!(provider.call_count(), 1);
        let stored = templates.get_by_slug("u1", "researcher").await.unwrap().unwrap();
        assert_eq!(stored.learnings[0].key, "batch_calls");
    }
}
