//! Request classification: template and mode overrides first, then one
//! standalone LLM call whose JSON answer is parsed leniently.

use conclave_agent::{ChatError, ChatService};
use conclave_core::daemon::Daemon;
use conclave_core::message::Message;
use conclave_core::plan::{ClassificationResult, DaemonPlan, Mode};
use conclave_core::store::TemplateStore;
use conclave_core::template::DaemonTemplate;
use conclave_core::text::truncate;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::json::extract_object;
use crate::prompts::classification_prompt;

/// Role given to plans built from a bare mode override.
pub const OVERRIDE_ROLE: &str = "assistant";

#[derive(Clone)]
pub struct Classifier {
    chat: ChatService,
    templates: Arc<dyn TemplateStore>,
}

impl Classifier {
    pub fn new(chat: ChatService, templates: Arc<dyn TemplateStore>) -> Self {
        Self { chat, templates }
    }

    /// One classification call. `history` already ends with the current
    /// message. Only a failed LLM call is an error; unparsable output
    /// degrades to quick mode.
    pub async fn classify(
        &self,
        user_id: &str,
        model: Option<&str>,
        history: Vec<Message>,
        active: &[Daemon],
    ) -> Result<ClassificationResult, ChatError> {
        let templates = match self.templates.list_for_user(user_id).await {
            Ok(templates) => templates,
            Err(e) => {
                warn!(user_id = %user_id, error = %e, "Template catalog unavailable for classification");
                Vec::new()
            }
        };
        let prompt = classification_prompt(active, &templates);

        let raw = self.chat.complete_sync(model, &prompt, history).await?;
        debug!(user_id = %user_id, raw = %truncate(&raw, 500), "Classification raw response");

        let result = parse_classification(&raw);
        info!(
            user_id = %user_id,
            mode = %result.mode,
            daemons = result.daemons.len(),
            "Request classified"
        );
        for plan in &result.daemons {
            debug!(
                index = plan.index,
                label = %plan.role_label,
                role = %plan.role,
                depends_on = ?plan.depends_on,
                summary = %truncate(&plan.task_summary, 200),
                "Planned daemon"
            );
        }
        Ok(result)
    }
}

#[derive(Deserialize)]
struct RawClassification {
    #[serde(default)]
    mode: String,
    #[serde(default)]
    daemons: Vec<DaemonPlan>,
}

/// Parse model output into a classification. Anything unparsable becomes
/// quick mode carrying the raw text as its reply.
pub fn parse_classification(raw: &str) -> ClassificationResult {
    let Some(json) = extract_object(raw) else {
        debug!("No JSON in classification, falling back to quick");
        return ClassificationResult::quick(Some(raw.to_string()));
    };
    let parsed: RawClassification = match serde_json::from_str(json) {
        Ok(parsed) => parsed,
        Err(e) => {
            debug!(error = %e, "Classification JSON invalid, falling back to quick");
            return ClassificationResult::quick(Some(raw.to_string()));
        }
    };

    let mut daemons = parsed.daemons;
    for (i, plan) in daemons.iter_mut().enumerate() {
        if plan.index == 0 && i > 0 {
            plan.index = i;
        }
        if plan.role_label.is_empty() {
            plan.role_label = format!("{} Daemon", title_case(&plan.role));
        }
    }

    let mode = if daemons.len() == 1 {
        Mode::Daemon
    } else {
        Mode::parse(&parsed.mode).unwrap_or_else(|| {
            warn!(mode = %parsed.mode, "Unknown classification mode, treating as quick");
            Mode::Quick
        })
    };
    ClassificationResult::with_plans(mode, daemons)
}

/// Uppercase the first character.
pub fn title_case(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// A single daemon plan built straight from a template.
pub fn template_plan(template: &DaemonTemplate, message: &str) -> ClassificationResult {
    let plan = DaemonPlan {
        index: 0,
        role: template.role.clone(),
        role_label: template.role_label.clone(),
        task_summary: message.to_string(),
        tools_needed: template.default_tools.clone(),
        template_slug: Some(template.slug.clone()),
        ..Default::default()
    };
    ClassificationResult::with_plans(Mode::Daemon, vec![plan])
}

/// Skeleton for an explicit mode override: one generalist plan carrying the
/// whole message.
pub fn override_plan(mode: Mode, message: &str) -> ClassificationResult {
    ClassificationResult::with_plans(mode, vec![skeleton_plan(message)])
}

pub fn skeleton_plan(message: &str) -> DaemonPlan {
    DaemonPlan {
        index: 0,
        role: OVERRIDE_ROLE.into(),
        role_label: format!("{} Daemon", title_case(OVERRIDE_ROLE)),
        task_summary: message.to_string(),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conclave_agent::test_helpers::{SequentialMockProvider, make_text_response, system_prompt};
    use conclave_core::error::ProviderError;
    use conclave_memory::InMemoryTemplateStore;
    use conclave_tools::ToolRouter;
    use uuid::Uuid;

    #[test]
    fn unparsable_output_becomes_quick_with_raw_reply() {
        let result = parse_classification("Hello! How can I help?");
        assert_eq!(result.mode, Mode::Quick);
        assert_eq!(result.reply.as_deref(), Some("Hello! How can I help?"));
        assert!(result.daemons.is_empty());

        let broken = parse_classification("{\"mode\": 7}");
        assert_eq!(broken.mode, Mode::Quick);
        assert_eq!(broken.reply.as_deref(), Some("{\"mode\": 7}"));
    }

    #[test]
    fn loose_json_in_prose_is_found() {
        let result = parse_classification("I think mode should be {\"mode\":\"status\"} - done");
        assert_eq!(result.mode, Mode::Status);
        assert!(result.reply.is_none());
    }

    #[test]
    fn fenced_multi_daemon_plan_is_post_processed() {
        let raw = r#"```json
{"mode": "MULTI_DAEMON", "daemons": [
  {"index": 0, "role": "researcher", "task_summary": "dig"},
  {"role": "writer", "role_label": "Report Writer", "task_summary": "write", "depends_on": [0]}
]}
```"#;
        let result = parse_classification(raw);
        assert_eq!(result.mode, Mode::MultiDaemon);
        assert_eq!(result.daemons[0].role_label, "Researcher Daemon");
        assert_eq!(result.daemons[1].index, 1);
        assert_eq!(result.daemons[1].role_label, "Report Writer");
        assert_eq!(result.daemons[1].depends_on, vec![0]);
    }

    #[test]
    fn single_plan_collapses_to_daemon_mode() {
        let raw = r#"{"mode": "multi_daemon", "daemons": [{"role": "coder", "task_summary": "fix it"}]}"#;
        let result = parse_classification(raw);
        assert_eq!(result.mode, Mode::Daemon);
        assert_eq!(result.daemons[0].role_label, "Coder Daemon");
    }

    #[test]
    fn unknown_mode_is_quick() {
        let result = parse_classification(r#"{"mode": "parallel"}"#);
        assert_eq!(result.mode, Mode::Quick);
        assert!(result.reply.is_none());
    }

    #[test]
    fn title_case_handles_edges() {
        assert_eq!(title_case("researcher"), "Researcher");
        assert_eq!(title_case(""), "");
        assert_eq!(title_case("élan"), "Élan");
    }

    #[test]
    fn override_builds_skeleton() {
        let result = override_plan(Mode::MultiDaemon, "plan my week");
        assert_eq!(result.mode, Mode::MultiDaemon);
        assert_eq!(result.daemons.len(), 1);
        assert_eq!(result.daemons[0].role, "assistant");
        assert_eq!(result.daemons[0].role_label, "Assistant Daemon");
        assert_eq!(result.daemons[0].task_summary, "plan my week");
    }

    fn chat(provider: Arc<SequentialMockProvider>) -> ChatService {
        let registry = Arc::new(conclave_core::tool::ToolRegistry::new());
        ChatService::new(provider, Arc::new(ToolRouter::new(registry)), "test-model")
    }

    #[tokio::test]
    async fn classify_sends_standalone_prompt_with_history() {
        let provider = Arc::new(SequentialMockProvider::new(vec![make_text_response(
            r#"{"mode":"quick"}"#,
        )]));
        let templates = InMemoryTemplateStore::new();
        let classifier = Classifier::new(chat(provider.clone()), Arc::new(templates));

        let history = vec![
            Message::user("earlier question"),
            Message::assistant("earlier answer"),
            Message::user("hello"),
        ];
        let result = classifier.classify("u1", None, history, &[]).await.unwrap();
        assert_eq!(result.mode, Mode::Quick);

        let request = &provider.requests()[0];
        assert!(system_prompt(request).starts_with("You are a task classifier."));
        assert_eq!(request.messages.len(), 4);
        assert_eq!(request.messages[3].content, "hello");
    }

    #[tokio::test]
    async fn classify_surfaces_llm_errors() {
        let provider = Arc::new(SequentialMockProvider::scripted(vec![Err(
            ProviderError::Network("down".into()),
        )]));
        let classifier = Classifier::new(chat(provider), Arc::new(InMemoryTemplateStore::new()));
        let err = classifier
            .classify("u1", None, vec![Message::user("hi")], &[])
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::Provider(_)));
    }

    #[test]
    fn template_plan_carries_slug_and_tools() {
        let template: DaemonTemplate = serde_json::from_value(serde_json::json!({
            "id": Uuid::nil(),
            "name": "Researcher",
            "slug": "deep-research",
            "role": "researcher",
            "role_label": "Research Daemon",
            "default_tools": ["bash"]
        }))
        .unwrap();
        let result = template_plan(&template, "look into it");
        assert_eq!(result.mode, Mode::Daemon);
        let plan = &result.daemons[0];
        assert_eq!(plan.template_slug.as_deref(), Some("deep-research"));
        assert_eq!(plan.tools_needed, vec!["bash"]);
        assert_eq!(plan.task_summary, "look into it");
    }
}
