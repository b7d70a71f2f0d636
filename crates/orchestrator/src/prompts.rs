//! Prompt text for every orchestrator-level LLM call.

use conclave_core::daemon::{Daemon, DaemonStatus};
use conclave_core::engram::EngramEntry;
use conclave_core::template::DaemonTemplate;
use conclave_core::text::truncate;
use std::fmt::Write;

const IDENTITY: &str = "You are the orchestrator of a team of AI daemons. You analyze user requests and either respond directly (quick mode) or deploy specialized daemons (sub-agents) for complex tasks.";

const MAX_PROMPT_ENGRAMS: usize = 10;

/// Everything the orchestrator's own system prompt is built from.
#[derive(Debug, Default)]
pub struct OrchestratorPrompt<'a> {
    pub context_summary: &'a str,
    pub active_daemons: &'a [Daemon],
    pub engrams: &'a [EngramEntry],
    pub project_instruction: Option<&'a str>,
}

impl OrchestratorPrompt<'_> {
    pub fn build(&self) -> String {
        let mut s = format!("{IDENTITY}\n\n");

        if !self.context_summary.is_empty() {
            let _ = write!(s, "## Session Context\n\n{}\n\n", self.context_summary);
        }

        if !self.active_daemons.is_empty() {
            s.push_str("## Active Daemons\n\n");
            for d in self.active_daemons {
                let _ = write!(
                    s,
                    "- **{}** ({}): {} — {:.0}% complete",
                    d.role_label,
                    d.role,
                    d.current_action,
                    d.progress * 100.0
                );
                if d.status == DaemonStatus::WaitingInput {
                    s.push_str(" [WAITING FOR INPUT]");
                }
                s.push('\n');
            }
            s.push('\n');
        }

        let knowledge: Vec<_> = self
            .engrams
            .iter()
            .filter(|e| !e.summary.is_empty())
            .take(MAX_PROMPT_ENGRAMS)
            .collect();
        if !knowledge.is_empty() {
            s.push_str("## Recent Knowledge\n\n");
            for e in knowledge {
                let _ = writeln!(s, "- [{}] {}", e.kind.as_str(), e.summary);
            }
            s.push('\n');
        }

        if let Some(instruction) = self.project_instruction.filter(|i| !i.is_empty()) {
            let _ = write!(s, "## Project Instructions\n\n{instruction}\n\n");
        }
        s
    }
}

/// Standalone classification prompt. Never mixed with conversation context,
/// or the model starts answering instead of classifying.
pub fn classification_prompt(active: &[Daemon], templates: &[DaemonTemplate]) -> String {
    let mut s = String::from(
        r#"You are a task classifier. Your ONLY job is to classify the user's message and output JSON. Do NOT answer the user's question. Do NOT provide any explanation. Respond with ONLY a JSON object.

Classify into one of these modes:

STATUS: The user is asking about progress, status, or whether something is done. Use when daemons are active or the user references previous work.
  Examples: "is it done?", "what's the status?", "continue", "what happened?", "any updates?"

QUICK: Simple questions, greetings, lookups, conversational responses.
  Examples: "what time is it", "hello", "thanks", "what did I do today"

DAEMON: Tasks requiring tools, research, or multiple steps.
  Examples: "research Q4 sales", "draft an email to John", "find flights to Tokyo"

MULTI_DAEMON: Complex tasks with multiple distinct sub-tasks that benefit from parallel work.
  Examples: "research competitors AND draft a report", "analyze data and create a presentation"
  Key signal: the request contains multiple distinct objectives (often connected by "and", "then", "also")

"#,
    );

    if !active.is_empty() {
        s.push_str("CONTEXT: The following daemons are currently active:\n");
        for d in active {
            let _ = writeln!(
                s,
                "- {} ({}): {} — {:.0}% complete",
                d.role_label,
                d.role,
                d.current_action,
                d.progress * 100.0
            );
        }
        s.push_str("If the user asks about progress or status, classify as STATUS.\n\n");
    }

    if !templates.is_empty() {
        s.push_str("AVAILABLE DAEMON TEMPLATES:\n");
        s.push_str("If a template matches the user's request well, include its slug as \"template_slug\" in the daemon plan. The template's config (persona, tools, instructions) will be applied automatically.\n");
        s.push_str("If no template fits, omit template_slug and provide your own daemon config as usual.\n\n");
        for t in templates {
            let _ = writeln!(s, "- slug: \"{}\" | {} — {}", t.slug, t.name, t.description);
        }
        s.push('\n');
    }

    s.push_str(
        r#"IMPORTANT: When in doubt between quick and daemon, choose DAEMON. When the task has multiple parts, choose MULTI_DAEMON. If daemons are active and the user asks about progress, choose STATUS.

For status mode, respond with:
{"mode": "status"}

For quick mode, respond with:
{"mode": "quick"}

For daemon mode, respond with:
{"mode": "daemon", "daemons": [{"index": 0, "role": "researcher", "role_label": "Research Daemon", "template_slug": "researcher", "task_summary": "Research Q4 sales trends across major markets", "tools_needed": ["search"], "depends_on": []}]}

For multi_daemon mode, respond with:
{"mode": "multi_daemon", "daemons": [{"index": 0, "role": "researcher", "role_label": "Research Daemon", "template_slug": "researcher", "task_summary": "Research competitor landscape", "tools_needed": ["search"], "depends_on": []}, {"index": 1, "role": "writer", "role_label": "Writer Daemon", "template_slug": "writer", "task_summary": "Write analysis report using research results", "tools_needed": ["search"], "depends_on": [0]}]}

When a template_slug is provided, you can omit "persona". The template's persona and instructions will be used.
When no template matches, provide "persona" and omit "template_slug".

Roles: researcher, coder, writer, analyst, browser, creator, organizer
Tool categories: search, file, communication, code, data

Respond with ONLY valid JSON. No markdown, no explanation, no code blocks."#,
    );
    s
}

pub const VERIFIER_SYSTEM: &str =
    "You are the orchestrator. Respond with ONLY valid JSON. No markdown code blocks.";

const VERIFIED_OUTPUT_CAP: usize = 4_000;

/// One call that both judges adequacy and writes the user-facing message.
pub fn verification_prompt(original_request: &str, daemon_output: &str) -> String {
    format!(
        r#"You are the orchestrator, an AI assistant reporting back to the user after a daemon completed a task.

User's original request: {original_request}

Daemon output: {}

Do TWO things:
1. EVALUATE: Does this daemon output adequately address what the user asked for? Be strict. Partial or vague results count as inadequate.
2. RESPOND: Write a brief, natural proactive message (2-4 sentences) presenting the results to the user. Sound like a helpful colleague, not a robot. Highlight key findings. End with an offer to help further.

Respond with ONLY a JSON object:
{{"adequate": true/false, "note": "what's missing if inadequate", "proactive_message": "your natural response to the user"}}"#,
        truncate(daemon_output, VERIFIED_OUTPUT_CAP)
    )
}

/// Shown while an inadequate answer is being retried.
pub fn retrying_thought(note: &str) -> String {
    format!("That didn't fully cover what you asked for: {note}. Let me try again with a different approach.")
}

/// Best effort after every automatic attempt fell short.
pub fn exhausted_note(message: &str, attempts: usize, note: &str) -> String {
    format!(
        "{message}\n\n---\n*I made {attempts} attempts at this task but couldn't fully satisfy your request. {note} Feel free to rephrase or break it into smaller tasks.*"
    )
}

const RETRY_OUTPUT_CAP: usize = 3_000;

/// First turn of an automatic retry daemon.
pub fn auto_retry_message(original_request: &str, previous_output: &str, note: &str) -> String {
    format!(
        "RETRY: Previous attempt was inadequate. Try harder and be more thorough.\n\n\
         Original request: {original_request}\n\n\
         Previous daemon output (DO NOT just repeat this, improve on it):\n{}\n\n\
         What was wrong with the previous attempt: {note}\n\n\
         Instructions: Address the original request completely. Use different tools or approaches if the previous attempt fell short. Be comprehensive.",
        truncate(previous_output, RETRY_OUTPUT_CAP)
    )
}

pub const RETRY_PERSONA: &str = "Thorough investigator who addresses gaps from previous attempts. Uses multiple tools and cross-references findings.";

/// Message a user-requested retry is classified and dispatched with.
pub fn manual_retry_message(prompt: &str, error: Option<&str>, previous_output: Option<&str>) -> String {
    let mut s = format!(
        "RETRY: Previous attempt failed. Try a different approach.\n\nOriginal request: {prompt}\n\n"
    );
    if let Some(error) = error.filter(|e| !e.is_empty()) {
        let _ = write!(s, "Previous error: {error}\n\n");
    }
    if let Some(output) = previous_output.filter(|o| !o.is_empty()) {
        let _ = write!(
            s,
            "Previous attempt output (incomplete/inadequate):\n{}\n\n",
            truncate(output, RETRY_OUTPUT_CAP)
        );
    }
    s.push_str(
        "Instructions: Address the original request completely. If the previous attempt failed due to a tool error, try different tools or approaches. Be thorough and comprehensive.",
    );
    s
}

pub const SYNTHESIZER_SYSTEM: &str = "You are the orchestrator of a team of AI daemons. Synthesize the results from multiple specialized daemons into a cohesive response.";

/// A completed daemon's contribution to the final answer.
#[derive(Debug, Clone, PartialEq)]
pub struct DaemonOutcome {
    pub label: String,
    pub role: String,
    pub summary: String,
}

pub fn synthesis_prompt(outcomes: &[DaemonOutcome]) -> String {
    let mut s = String::from(
        "The following daemons have completed their work. Synthesize a cohesive final response:\n\n",
    );
    for o in outcomes {
        let _ = write!(s, "### {} ({})\n{}\n\n", o.label, o.role, o.summary);
    }
    s.push_str("Provide a unified, well-structured summary combining all daemon results.");
    s
}

/// Plain concatenation used when the synthesis call fails.
pub fn synthesis_fallback(outcomes: &[DaemonOutcome]) -> String {
    outcomes
        .iter()
        .map(|o| format!("**{}:** {}\n\n", o.label, o.summary))
        .collect()
}

/// A running daemon as the status report sees it.
#[derive(Debug, Clone)]
pub struct StatusLine<'a> {
    pub daemon: &'a Daemon,
    /// The owning task's goal, else the daemon label.
    pub goal: String,
}

pub fn status_block(lines: &[StatusLine<'_>]) -> String {
    let mut s = String::from("Currently active tasks:\n");
    for (i, line) in lines.iter().enumerate() {
        let d = line.daemon;
        let _ = write!(
            s,
            "\n[Task {}] {} ({})\n  Goal: {}\n  Currently: {}\n  Progress: {:.0}%\n",
            i + 1,
            d.role_label,
            d.role,
            line.goal,
            d.current_action,
            d.progress * 100.0
        );
    }
    s
}

pub const STATUS_ACTIVE_INSTRUCTIONS: &str = "The user is asking about their running tasks. If they ask about a specific task, identify which one and give a focused update. If they ask generally, give a brief overview of all. Be conversational and respond like a real person giving a status update.";

pub const STATUS_HISTORY_INSTRUCTIONS: &str = "The user is asking about the status or results of previous work. Use the conversation history above to give a complete, contextual answer. If a previous task produced results, share them in full. Do not truncate or summarize unless the user explicitly asks for a summary.";

pub const STATUS_UNAVAILABLE: &str =
    "I couldn't retrieve the previous results. Please try rephrasing your question.";

/// Static status list used when the status call fails.
pub fn status_fallback(active: &[Daemon]) -> String {
    let mut s = String::from("Here's the current status:\n\n");
    for d in active {
        let _ = writeln!(
            s,
            "- **{}**: {} — {:.0}%",
            d.role_label,
            d.current_action,
            d.progress * 100.0
        );
    }
    s
}
