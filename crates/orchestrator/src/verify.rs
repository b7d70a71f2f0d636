//! Post-completion verification and bounded automatic retries.
//!
//! A finished single daemon's output is judged by one LLM call that also
//! writes the user-facing message. Inadequate output spawns a fresh retry
//! daemon, up to `max_auto_retries` times; after that the best answer goes
//! out with a note.

use conclave_core::daemon::Daemon;
use conclave_core::event::Event;
use conclave_core::task::{Task, TaskMode, TaskSource, TaskStatus};
use conclave_core::text::truncate;
use futures::FutureExt;
use futures::future::BoxFuture;
use serde::Deserialize;
use std::panic::AssertUnwindSafe;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::json::extract_object;
use crate::prompts::{
    RETRY_PERSONA, VERIFIER_SYSTEM, auto_retry_message, exhausted_note, retrying_thought, verification_prompt,
};
use crate::service::{Orchestrator, best_effort};
use crate::single::AT_CAPACITY;
use crate::turn::Turn;

const RETRY_ROLE: &str = "researcher";
const RETRY_LABEL: &str = "Retry Daemon";
const RETRY_TOOLS: &[&str] = &["search"];

/// The verifier's judgement.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Verdict {
    #[serde(default)]
    pub adequate: bool,
    #[serde(default)]
    pub note: String,
    #[serde(default)]
    pub proactive_message: String,
}

/// The first JSON object in `raw`, if it parses as a verdict.
pub fn parse_verdict(raw: &str) -> Option<Verdict> {
    let json = extract_object(raw)?;
    match serde_json::from_str(json) {
        Ok(verdict) => Some(verdict),
        Err(e) => {
            debug!(error = %e, "Verdict JSON invalid");
            None
        }
    }
}

impl Orchestrator {
    /// Judge `summary` and respond, retrying inadequate output. `attempt`
    /// counts automatic retries already made.
    pub(crate) fn verify_and_respond<'a>(
        &'a self,
        turn: &'a Turn,
        task_id: Uuid,
        summary: String,
        attempt: usize,
    ) -> BoxFuture<'a, ()> {
        async move {
            let verdict = match AssertUnwindSafe(self.judge(turn, &summary)).catch_unwind().await {
                Ok(verdict) => verdict,
                Err(_) => {
                    warn!(task_id = %task_id, "Verification panicked, sending raw output");
                    None
                }
            };
            let Some(verdict) = verdict else {
                self.respond(turn, task_id, summary);
                return;
            };

            let message = if verdict.proactive_message.is_empty() {
                summary.clone()
            } else {
                verdict.proactive_message.clone()
            };
            if verdict.adequate {
                info!(task_id = %task_id, attempt, "Output verified adequate");
                self.respond(turn, task_id, message);
                return;
            }

            let max = self.config.limits.max_auto_retries;
            if attempt < max {
                info!(task_id = %task_id, attempt = attempt + 1, max, note = %verdict.note, "Output inadequate, retrying");
                self.publish(&turn.user_id, Event::thinking(retrying_thought(&verdict.note)));
                self.auto_retry(turn, &summary, &verdict.note, attempt + 1).await;
            } else {
                warn!(task_id = %task_id, attempts = attempt + 1, "Automatic retries exhausted");
                self.respond(turn, task_id, exhausted_note(&message, max + 1, &verdict.note));
            }
        }
        .boxed()
    }

    async fn judge(&self, turn: &Turn, summary: &str) -> Option<Verdict> {
        let prompt = verification_prompt(&turn.message, summary);
        let raw = match self
            .chat
            .complete_sync(turn.model(), VERIFIER_SYSTEM, vec![conclave_core::Message::user(prompt)])
            .await
        {
            Ok(raw) => raw,
            Err(e) => {
                warn!(user_id = %turn.user_id, error = %e, "Verification call failed");
                return None;
            }
        };
        parse_verdict(&raw)
    }

    pub(crate) fn respond(&self, turn: &Turn, task_id: Uuid, content: String) {
        self.publish(&turn.user_id, Event::OrchestratorResponse { task_id, content });
    }

    /// One fresh daemon at the original request, told what fell short.
    async fn auto_retry(&self, turn: &Turn, previous: &str, note: &str, attempt: usize) {
        let user_id = &turn.user_id;

        let mut task = Task::new(turn.session_id, user_id, &turn.message).with_source(TaskSource::AutoRetry);
        task.goal = format!("[Retry {attempt}] {}", turn.message);
        task.mode = TaskMode::Daemon;
        task.status = TaskStatus::Executing;
        task.model_id = turn.model.clone();
        task.project_id = turn.task.project_id;
        if let Err(e) = self.stores.tasks.create(task.clone()).await {
            warn!(user_id = %user_id, error = %e, "Failed to create retry task, keeping previous output");
            self.respond(turn, turn.task.id, previous.to_string());
            return;
        }
        best_effort(
            "track active task",
            self.stores.sessions.add_active_task(turn.session_id, task.id).await,
        );
        self.publish(
            user_id,
            Event::TaskCreated {
                task_id: task.id,
                prompt: task.prompt.clone(),
            },
        );

        let mut daemon = Daemon::new(
            turn.session_id,
            user_id,
            task.id,
            RETRY_ROLE,
            format!("[Retry {attempt}] {}", truncate(&turn.message, 100)),
        );
        daemon.role_label = RETRY_LABEL.into();
        daemon.persona = RETRY_PERSONA.into();
        daemon.assigned_tools = RETRY_TOOLS.iter().map(|t| t.to_string()).collect();
        daemon.model_id = turn.model.clone();
        daemon.max_iterations = self.config.daemon.max_iterations;
        daemon.max_retries = self.config.daemon.max_retries;

        let Some(guard) = self.slots.try_acquire(user_id, daemon.id, &turn.cancel) else {
            let error = format!("{AT_CAPACITY} for retry");
            best_effort("record error", self.stores.tasks.set_error(task.id, &error).await);
            self.untrack(&task).await;
            self.publish(user_id, Event::TaskFailed { task_id: task.id, error });
            self.respond(turn, turn.task.id, previous.to_string());
            return;
        };

        let first_message = auto_retry_message(&turn.message, previous, note);
        let deployed_summary = format!("Retry: {}", truncate(&turn.message, 100));
        let result = self
            .deploy_single(turn, &task, daemon, guard, &first_message, &deployed_summary, &[])
            .await;
        match result {
            Some(summary) => self.verify_and_respond(turn, task.id, summary, attempt).await,
            None => self.respond(turn, turn.task.id, previous.to_string()),
        }
    }
}
