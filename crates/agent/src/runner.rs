//! The daemon run loop.
//!
//! A [`DaemonRunner`] owns one daemon from `idle` to a terminal state:
//!
//! 1. **Check** for cancellation
//! 2. **Trim** the transcript if the context window is filling up
//! 3. **Call** the LLM through the overflow-recovery ladder
//! 4. **If tool calls**: execute each, append truncated results, loop
//! 5. **If text**: finish when the completion detector agrees, else nudge
//!    the model to continue
//!
//! Progress reaches the supervisor as [`DaemonUpdate`]s on an mpsc channel.
//! Exactly one terminal update (`completed` or `failed`) is sent per run,
//! panics included.

use chrono::Utc;
use conclave_core::daemon::{
    Daemon, DaemonMessage, DaemonResult, DaemonStatus, DaemonToolResult, DaemonUpdate, UpdateKind,
    WorkingMemoryEntry,
};
use conclave_core::engram::{EngramEntry, EngramKind};
use conclave_core::error::ProviderError;
use conclave_core::message::{Message, Role, last_assistant_text};
use conclave_core::provider::{Provider, ProviderRequest, ProviderResponse, ToolDefinition};
use conclave_core::store::{DaemonStore, EngramStore};
use conclave_core::text;
use conclave_tools::ToolRouter;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::completion::CompletionDetector;
use crate::context::{ContextWindow, LlmFailure, complete_with_recovery, truncate_for_llm};

/// Nudge sent when a plain-text reply does not look final.
pub const CONTINUE_PROMPT: &str =
    "Continue with your task. If you are finished, clearly state your final result and conclusion.";

const DEFAULT_MAX_ITERATIONS: usize = 25;
const DEFAULT_MAX_RETRIES: usize = 3;

/// Collaborators shared by every runner an orchestrator launches.
#[derive(Clone)]
pub struct RunnerDeps {
    pub provider: Arc<dyn Provider>,
    pub router: Arc<ToolRouter>,
    pub daemons: Arc<dyn DaemonStore>,
    pub engrams: Arc<dyn EngramStore>,
    pub completion: Arc<dyn CompletionDetector>,
    /// Used when the daemon has no model of its own.
    pub default_model: String,
    /// Model context window in tokens.
    pub context_window: usize,
}

/// Drives one daemon's agent loop.
pub struct DaemonRunner {
    daemon: Daemon,
    deps: RunnerDeps,
    system_prompt: String,
    task_summary: String,
    first_message: String,
    tools: Vec<ToolDefinition>,
    updates: mpsc::Sender<DaemonUpdate>,
    cancel: CancellationToken,
    context: ContextWindow,
    messages: Vec<Message>,
}

impl DaemonRunner {
    /// The first user turn defaults to the daemon's task summary, which the
    /// caller stores in `current_action`.
    pub fn new(
        daemon: Daemon,
        deps: RunnerDeps,
        updates: mpsc::Sender<DaemonUpdate>,
        cancel: CancellationToken,
    ) -> Self {
        let context = ContextWindow::new(deps.context_window, &[]);
        Self {
            task_summary: daemon.current_action.clone(),
            first_message: daemon.current_action.clone(),
            daemon,
            deps,
            system_prompt: String::new(),
            tools: Vec::new(),
            updates,
            cancel,
            context,
            messages: Vec::new(),
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    /// Use the user's original message as the first turn. Empty keeps the
    /// task summary.
    pub fn with_first_message(mut self, message: impl Into<String>) -> Self {
        let message = message.into();
        if !message.is_empty() {
            self.first_message = message;
        }
        self
    }

    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.context = ContextWindow::new(self.deps.context_window, &tools);
        self.tools = tools;
        self
    }

    pub fn daemon(&self) -> &Daemon {
        &self.daemon
    }

    /// Run to completion. Panics inside the loop become a `failed` update.
    pub async fn execute(self) {
        let daemon_id = self.daemon.id;
        let index = self.daemon.plan_index;
        let role = label(&self.daemon).to_string();
        let updates = self.updates.clone();
        let daemons = self.deps.daemons.clone();

        if let Err(panic) = AssertUnwindSafe(self.run()).catch_unwind().await {
            let message = panic_message(panic.as_ref());
            error!(daemon = %role, panic = %message, "Daemon panicked");
            if let Err(e) = daemons
                .update_status(daemon_id, DaemonStatus::Failed, "Panicked", 0.0)
                .await
            {
                warn!(daemon = %role, error = %e, "Failed to record panic");
            }
            let update = DaemonUpdate {
                daemon_id,
                index,
                role,
                kind: UpdateKind::Failed {
                    error: format!("daemon panicked: {message}"),
                    can_retry: true,
                },
            };
            if updates.send(update).await.is_err() {
                debug!("Supervisor gone before panic report");
            }
        }
    }

    async fn run(mut self) {
        let max_iterations = match self.daemon.max_iterations {
            0 => DEFAULT_MAX_ITERATIONS,
            n => n,
        };
        let model = if self.daemon.model_id.is_empty() {
            self.deps.default_model.clone()
        } else {
            self.daemon.model_id.clone()
        };
        let cancel = self.cancel.clone();

        self.set_status(DaemonStatus::Executing, "Initializing...", 0.0).await;
        info!(
            daemon = %label(&self.daemon),
            tools = self.tools.len(),
            tool_tokens = self.context.tool_tokens(),
            task = %text::truncate(&self.task_summary, 200),
            "Daemon starting"
        );

        self.messages = vec![
            Message::system(self.system_prompt.clone()),
            Message::user(self.first_message.clone()),
        ];
        self.persist(vec![DaemonMessage {
            role: "user".into(),
            content: self.first_message.clone(),
            tool_call: None,
            tool_result: None,
            timestamp: Utc::now(),
        }])
        .await;

        for i in 0..max_iterations {
            if cancel.is_cancelled() {
                return self.fail_cancelled().await;
            }
            self.daemon.iterations = i + 1;
            self.set_status(
                DaemonStatus::Executing,
                &format!("Iteration {}/{}", i + 1, max_iterations),
                i as f64 / max_iterations as f64,
            )
            .await;

            self.context.trim_if_needed(&mut self.messages);
            self.context.preflight(&mut self.messages);

            let response = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                response = self.call_llm(&model) => Some(response),
            };
            let Some(response) = response else {
                return self.fail_cancelled().await;
            };

            let response = match response {
                Ok(response) => response,
                Err(e @ LlmFailure::OverflowPersists(_)) => {
                    // Permanent: the same prompt would overflow again.
                    error!(daemon = %label(&self.daemon), error = %e, "Context overflow is unrecoverable");
                    return self.fail(e.to_string(), false, "Context overflow", 0.0).await;
                }
                Err(LlmFailure::Provider(e)) => {
                    if self.handle_error(&e, &cancel).await {
                        continue;
                    }
                    return;
                }
            };

            let message = response.message;
            if !message.tool_calls.is_empty() {
                self.run_tools(message).await;
                continue;
            }

            if message.content.is_empty() {
                continue;
            }
            self.progress(UpdateKind::Thinking {
                content: message.content.clone(),
            });
            if self.deps.completion.is_complete(&message.content) {
                return self.complete(message.content).await;
            }
            self.messages.push(Message::assistant(message.content));
            self.messages.push(Message::user(CONTINUE_PROMPT));
        }

        let last = last_assistant_text(&self.messages).map(str::to_string);
        match last {
            Some(last) => self.complete(last).await,
            None => {
                let error = format!("max iterations ({max_iterations}) reached without result");
                self.fail(error, false, "Max iterations reached", 1.0).await
            }
        }
    }

    async fn call_llm(&mut self, model: &str) -> Result<ProviderResponse, LlmFailure> {
        let provider = self.deps.provider.clone();
        let tools = self.tools.clone();
        let response = complete_with_recovery(&mut self.messages, &self.daemon.role_label, |messages| {
            let provider = provider.clone();
            let request = ProviderRequest::new(model, messages).with_tools(tools.clone());
            async move { provider.complete(request).await }
        })
        .await?;

        self.context.record_usage(response.usage.as_ref());
        if let Some(usage) = &response.usage {
            debug!(
                daemon = %label(&self.daemon),
                prompt_tokens = usage.prompt_tokens,
                completion_tokens = usage.completion_tokens,
                fill_pct = usage.prompt_tokens as usize * 100 / self.context.window(),
                "LLM usage"
            );
        }
        Ok(response)
    }

    async fn run_tools(&mut self, message: Message) {
        if !message.content.is_empty() {
            self.progress(UpdateKind::Thinking {
                content: message.content.clone(),
            });
        }

        let calls = message.tool_calls.clone();
        let round_start = self.messages.len();
        self.messages.push(message);

        for call in &calls {
            self.progress(UpdateKind::ToolCall {
                tool_name: call.name.clone(),
                current_action: format!("Using {}...", call.name),
            });

            let output = self
                .deps
                .router
                .execute(&self.daemon.user_id, call, &self.tools)
                .await;
            debug!(
                daemon = %label(&self.daemon),
                tool = %call.name,
                chars = output.content.len(),
                is_error = output.is_error,
                "Tool finished"
            );

            self.remember(&call.name, &output.content).await;
            self.progress(UpdateKind::ToolResult {
                tool_name: call.name.clone(),
                tool_result: text::truncate(&output.content, 500),
            });

            let capped = truncate_for_llm(&output.content, &call.name, self.context.result_cap());
            self.messages.push(Message::tool_result(&call.id, &call.name, capped));
        }

        let round = transcript_entries(&self.messages[round_start..]);
        self.persist(round).await;
    }

    /// Count the error against the retry budget and back off. Returns
    /// whether the loop should try again.
    async fn handle_error(&mut self, err: &ProviderError, cancel: &CancellationToken) -> bool {
        self.daemon.retry_count += 1;
        let attempt = self.daemon.retry_count;
        let max_retries = match self.daemon.max_retries {
            0 => DEFAULT_MAX_RETRIES,
            n => n,
        };

        if attempt > max_retries {
            error!(daemon = %label(&self.daemon), error = %err, max_retries, "Daemon failed after retries");
            self.fail(
                format!("failed after {max_retries} retries: {err}"),
                true,
                "Failed",
                0.0,
            )
            .await;
            return false;
        }

        warn!(
            daemon = %label(&self.daemon),
            attempt,
            max_retries,
            error = %err,
            "LLM call failed, retrying"
        );
        self.progress(UpdateKind::Status {
            status: "retrying".into(),
            current_action: format!("Retrying after error (attempt {attempt}/{max_retries})"),
            progress: self.daemon.progress,
            error: Some(err.to_string()),
        });

        let backoff = Duration::from_secs((attempt * attempt) as u64);
        tokio::select! {
            _ = cancel.cancelled() => {
                self.fail_cancelled().await;
                false
            }
            _ = tokio::time::sleep(backoff) => true,
        }
    }

    async fn complete(mut self, summary: String) {
        let entry = EngramEntry::new(
            self.daemon.session_id,
            &self.daemon.user_id,
            EngramKind::DaemonOutput,
            format!("daemon_{}_{}", self.daemon.plan_index, self.daemon.role),
            summary.clone(),
            format!("daemon_{}", label(&self.daemon)),
        );
        if let Err(e) = self.deps.engrams.write(entry).await {
            warn!(daemon = %label(&self.daemon), error = %e, "Failed to write daemon output to engram");
        }

        self.set_status(DaemonStatus::Completed, "Completed", 1.0).await;
        self.record_iterations().await;
        info!(
            daemon = %label(&self.daemon),
            iterations = self.daemon.iterations,
            chars = summary.len(),
            "Daemon completed"
        );
        self.terminal(UpdateKind::Completed {
            result: DaemonResult {
                summary,
                ..Default::default()
            },
        })
        .await;
    }

    async fn fail(&mut self, error: String, can_retry: bool, action: &str, progress: f64) {
        self.set_status(DaemonStatus::Failed, action, progress).await;
        self.record_iterations().await;
        self.terminal(UpdateKind::Failed { error, can_retry }).await;
    }

    async fn fail_cancelled(&mut self) {
        info!(daemon = %label(&self.daemon), "Daemon cancelled");
        self.fail("daemon was cancelled".into(), false, "Cancelled", 0.0)
            .await;
    }

    async fn set_status(&mut self, status: DaemonStatus, action: &str, progress: f64) {
        self.daemon.status = status;
        self.daemon.current_action = action.to_string();
        self.daemon.progress = progress;
        if let Err(e) = self
            .deps
            .daemons
            .update_status(self.daemon.id, status, action, progress)
            .await
        {
            warn!(daemon = %label(&self.daemon), error = %e, "Failed to persist daemon status");
        }
        if status == DaemonStatus::Executing {
            self.progress(UpdateKind::Status {
                status: "executing".into(),
                current_action: action.to_string(),
                progress,
                error: None,
            });
        }
    }

    async fn record_iterations(&self) {
        if let Err(e) = self
            .deps
            .daemons
            .set_iterations(self.daemon.id, self.daemon.iterations)
            .await
        {
            warn!(daemon = %label(&self.daemon), error = %e, "Failed to persist iteration count");
        }
    }

    async fn remember(&mut self, key: &str, value: &str) {
        let entry = WorkingMemoryEntry {
            key: key.to_string(),
            value: value.to_string(),
            summary: text::truncate(value, 200),
            timestamp: Utc::now(),
        };
        self.daemon.working_memory.push(entry.clone());
        if let Err(e) = self.deps.daemons.add_working_memory(self.daemon.id, entry).await {
            warn!(daemon = %label(&self.daemon), error = %e, "Failed to persist working memory");
        }
    }

    async fn persist(&self, entries: Vec<DaemonMessage>) {
        if entries.is_empty() {
            return;
        }
        if let Err(e) = self.deps.daemons.append_messages(self.daemon.id, entries).await {
            warn!(daemon = %label(&self.daemon), error = %e, "Failed to persist daemon transcript");
        }
    }

    fn update(&self, kind: UpdateKind) -> DaemonUpdate {
        DaemonUpdate {
            daemon_id: self.daemon.id,
            index: self.daemon.plan_index,
            role: label(&self.daemon).to_string(),
            kind,
        }
    }

    /// Best effort: progress is dropped when the supervisor lags.
    fn progress(&self, kind: UpdateKind) {
        if self.updates.try_send(self.update(kind)).is_err() {
            debug!(daemon = %label(&self.daemon), "Progress update dropped");
        }
    }

    /// Always delivered while the supervisor is listening.
    async fn terminal(&self, kind: UpdateKind) {
        if self.updates.send(self.update(kind)).await.is_err() {
            debug!(daemon = %label(&self.daemon), "Supervisor gone before terminal update");
        }
    }
}

fn label(daemon: &Daemon) -> &str {
    if daemon.role_label.is_empty() {
        &daemon.role
    } else {
        &daemon.role_label
    }
}

/// Store form of transcript messages: one assistant entry per tool call.
fn transcript_entries(messages: &[Message]) -> Vec<DaemonMessage> {
    let mut entries = Vec::new();
    for msg in messages {
        match msg.role {
            Role::Assistant if !msg.tool_calls.is_empty() => {
                for (i, call) in msg.tool_calls.iter().enumerate() {
                    entries.push(DaemonMessage {
                        role: "assistant".into(),
                        content: if i == 0 { msg.content.clone() } else { String::new() },
                        tool_call: Some(call.clone()),
                        tool_result: None,
                        timestamp: msg.timestamp,
                    });
                }
            }
            Role::Tool => {
                let lower = msg.content.to_lowercase();
                entries.push(DaemonMessage {
                    role: "tool".into(),
                    content: msg.content.clone(),
                    tool_call: None,
                    tool_result: Some(DaemonToolResult {
                        tool_call_id: msg.tool_call_id.clone().unwrap_or_default(),
                        content: msg.content.clone(),
                        is_error: lower.contains("error") || lower.contains("failed"),
                    }),
                    timestamp: msg.timestamp,
                });
            }
            _ => entries.push(DaemonMessage {
                role: match msg.role {
                    Role::User => "user",
                    Role::System => "system",
                    _ => "assistant",
                }
                .into(),
                content: msg.content.clone(),
                tool_call: None,
                tool_result: None,
                timestamp: msg.timestamp,
            }),
        }
    }
    entries
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".into()
    }
}
