//! Modes answered by the orchestrator itself, without a daemon.

use conclave_core::engram::{EngramEntry, EngramKind};
use conclave_core::event::Event;
use conclave_core::message::Message;
use conclave_core::task::{TaskMode, TaskResult, TaskStatus};
use tracing::{info, warn};

use crate::prompts::{
    STATUS_ACTIVE_INSTRUCTIONS, STATUS_HISTORY_INSTRUCTIONS, STATUS_UNAVAILABLE, StatusLine, status_block,
    status_fallback,
};
use crate::service::{Orchestrator, best_effort};
use crate::turn::{HISTORY_TASKS, Turn};

impl Orchestrator {
    /// One tool-augmented answer in the orchestrator's own voice.
    pub(crate) async fn run_quick(&self, turn: &Turn) {
        let task = &turn.task;
        self.begin_direct(turn).await;

        let tools = self.selector.select(&turn.user_id);
        let answer = self
            .chat
            .complete_with_tools(
                &turn.user_id,
                turn.model(),
                &turn.system_prompt,
                turn.history.clone(),
                &tools,
                self.config.daemon.quick_max_iterations,
            )
            .await;

        let content = match answer {
            Ok(content) => content,
            Err(e) => {
                warn!(task_id = %task.id, error = %e, "Quick answer failed");
                let error = e.to_string();
                best_effort("record error", self.stores.tasks.set_error(task.id, &error).await);
                self.close_task(task, false).await;
                self.publish(&turn.user_id, Event::TaskFailed { task_id: task.id, error });
                return;
            }
        };

        info!(task_id = %task.id, chars = content.len(), "Quick answer ready");
        best_effort(
            "record result",
            self.stores.tasks.set_result(task.id, TaskResult::summary(content.clone())).await,
        );
        self.close_task(task, true).await;
        best_effort(
            "write engram",
            self.stores
                .engrams
                .write(EngramEntry::new(
                    turn.session_id,
                    &turn.user_id,
                    EngramKind::TaskResult,
                    format!("quick_{}", task.id),
                    content.clone(),
                    "orchestrator",
                ))
                .await,
        );
        self.respond(turn, task.id, content.clone());
        self.publish(
            &turn.user_id,
            Event::TaskCompleted {
                task_id: task.id,
                summary: content,
            },
        );
    }

    /// Report on running daemons, or on earlier results when none run.
    pub(crate) async fn run_status(&self, turn: &Turn) {
        let task = &turn.task;
        self.begin_direct(turn).await;

        let content = if turn.active.is_empty() {
            self.history_status(turn).await
        } else {
            self.active_status(turn).await
        };

        best_effort(
            "record result",
            self.stores.tasks.set_result(task.id, TaskResult::summary(content.clone())).await,
        );
        if !task.is_routine() {
            best_effort(
                "untrack active task",
                self.stores.sessions.remove_active_task(turn.session_id, task.id).await,
            );
            best_effort(
                "track recent task",
                self.stores.sessions.add_recent_task(turn.session_id, task.id).await,
            );
        }
        self.respond(turn, task.id, content.clone());
        self.publish(
            &turn.user_id,
            Event::TaskCompleted {
                task_id: task.id,
                summary: content,
            },
        );
    }

    async fn begin_direct(&self, turn: &Turn) {
        best_effort(
            "set task mode",
            self.stores
                .tasks
                .update_mode_and_status(turn.task.id, TaskMode::Quick, TaskStatus::Executing)
                .await,
        );
        self.publish(
            &turn.user_id,
            Event::TaskUpdated {
                task_id: turn.task.id,
                goal: turn.task.goal.clone(),
            },
        );
    }

    async fn active_status(&self, turn: &Turn) -> String {
        let mut lines = Vec::with_capacity(turn.active.len());
        for daemon in &turn.active {
            let goal = best_effort("load daemon task", self.stores.tasks.get(daemon.task_id).await)
                .flatten()
                .map(|t| t.goal)
                .filter(|g| !g.is_empty())
                .unwrap_or_else(|| daemon.role_label.clone());
            lines.push(StatusLine { daemon, goal });
        }

        let system = format!(
            "{}\n\n{}\n{}",
            turn.system_prompt.trim_end(),
            status_block(&lines),
            STATUS_ACTIVE_INSTRUCTIONS
        );
        match self
            .chat
            .complete_sync(turn.model(), &system, vec![Message::user(&turn.message)])
            .await
        {
            Ok(content) if !content.trim().is_empty() => content,
            Ok(_) => status_fallback(&turn.active),
            Err(e) => {
                warn!(user_id = %turn.user_id, error = %e, "Status call failed, using static list");
                status_fallback(&turn.active)
            }
        }
    }

    async fn history_status(&self, turn: &Turn) -> String {
        let system = format!("{}\n\n{}", turn.system_prompt.trim_end(), STATUS_HISTORY_INSTRUCTIONS);
        match self.chat.complete_sync(turn.model(), &system, turn.history.clone()).await {
            Ok(content) if !content.trim().is_empty() => content,
            other => {
                if let Err(e) = other {
                    warn!(user_id = %turn.user_id, error = %e, "Status call failed, falling back to the last result");
                }
                self.last_result(turn).await
            }
        }
    }

    async fn last_result(&self, turn: &Turn) -> String {
        let recent = best_effort(
            "load recent tasks",
            self.stores
                .tasks
                .recent_for_session(turn.session_id, turn.task.project_id, HISTORY_TASKS + 1)
                .await,
        )
        .unwrap_or_default();
        recent
            .iter()
            .filter(|t| t.id != turn.task.id)
            .find_map(|t| t.summary().map(str::to_string))
            .unwrap_or_else(|| STATUS_UNAVAILABLE.to_string())
    }
}
