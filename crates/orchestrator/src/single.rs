//! Single-daemon mode, plus the daemon construction and launch steps the
//! other daemon modes share.

use conclave_agent::{DaemonPrompt, DaemonRunner};
use conclave_core::daemon::{Daemon, DaemonUpdate, UpdateKind};
use conclave_core::event::Event;
use conclave_core::plan::DaemonPlan;
use conclave_core::session::Skill;
use conclave_core::task::{Task, TaskMode, TaskResult, TaskStatus};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::service::{Orchestrator, best_effort};
use crate::slots::SlotGuard;
use crate::turn::Turn;

/// Buffered updates per daemon before the runner waits on the orchestrator.
pub(crate) const UPDATE_BUFFER: usize = 50;

pub(crate) const AT_CAPACITY: &str = "maximum concurrent daemons reached";

impl Orchestrator {
    /// A daemon for `plan`, with template and skill overrides applied.
    pub(crate) async fn build_daemon(&self, turn: &Turn, plan: &DaemonPlan, task_id: Uuid) -> Daemon {
        let mut daemon = Daemon::new(
            turn.session_id,
            &turn.user_id,
            task_id,
            &plan.role,
            &plan.task_summary,
        );
        daemon.role_label = plan.role_label.clone();
        daemon.persona = plan.persona.clone();
        daemon.assigned_tools = plan.tools_needed.clone();
        daemon.template_slug = plan.template_slug.clone();
        daemon.plan_index = plan.index;
        daemon.depends_on = plan.depends_on.clone();
        daemon.model_id = turn.model.clone();
        daemon.max_iterations = self.config.daemon.max_iterations;
        daemon.max_retries = self.config.daemon.max_retries;

        if let Some(slug) = plan.template_slug.as_deref() {
            match best_effort(
                "load template",
                self.stores.templates.get_by_slug(&turn.user_id, slug).await,
            )
            .flatten()
            {
                Some(template) => {
                    daemon.role = template.role.clone();
                    daemon.role_label = template.role_label.clone();
                    daemon.persona = template.build_prompt_section();
                    if !template.default_tools.is_empty() {
                        daemon.assigned_tools = template.default_tools.clone();
                    }
                    if template.max_iterations > 0 {
                        daemon.max_iterations = template.max_iterations;
                    }
                    if template.max_retries > 0 {
                        daemon.max_retries = template.max_retries;
                    }
                }
                None => warn!(slug, "Planned template not found, using the plan as is"),
            }
        }

        if !turn.skills.is_empty() {
            for tool in turn.skill_tools() {
                if !daemon.assigned_tools.contains(&tool) {
                    daemon.assigned_tools.push(tool);
                }
            }
            daemon.assigned_skill_ids = turn.skills.iter().map(|s| s.id.clone()).collect();
        }
        daemon
    }

    /// Start a runner for `daemon`. The slot is released when the runner
    /// task ends, however it ends.
    pub(crate) fn launch(
        &self,
        turn: &Turn,
        daemon: Daemon,
        guard: SlotGuard,
        first_message: &str,
        updates: mpsc::Sender<DaemonUpdate>,
        skills: &[Skill],
    ) {
        let system_prompt = DaemonPrompt {
            role_label: &daemon.role_label,
            persona: &daemon.persona,
            task_summary: &daemon.current_action,
            dependency_results: Some(&daemon.dependency_results),
            skills,
            project_instruction: turn.project_instruction.as_deref(),
        }
        .build();
        let tools = self.selector.select(&turn.user_id);
        debug!(
            daemon_id = %daemon.id,
            tools = tools.len(),
            prompt_len = system_prompt.len(),
            "Launching daemon"
        );

        let runner = DaemonRunner::new(daemon, self.runner.clone(), updates, guard.token())
            .with_system_prompt(system_prompt)
            .with_first_message(first_message)
            .with_tools(tools);
        tokio::spawn(async move {
            let _slot = guard;
            runner.execute().await;
        });
    }

    pub(crate) async fn run_daemon(&self, turn: &Turn, plans: Vec<DaemonPlan>) {
        let task = &turn.task;
        let Some(plan) = plans.into_iter().next() else {
            error!(task_id = %task.id, "Daemon mode without a plan");
            best_effort(
                "record error",
                self.stores.tasks.set_error(task.id, "no daemon plan in classification").await,
            );
            self.untrack(task).await;
            self.publish(&turn.user_id, Event::error("no daemon plan in classification"));
            return;
        };

        best_effort(
            "set task mode",
            self.stores
                .tasks
                .update_mode_and_status(task.id, TaskMode::Daemon, TaskStatus::Executing)
                .await,
        );
        best_effort("set goal", self.stores.tasks.update_goal(task.id, &plan.task_summary).await);
        self.publish(
            &turn.user_id,
            Event::TaskUpdated {
                task_id: task.id,
                goal: plan.task_summary.clone(),
            },
        );

        let daemon = self.build_daemon(turn, &plan, task.id).await;
        let Some(guard) = self.slots.try_acquire(&turn.user_id, daemon.id, &turn.cancel) else {
            best_effort("record error", self.stores.tasks.set_error(task.id, AT_CAPACITY).await);
            self.untrack(task).await;
            self.publish(
                &turn.user_id,
                Event::error(format!("{AT_CAPACITY} ({})", self.slots.cap())),
            );
            return;
        };

        let deployed = self
            .deploy_single(turn, task, daemon, guard, &turn.message, &plan.task_summary, &turn.skills)
            .await;
        if let Some(summary) = deployed {
            self.verify_and_respond(turn, task.id, summary, 0).await;
        }
    }

    /// Persist and launch one daemon for `task`, then relay its updates
    /// until it finishes. Returns the result summary on success.
    #[allow(clippy::too_many_arguments)]
    pub(crate) async fn deploy_single(
        &self,
        turn: &Turn,
        task: &Task,
        daemon: Daemon,
        guard: SlotGuard,
        first_message: &str,
        deployed_summary: &str,
        skills: &[Skill],
    ) -> Option<String> {
        if let Err(e) = self.stores.daemons.create(daemon.clone()).await {
            error!(task_id = %task.id, error = %e, "Failed to persist daemon");
            let message = format!("failed to create daemon: {e}");
            best_effort("record error", self.stores.tasks.set_error(task.id, &message).await);
            self.close_task(task, false).await;
            self.publish(
                &turn.user_id,
                Event::TaskFailed {
                    task_id: task.id,
                    error: message,
                },
            );
            return None;
        }

        best_effort("link daemon", self.stores.tasks.set_daemon_id(task.id, daemon.id).await);
        best_effort(
            "track active daemon",
            self.stores.sessions.add_active_daemon(turn.session_id, daemon.id).await,
        );
        info!(
            task_id = %task.id,
            daemon_id = %daemon.id,
            role = %daemon.role_label,
            "Daemon deployed"
        );
        self.publish(
            &turn.user_id,
            Event::DaemonDeployed {
                daemon_id: daemon.id,
                task_id: task.id,
                role: daemon.role.clone(),
                role_label: daemon.role_label.clone(),
                task_summary: deployed_summary.to_string(),
            },
        );

        let daemon_id = daemon.id;
        let (tx, rx) = mpsc::channel(UPDATE_BUFFER);
        self.launch(turn, daemon, guard, first_message, tx, skills);
        self.forward(turn, task, daemon_id, rx).await
    }

    /// Relay updates to the user and settle the task on the terminal one.
    async fn forward(
        &self,
        turn: &Turn,
        task: &Task,
        daemon_id: Uuid,
        mut rx: mpsc::Receiver<DaemonUpdate>,
    ) -> Option<String> {
        while let Some(update) = rx.recv().await {
            let kind = update.kind.clone();
            self.publish(&turn.user_id, Event::DaemonUpdate { update });
            match kind {
                UpdateKind::Completed { result } => {
                    if self.settled_elsewhere(turn, task, daemon_id, true).await {
                        return None;
                    }
                    best_effort(
                        "untrack daemon",
                        self.stores.sessions.remove_active_daemon(turn.session_id, daemon_id).await,
                    );
                    let summary = result.summary.clone();
                    best_effort(
                        "record result",
                        self.stores
                            .tasks
                            .set_result(
                                task.id,
                                TaskResult {
                                    summary: result.summary,
                                    data: result.data,
                                    artifacts: result.artifacts,
                                },
                            )
                            .await,
                    );
                    self.close_task(task, true).await;
                    self.daemon_finished(turn, daemon_id, true).await;
                    self.publish(
                        &turn.user_id,
                        Event::TaskCompleted {
                            task_id: task.id,
                            summary: summary.clone(),
                        },
                    );
                    return Some(summary);
                }
                UpdateKind::Failed { error, .. } => {
                    self.fail_single(turn, task, daemon_id, error).await;
                    return None;
                }
                _ => {}
            }
        }

        warn!(task_id = %task.id, daemon_id = %daemon_id, "Daemon exited without a result");
        self.fail_single(turn, task, daemon_id, "daemon exited without a result".into())
            .await;
        None
    }

    async fn fail_single(&self, turn: &Turn, task: &Task, daemon_id: Uuid, error: String) {
        if self.settled_elsewhere(turn, task, daemon_id, false).await {
            return;
        }
        best_effort(
            "untrack daemon",
            self.stores.sessions.remove_active_daemon(turn.session_id, daemon_id).await,
        );
        best_effort("record error", self.stores.tasks.set_error(task.id, &error).await);
        self.close_task(task, false).await;
        self.daemon_finished(turn, daemon_id, false).await;
        self.publish(&turn.user_id, Event::TaskFailed { task_id: task.id, error });
    }

    /// A task cancelled for a retry (or timed out) is already closed. Only
    /// the daemon's own bookkeeping is left to do.
    async fn settled_elsewhere(&self, turn: &Turn, task: &Task, daemon_id: Uuid, success: bool) -> bool {
        if !self.is_settled(task.id).await {
            return false;
        }
        debug!(task_id = %task.id, daemon_id = %daemon_id, "Task already settled, dropping daemon outcome");
        best_effort(
            "untrack daemon",
            self.stores.sessions.remove_active_daemon(turn.session_id, daemon_id).await,
        );
        self.daemon_finished(turn, daemon_id, success).await;
        true
    }

    /// Template stats inline, learning extraction in the background.
    pub(crate) async fn daemon_finished(&self, turn: &Turn, daemon_id: Uuid, success: bool) {
        self.learning.record_stats(&turn.user_id, daemon_id, success).await;
        self.learning.spawn(&turn.user_id, turn.model(), daemon_id);
    }

    /// Drop a task from the session without counting it.
    pub(crate) async fn untrack(&self, task: &Task) {
        if !task.is_routine() {
            best_effort(
                "untrack active task",
                self.stores.sessions.remove_active_task(task.session_id, task.id).await,
            );
        }
    }
}
