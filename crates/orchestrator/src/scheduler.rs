//! Multi-daemon mode: a dependency graph of daemons run with bounded
//! concurrency, then synthesized into one answer.
//!
//! Every plan gets a subtask and a daemon record up front. Plans whose
//! dependencies are all met launch immediately; each completion launches
//! whatever it unblocks. A failure cascades to every transitive dependent,
//! which is marked failed without ever launching. All runners share one
//! update channel, drained here until nothing is running.

use conclave_core::daemon::{Daemon, DaemonStatus, DaemonUpdate, UpdateKind};
use conclave_core::event::Event;
use conclave_core::plan::DaemonPlan;
use conclave_core::task::{Task, TaskMode, TaskResult, TaskSource, TaskStatus};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::prompts::{DaemonOutcome, SYNTHESIZER_SYSTEM, synthesis_fallback, synthesis_prompt};
use crate::service::{Orchestrator, best_effort};
use crate::single::{AT_CAPACITY, UPDATE_BUFFER};
use crate::turn::Turn;

/// Whether every index in `deps` has completed.
pub fn deps_met(deps: &[usize], completed: &BTreeMap<usize, String>) -> bool {
    deps.iter().all(|d| completed.contains_key(d))
}

/// Every pending plan that transitively depends on `failed`, in discovery
/// order. `failed` itself is never included.
pub fn cascade(failed: usize, pending: &BTreeMap<usize, Vec<usize>>) -> Vec<usize> {
    let mut doomed = vec![failed];
    loop {
        let next: Vec<usize> = pending
            .iter()
            .filter(|(index, deps)| !doomed.contains(index) && deps.iter().any(|d| doomed.contains(d)))
            .map(|(index, _)| *index)
            .collect();
        if next.is_empty() {
            break;
        }
        doomed.extend(next);
    }
    doomed.remove(0);
    doomed
}

/// Dependency label → result summary for the plans in `deps`.
pub fn collect_results(
    deps: &[usize],
    completed: &BTreeMap<usize, String>,
    plans: &HashMap<usize, DaemonPlan>,
) -> BTreeMap<String, String> {
    deps.iter()
        .filter_map(|d| {
            let summary = completed.get(d)?;
            let label = plans
                .get(d)
                .map(DaemonPlan::display_label)
                .unwrap_or_else(|| format!("Daemon {d}"));
            Some((label, summary.clone()))
        })
        .collect()
}

/// One planned daemon and the subtask it reports into.
struct Member {
    plan: DaemonPlan,
    daemon: Daemon,
    task: Task,
}

/// Bookkeeping for one multi-daemon run.
struct Schedule {
    members: HashMap<usize, Member>,
    /// Not yet launched, by plan index, with their dependencies.
    pending: BTreeMap<usize, Vec<usize>>,
    /// Completed plan index → result summary.
    completed: BTreeMap<usize, String>,
    running: usize,
    /// Cloned into each runner. Dropped once nothing is left to launch so the
    /// channel closes when the last runner exits.
    sender: Option<mpsc::Sender<DaemonUpdate>>,
}

impl Schedule {
    fn plans(&self) -> HashMap<usize, DaemonPlan> {
        self.members.iter().map(|(i, m)| (*i, m.plan.clone())).collect()
    }

    fn ready(&self) -> Vec<usize> {
        self.pending
            .iter()
            .filter(|(_, deps)| deps_met(deps, &self.completed))
            .map(|(index, _)| *index)
            .collect()
    }

    fn label(&self, index: usize) -> String {
        self.members
            .get(&index)
            .map(|m| m.plan.display_label())
            .unwrap_or_else(|| format!("Daemon {index}"))
    }
}

impl Orchestrator {
    pub(crate) async fn run_multi(&self, turn: &Turn, plans: Vec<DaemonPlan>) {
        let parent = &turn.task;
        if plans.is_empty() {
            error!(task_id = %parent.id, "Multi-daemon mode without plans");
            best_effort("record error", self.stores.tasks.set_error(parent.id, "no daemon plans").await);
            self.untrack(parent).await;
            self.publish(&turn.user_id, Event::error("no daemon plans in classification"));
            return;
        }

        best_effort(
            "set task mode",
            self.stores
                .tasks
                .update_mode_and_status(parent.id, TaskMode::MultiDaemon, TaskStatus::Executing)
                .await,
        );
        self.publish(
            &turn.user_id,
            Event::TaskUpdated {
                task_id: parent.id,
                goal: parent.goal.clone(),
            },
        );
        info!(task_id = %parent.id, daemons = plans.len(), "Starting multi-daemon run");

        let (tx, mut rx) = mpsc::channel(UPDATE_BUFFER);
        let mut schedule = Schedule {
            members: HashMap::new(),
            pending: BTreeMap::new(),
            completed: BTreeMap::new(),
            running: 0,
            sender: Some(tx),
        };
        for plan in plans {
            if let Some(member) = self.enlist(turn, plan).await {
                schedule.pending.insert(member.plan.index, member.plan.depends_on.clone());
                schedule.members.insert(member.plan.index, member);
            }
        }

        self.launch_ready(turn, &mut schedule).await;
        if schedule.pending.is_empty() {
            schedule.sender = None;
        }

        while schedule.running > 0 {
            let Some(update) = rx.recv().await else {
                break;
            };
            let index = update.index;
            let kind = update.kind.clone();
            self.publish(&turn.user_id, Event::DaemonUpdate { update });

            match kind {
                UpdateKind::Completed { result } => {
                    schedule.running -= 1;
                    self.member_completed(turn, &mut schedule, index, result.summary).await;
                }
                UpdateKind::Failed { error, .. } => {
                    schedule.running -= 1;
                    self.member_failed(turn, &mut schedule, index, error).await;
                }
                _ => {}
            }

            if schedule.pending.is_empty() {
                schedule.sender = None;
            }
        }

        for (index, _) in std::mem::take(&mut schedule.pending) {
            if let Some(member) = schedule.members.get(&index) {
                warn!(index, label = %member.plan.display_label(), "Plan never became ready");
                best_effort(
                    "record error",
                    self.stores.tasks.set_error(member.task.id, "dependency never completed").await,
                );
            }
        }

        self.synthesize(turn, &schedule).await;
    }

    /// Persist the subtask and daemon for one plan.
    async fn enlist(&self, turn: &Turn, plan: DaemonPlan) -> Option<Member> {
        let parent = &turn.task;
        let mut task = Task::new(turn.session_id, &turn.user_id, &plan.task_summary)
            .with_source(TaskSource::Decomposition);
        task.parent_task_id = Some(parent.id);
        task.project_id = parent.project_id;
        task.mode = TaskMode::Daemon;
        task.model_id = turn.model.clone();
        if let Err(e) = self.stores.tasks.create(task.clone()).await {
            error!(index = plan.index, error = %e, "Failed to create subtask, dropping plan");
            return None;
        }
        best_effort("link subtask", self.stores.tasks.add_sub_task(parent.id, task.id).await);

        let daemon = self.build_daemon(turn, &plan, task.id).await;
        if let Err(e) = self.stores.daemons.create(daemon.clone()).await {
            error!(index = plan.index, error = %e, "Failed to persist daemon, dropping plan");
            best_effort(
                "record error",
                self.stores.tasks.set_error(task.id, &format!("failed to create daemon: {e}")).await,
            );
            return None;
        }
        best_effort("link daemon", self.stores.tasks.set_daemon_id(task.id, daemon.id).await);
        Some(Member { plan, daemon, task })
    }

    async fn launch_ready(&self, turn: &Turn, schedule: &mut Schedule) {
        for index in schedule.ready() {
            schedule.pending.remove(&index);
            self.start(turn, schedule, index).await;
        }
    }

    async fn start(&self, turn: &Turn, schedule: &mut Schedule, index: usize) {
        let plans = schedule.plans();
        let Some(sender) = schedule.sender.clone() else {
            return;
        };
        let Some(member) = schedule.members.get_mut(&index) else {
            return;
        };

        let Some(guard) = self.slots.try_acquire(&turn.user_id, member.daemon.id, &turn.cancel) else {
            best_effort("record error", self.stores.tasks.set_error(member.task.id, AT_CAPACITY).await);
            self.publish(
                &turn.user_id,
                Event::error(format!(
                    "cannot deploy daemon {}: at capacity",
                    member.plan.display_label()
                )),
            );
            return;
        };

        member.daemon.dependency_results = collect_results(&member.plan.depends_on, &schedule.completed, &plans);
        best_effort(
            "start subtask",
            self.stores.tasks.update_status(member.task.id, TaskStatus::Executing).await,
        );
        best_effort(
            "track active daemon",
            self.stores.sessions.add_active_daemon(turn.session_id, member.daemon.id).await,
        );
        debug!(
            index,
            label = %member.plan.display_label(),
            dependencies = member.daemon.dependency_results.len(),
            "Launching planned daemon"
        );
        self.publish(
            &turn.user_id,
            Event::DaemonDeployed {
                daemon_id: member.daemon.id,
                task_id: turn.task.id,
                role: member.daemon.role.clone(),
                role_label: member.daemon.role_label.clone(),
                task_summary: member.plan.task_summary.clone(),
            },
        );

        self.launch(turn, member.daemon.clone(), guard, &turn.message, sender, &turn.skills);
        schedule.running += 1;
    }

    async fn member_completed(&self, turn: &Turn, schedule: &mut Schedule, index: usize, summary: String) {
        let Some(member) = schedule.members.get(&index) else {
            warn!(index, "Completion for an unknown plan");
            return;
        };
        info!(index, label = %member.plan.display_label(), "Planned daemon completed");
        let (task_id, daemon_id) = (member.task.id, member.daemon.id);

        best_effort(
            "record result",
            self.stores.tasks.set_result(task_id, TaskResult::summary(summary.clone())).await,
        );
        best_effort(
            "untrack daemon",
            self.stores.sessions.remove_active_daemon(turn.session_id, daemon_id).await,
        );
        self.daemon_finished(turn, daemon_id, true).await;

        schedule.completed.insert(index, summary);
        self.launch_ready(turn, schedule).await;
    }

    async fn member_failed(&self, turn: &Turn, schedule: &mut Schedule, index: usize, error: String) {
        let Some(member) = schedule.members.get(&index) else {
            warn!(index, "Failure for an unknown plan");
            return;
        };
        warn!(index, label = %member.plan.display_label(), error = %error, "Planned daemon failed");
        let (task_id, daemon_id) = (member.task.id, member.daemon.id);

        best_effort("record error", self.stores.tasks.set_error(task_id, &error).await);
        best_effort(
            "untrack daemon",
            self.stores.sessions.remove_active_daemon(turn.session_id, daemon_id).await,
        );
        self.daemon_finished(turn, daemon_id, false).await;

        for doomed in cascade(index, &schedule.pending) {
            schedule.pending.remove(&doomed);
            let Some(member) = schedule.members.get(&doomed) else {
                continue;
            };
            info!(index = doomed, failed_dependency = index, "Skipping plan after dependency failure");
            best_effort(
                "record error",
                self.stores.tasks.set_error(member.task.id, "dependency failed").await,
            );
            best_effort(
                "fail daemon",
                self.stores
                    .daemons
                    .update_status(member.daemon.id, DaemonStatus::Failed, "Dependency failed", 0.0)
                    .await,
            );
            self.publish(
                &turn.user_id,
                Event::DaemonFailed {
                    daemon_id: member.daemon.id,
                    index: doomed,
                    role: schedule.label(doomed),
                    error: format!("dependency {} failed", schedule.label(index)),
                    can_retry: false,
                },
            );
        }
    }

    async fn synthesize(&self, turn: &Turn, schedule: &Schedule) {
        let parent = &turn.task;
        if self.is_settled(parent.id).await {
            info!(task_id = %parent.id, "Parent task already settled, skipping synthesis");
            return;
        }
        let outcomes: Vec<DaemonOutcome> = schedule
            .completed
            .iter()
            .filter_map(|(index, summary)| {
                let member = schedule.members.get(index)?;
                Some(DaemonOutcome {
                    label: member.plan.display_label(),
                    role: member.daemon.role.clone(),
                    summary: summary.clone(),
                })
            })
            .collect();

        if outcomes.is_empty() {
            let error = "no daemons completed successfully";
            warn!(task_id = %parent.id, "Multi-daemon run produced nothing");
            best_effort("record error", self.stores.tasks.set_error(parent.id, error).await);
            self.close_task(parent, false).await;
            self.publish(
                &turn.user_id,
                Event::TaskFailed {
                    task_id: parent.id,
                    error: error.into(),
                },
            );
            return;
        }

        let prompt = synthesis_prompt(&outcomes);
        let content = match self
            .chat
            .complete_sync(turn.model(), SYNTHESIZER_SYSTEM, vec![conclave_core::Message::user(prompt)])
            .await
        {
            Ok(content) if !content.trim().is_empty() => content,
            Ok(_) => {
                warn!(task_id = %parent.id, "Empty synthesis, concatenating results");
                synthesis_fallback(&outcomes)
            }
            Err(e) => {
                warn!(task_id = %parent.id, error = %e, "Synthesis failed, concatenating results");
                synthesis_fallback(&outcomes)
            }
        };

        info!(task_id = %parent.id, completed = outcomes.len(), "Multi-daemon run synthesized");
        best_effort(
            "record result",
            self.stores.tasks.set_result(parent.id, TaskResult::summary(content.clone())).await,
        );
        self.close_task(parent, true).await;
        self.respond(turn, parent.id, content.clone());
        self.publish(
            &turn.user_id,
            Event::TaskCompleted {
                task_id: parent.id,
                summary: content,
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::UserRequest;
    use crate::test_support::harness_with;
    use conclave_agent::test_helpers::{FnProvider, make_text_response, system_prompt};
    use conclave_core::error::ProviderError;
    use conclave_core::store::TaskStore as _;
    use std::sync::Arc;

    fn pending(entries: &[(usize, &[usize])]) -> BTreeMap<usize, Vec<usize>> {
        entries.iter().map(|(i, deps)| (*i, deps.to_vec())).collect()
    }

    #[test]
    fn deps_met_requires_every_dependency() {
        let completed: BTreeMap<usize, String> = [(0, "a".to_string())].into();
        assert!(deps_met(&[], &completed));
        assert!(deps_met(&[0], &completed));
        assert!(!deps_met(&[0, 1], &completed));
    }

    #[test]
    fn cascade_is_transitive() {
        // 0 fails; 1 and 2 need 0; 3 needs 2; 4 is independent.
        let pending = pending(&[(1, &[0]), (2, &[0]), (3, &[2]), (4, &[])]);
        let mut doomed = cascade(0, &pending);
        doomed.sort();
        assert_eq!(doomed, vec![1, 2, 3]);
    }

    #[test]
    fn cascade_terminates_on_cycles() {
        let pending = pending(&[(1, &[2]), (2, &[1, 0]), (3, &[3])]);
        let mut doomed = cascade(0, &pending);
        doomed.sort();
        assert_eq!(doomed, vec![1, 2]);
        assert!(cascade(9, &pending).is_empty());
    }

    #[test]
    fn dependency_results_are_labelled() {
        let plans: HashMap<usize, DaemonPlan> = [
            (
                0,
                DaemonPlan {
                    index: 0,
                    role_label: "Research Daemon".into(),
                    ..Default::default()
                },
            ),
            (1, DaemonPlan { index: 1, ..Default::default() }),
        ]
        .into();
        let completed: BTreeMap<usize, String> = [(0, "facts".to_string()), (1, "more".to_string())].into();

        let results = collect_results(&[0, 1, 2], &completed, &plans);
        assert_eq!(results.get("Research Daemon").map(String::as_str), Some("facts"));
        assert_eq!(results.get("Daemon 1").map(String::as_str), Some("more"));
        assert_eq!(results.len(), 2);
    }

    const PLAN: &str = r#"{"mode":"multi_daemon","daemons":[
        {"index":0,"role":"researcher","role_label":"Research Daemon","task_summary":"gather facts"},
        {"index":1,"role":"analyst","role_label":"Analysis Daemon","task_summary":"crunch numbers"},
        {"index":2,"role":"writer","role_label":"Writer Daemon","task_summary":"write report","depends_on":[0,1]}
    ]}"#;

    fn scripted(fail_research: bool) -> Arc<FnProvider> {
        Arc::new(FnProvider::new(move |req| {
            let system = system_prompt(req);
            if system.starts_with("You are a task classifier.") {
                return Ok(make_text_response(PLAN));
            }
            if system.starts_with(SYNTHESIZER_SYSTEM) {
                return Ok(make_text_response("Combined report."));
            }
            if system.starts_with("You are a Research Daemon") {
                if fail_research {
                    return Err(ProviderError::AuthenticationFailed("bad key".into()));
                }
                return Ok(make_text_response("Final result: facts gathered."));
            }
            if system.starts_with("You are a Analysis Daemon") {
                return Ok(make_text_response("Final result: numbers crunched."));
            }
            if system.starts_with("You are a Writer Daemon") {
                assert!(system.contains("## Previous Daemon Results"));
                assert!(system.contains("### Research Daemon\nFinal result: facts gathered."));
                assert!(system.contains("### Analysis Daemon\nFinal result: numbers crunched."));
                return Ok(make_text_response("Final result: report written."));
            }
            panic!("unexpected request: {system}");
        }))
    }

    #[tokio::test]
    async fn dependent_plan_waits_and_results_are_synthesized() {
        let h = harness_with(scripted(false));
        let reply = h.orchestrator.run_sync(UserRequest::new("u1", "full report please")).await;
        assert_eq!(reply, "Combined report.");

        let tasks = h.stores.tasks.all().await;
        let parent = tasks.iter().find(|t| t.parent_task_id.is_none()).unwrap();
        assert_eq!(parent.mode, TaskMode::MultiDaemon);
        assert_eq!(parent.status, TaskStatus::Completed);
        assert_eq!(parent.sub_task_ids.len(), 3);
        let subtasks: Vec<_> = tasks.iter().filter(|t| t.parent_task_id == Some(parent.id)).collect();
        assert!(subtasks.iter().all(|t| t.status == TaskStatus::Completed));
        assert!(subtasks.iter().all(|t| t.source == TaskSource::Decomposition));
        assert_eq!(h.orchestrator.slots().in_use("u1"), 0);
    }

    #[tokio::test]
    async fn plans_beyond_capacity_fail_and_the_run_still_ends() {
        let mut plans: Vec<serde_json::Value> = (0..7)
            .map(|i| {
                serde_json::json!({
                    "index": i,
                    "role": "worker",
                    "role_label": format!("Worker {i}"),
                    "task_summary": format!("job {i}"),
                })
            })
            .collect();
        plans.push(serde_json::json!({
            "index": 7,
            "role": "writer",
            "role_label": "Writer",
            "task_summary": "summarize job 5",
            "depends_on": [5],
        }));
        let classification = serde_json::json!({"mode": "multi_daemon", "daemons": plans}).to_string();

        let provider = Arc::new(FnProvider::new(move |req| {
            let system = system_prompt(req);
            if system.starts_with("You are a task classifier.") {
                return Ok(make_text_response(&classification));
            }
            if system.starts_with(SYNTHESIZER_SYSTEM) {
                return Ok(make_text_response("Combined."));
            }
            assert!(system.starts_with("You are a Worker"), "unexpected request: {system}");
            Ok(make_text_response("Final result: job done."))
        }));
        let h = harness_with(provider);
        assert_eq!(h.orchestrator.slots().cap(), 5);

        let reply = h.orchestrator.run_sync(UserRequest::new("u1", "run every job")).await;
        assert_eq!(reply, "Combined.");

        let tasks = h.stores.tasks.all().await;
        let subtask = |prompt: &str| tasks.iter().find(|t| t.prompt == prompt).unwrap();
        for i in 0..5 {
            assert_eq!(subtask(&format!("job {i}")).status, TaskStatus::Completed);
        }
        for i in 5..7 {
            let t = subtask(&format!("job {i}"));
            assert_eq!(t.status, TaskStatus::Failed);
            assert_eq!(t.error.as_deref(), Some(AT_CAPACITY));
        }
        let writer = subtask("summarize job 5");
        assert_eq!(writer.status, TaskStatus::Failed);
        assert_eq!(writer.error.as_deref(), Some("dependency never completed"));

        let parent = tasks.iter().find(|t| t.parent_task_id.is_none()).unwrap();
        assert_eq!(parent.status, TaskStatus::Completed);
        assert_eq!(h.orchestrator.slots().in_use("u1"), 0);
    }

    // The failing daemon backs off between retries; paused time skips the waits.
    #[tokio::test(start_paused = true)]
    async fn failure_cascades_to_dependents() {
        let h = harness_with(scripted(true));
        let mut rx = h.orchestrator.events().subscribe("u1");
        let task_id = h
            .orchestrator
            .handle_user_message(UserRequest::new("u1", "full report please"))
            .await
            .unwrap();

        let parent = h.stores.tasks.get(task_id).await.unwrap().unwrap();
        assert_eq!(parent.status, TaskStatus::Completed);
        assert_eq!(parent.summary(), Some("Combined report."));

        let tasks = h.stores.tasks.all().await;
        let writer = tasks.iter().find(|t| t.prompt == "write report").unwrap();
        assert_eq!(writer.status, TaskStatus::Failed);
        assert_eq!(writer.error.as_deref(), Some("dependency failed"));
        let analysis = tasks.iter().find(|t| t.prompt == "crunch numbers").unwrap();
        assert_eq!(analysis.status, TaskStatus::Completed);

        let mut cascaded = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let Event::DaemonFailed { index, can_retry, .. } = &*event {
                assert!(!can_retry);
                cascaded.push(*index);
            }
        }
        assert_eq!(cascaded, vec![2]);
    }
}
