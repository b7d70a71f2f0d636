//! User-requested retries of earlier tasks.

use conclave_core::daemon::DaemonStatus;
use conclave_core::error::OrchestratorError;
use conclave_core::event::Event;
use conclave_core::plan::{ClassificationResult, Mode};
use conclave_core::session::Session;
use conclave_core::task::{Task, TaskSource, TaskStatus};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::classifier::skeleton_plan;
use crate::prompts::manual_retry_message;
use crate::service::{Orchestrator, best_effort};

impl Orchestrator {
    /// Retry `task_id` as a new task linked to its root. A task still
    /// running is cancelled first. Returns the new task's id.
    pub async fn retry_task(&self, user_id: &str, task_id: Uuid) -> Result<Uuid, OrchestratorError> {
        let original = self
            .stores
            .tasks
            .get(task_id)
            .await?
            .filter(|t| t.user_id == user_id)
            .ok_or(OrchestratorError::TaskNotFound(task_id))?;

        match original.status {
            TaskStatus::Executing | TaskStatus::WaitingInput => self.cancel_for_retry(&original).await,
            status if !status.is_terminal() => {
                return Err(OrchestratorError::NotTerminal {
                    status: status.to_string(),
                });
            }
            _ => {}
        }

        let root_id = self.stores.tasks.root_task_id(task_id).await?;
        let previous = self.stores.tasks.count_manual_retries(root_id).await?;
        let limit = self.config.limits.max_manual_retries;
        if previous >= limit {
            warn!(task_id = %task_id, root_id = %root_id, limit, "Manual retry limit reached");
            return Err(OrchestratorError::RetryLimit { limit });
        }
        let attempt = previous + 1;

        let message = manual_retry_message(
            &original.prompt,
            original.error.as_deref(),
            original.summary(),
        );
        self.publish(
            user_id,
            Event::thinking(format!("Retrying task (attempt {attempt}/{limit})...")),
        );

        let session = match self.stores.sessions.get_or_create(user_id).await {
            Ok(session) => session,
            Err(e) => {
                self.publish(user_id, Event::error("failed to get session for retry"));
                return Err(OrchestratorError::SessionUnavailable(e.to_string()));
            }
        };

        let mut task = Task::new(session.id, user_id, &original.prompt).with_source(TaskSource::ManualRetry);
        task.goal = format!("[Retry {attempt}] {}", original.goal);
        task.model_id = original.model_id.clone();
        task.project_id = original.project_id;
        task.retry_of_task_id = Some(root_id);
        task.manual_retry_count = attempt;
        self.stores.tasks.create(task.clone()).await?;
        best_effort(
            "track active task",
            self.stores.sessions.add_active_task(session.id, task.id).await,
        );
        self.publish(
            user_id,
            Event::TaskCreated {
                task_id: task.id,
                prompt: task.prompt.clone(),
            },
        );
        info!(task_id = %task.id, root_id = %root_id, attempt, "Manual retry started");

        let cancel = CancellationToken::new();
        let work = self.dispatch_retry(&session, task.clone(), message, cancel.clone());
        self.under_ceiling(&task, cancel, work).await?;
        Ok(task.id)
    }

    /// Stop a running task and every daemon working for it.
    async fn cancel_for_retry(&self, task: &Task) {
        info!(task_id = %task.id, "Cancelling running task before retry");

        let mut daemon_ids: Vec<Uuid> = task.daemon_id.into_iter().collect();
        for sub_id in &task.sub_task_ids {
            if let Some(daemon_id) = best_effort("load subtask", self.stores.tasks.get(*sub_id).await)
                .flatten()
                .and_then(|t| t.daemon_id)
            {
                daemon_ids.push(daemon_id);
            }
        }

        for daemon_id in daemon_ids {
            self.slots.cancel(daemon_id);
            best_effort(
                "fail daemon",
                self.stores
                    .daemons
                    .update_status(daemon_id, DaemonStatus::Failed, "cancelled for retry", 0.0)
                    .await,
            );
            best_effort(
                "untrack daemon",
                self.stores.sessions.remove_active_daemon(task.session_id, daemon_id).await,
            );
        }

        best_effort(
            "cancel task",
            self.stores.tasks.update_status(task.id, TaskStatus::Cancelled).await,
        );
        best_effort(
            "untrack active task",
            self.stores.sessions.remove_active_task(task.session_id, task.id).await,
        );
        best_effort(
            "track recent task",
            self.stores.sessions.add_recent_task(task.session_id, task.id).await,
        );
        self.publish(
            &task.user_id,
            Event::TaskStatusChanged {
                task_id: task.id,
                status: TaskStatus::Cancelled.to_string(),
            },
        );

        // Let cancelled runners publish their last update first.
        tokio::time::sleep(Duration::from_millis(self.config.limits.retry_cancel_grace_ms)).await;
    }

    async fn dispatch_retry(&self, session: &Session, task: Task, message: String, cancel: CancellationToken) {
        let turn = self.prepare(session, task, message, Vec::new(), cancel).await;

        self.publish(&turn.user_id, Event::thinking("Analyzing your request..."));
        let classification = match self
            .classifier
            .classify(&turn.user_id, turn.model(), turn.history.clone(), &turn.active)
            .await
        {
            Ok(classification) => classification,
            Err(e) => {
                warn!(task_id = %turn.task.id, error = %e, "Retry classification failed, using a single daemon");
                ClassificationResult::with_plans(Mode::Daemon, Vec::new())
            }
        };
        self.publish_classified(&turn, &classification);

        match classification.mode {
            Mode::Quick => self.run_quick(&turn).await,
            Mode::MultiDaemon if !classification.daemons.is_empty() => {
                self.run_multi(&turn, classification.daemons).await
            }
            _ => {
                let mut plans = classification.daemons;
                if plans.is_empty() {
                    plans.push(skeleton_plan(&turn.message));
                }
                self.run_daemon(&turn, plans).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::service::UserRequest;
    use crate::test_support::{harness, harness_with};
    use async_trait::async_trait;
    use conclave_agent::test_helpers::{SequentialMockProvider, make_text_response, system_prompt};
    use conclave_core::error::{OrchestratorError, ProviderError};
    use conclave_core::event::Event;
    use conclave_core::provider::{Provider, ProviderRequest, ProviderResponse};
    use conclave_core::store::{SessionStore as _, TaskStore as _};
    use conclave_core::task::{Task, TaskSource, TaskStatus};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use uuid::Uuid;

    async fn failed_quick_task(h: &crate::test_support::Harness) -> Uuid {
        h.orchestrator
            .handle_user_message(UserRequest::new("u1", "summarize my inbox"))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn retry_links_to_root_and_carries_the_error() {
        let provider = Arc::new(SequentialMockProvider::scripted(vec![
            Ok(make_text_response(r#"{"mode":"quick"}"#)),
            Err(ProviderError::Network("mail server down".into())),
            Ok(make_text_response(r#"{"mode":"quick"}"#)),
            Ok(make_text_response("Inbox summarized.")),
        ]));
        let h = harness_with(provider.clone());
        let first = failed_quick_task(&h).await;

        let retry_id = h.orchestrator.retry_task("u1", first).await.unwrap();
        let retry = h.stores.tasks.get(retry_id).await.unwrap().unwrap();
        assert_eq!(retry.source, TaskSource::ManualRetry);
        assert_eq!(retry.retry_of_task_id, Some(first));
        assert_eq!(retry.manual_retry_count, 1);
        assert_eq!(retry.goal, "[Retry 1] summarize my inbox");
        assert_eq!(retry.status, TaskStatus::Completed);

        let requests = provider.requests();
        let classified = requests[2].messages.last().unwrap();
        assert!(classified.content.starts_with("RETRY: Previous attempt failed."));
        assert!(classified.content.contains("Previous error: "));
        assert!(classified.content.contains("mail server down"));
    }

    #[tokio::test]
    async fn retry_limit_creates_no_task() {
        let provider = SequentialMockProvider::scripted(vec![
            Ok(make_text_response(r#"{"mode":"quick"}"#)),
            Err(ProviderError::Network("down".into())),
        ]);
        let h = harness(provider);
        let first = failed_quick_task(&h).await;

        let session = h.stores.sessions.get_or_create("u1").await.unwrap();
        for n in 1..=3 {
            let mut earlier = Task::new(session.id, "u1", "summarize my inbox").with_source(TaskSource::ManualRetry);
            earlier.retry_of_task_id = Some(first);
            earlier.manual_retry_count = n;
            earlier.status = TaskStatus::Failed;
            h.stores.tasks.create(earlier).await.unwrap();
        }
        let before = h.stores.tasks.all().await.len();

        let err = h.orchestrator.retry_task("u1", first).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::RetryLimit { limit: 3 }));
        assert_eq!(h.stores.tasks.all().await.len(), before);
    }

    #[tokio::test]
    async fn pending_and_foreign_tasks_are_rejected() {
        let h = harness(SequentialMockProvider::new(vec![]));
        let session = h.stores.sessions.get_or_create("u1").await.unwrap();
        let pending = Task::new(session.id, "u1", "queued");
        h.stores.tasks.create(pending.clone()).await.unwrap();

        let err = h.orchestrator.retry_task("u1", pending.id).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::NotTerminal { ref status } if status == "pending"));

        let err = h.orchestrator.retry_task("someone-else", pending.id).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::TaskNotFound(id) if id == pending.id));
    }

    #[tokio::test]
    async fn running_task_is_cancelled_before_retry() {
        let provider = SequentialMockProvider::new(vec![
            make_text_response(r#"{"mode":"quick"}"#),
            make_text_response("fresh answer"),
        ]);
        let h = harness(provider);
        let session = h.stores.sessions.get_or_create("u1").await.unwrap();
        let mut running = Task::new(session.id, "u1", "long job");
        running.status = TaskStatus::Executing;
        h.stores.tasks.create(running.clone()).await.unwrap();

        let retry_id = h.orchestrator.retry_task("u1", running.id).await.unwrap();
        let old = h.stores.tasks.get(running.id).await.unwrap().unwrap();
        assert_eq!(old.status, TaskStatus::Cancelled);
        let retry = h.stores.tasks.get(retry_id).await.unwrap().unwrap();
        assert_eq!(retry.summary(), Some("fresh answer"));
    }

    /// Plans one daemon whose model call never returns, then answers the
    /// retry in quick mode.
    struct StallingProvider {
        classifications: Mutex<usize>,
    }

    #[async_trait]
    impl Provider for StallingProvider {
        fn name(&self) -> &str {
            "stalling"
        }

        async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
            let system = system_prompt(&request).to_string();
            if system.starts_with("You are a task classifier.") {
                let mut n = self.classifications.lock().unwrap();
                *n += 1;
                return Ok(make_text_response(if *n == 1 {
                    r#"{"mode":"daemon","daemons":[{"role":"researcher","task_summary":"long job"}]}"#
                } else {
                    r#"{"mode":"quick"}"#
                }));
            }
            if system.starts_with("You are a ") {
                std::future::pending::<()>().await;
            }
            Ok(make_text_response("fresh answer"))
        }
    }

    #[tokio::test]
    async fn cancelled_daemon_does_not_fail_the_task_again() {
        let h = harness(StallingProvider {
            classifications: Mutex::new(0),
        });
        let orchestrator = h.orchestrator.clone();
        let first = tokio::spawn(async move {
            orchestrator
                .handle_user_message(UserRequest::new("u1", "long job"))
                .await
        });

        let running = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if let Some(task) = h.stores.tasks.all().await.into_iter().find(|t| t.daemon_id.is_some()) {
                    return task;
                }
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        assert_eq!(running.status, TaskStatus::Executing);

        let mut rx = h.orchestrator.events().subscribe("u1");
        let retry_id = h.orchestrator.retry_task("u1", running.id).await.unwrap();
        assert_eq!(first.await.unwrap().unwrap(), running.id);

        let old = h.stores.tasks.get(running.id).await.unwrap().unwrap();
        assert_eq!(old.status, TaskStatus::Cancelled);
        let retry = h.stores.tasks.get(retry_id).await.unwrap().unwrap();
        assert_eq!(retry.summary(), Some("fresh answer"));

        while let Ok(event) = rx.try_recv() {
            if let Event::TaskFailed { task_id, .. } = &*event {
                assert_ne!(*task_id, running.id);
            }
        }
        let session = h.stores.sessions.get_or_create("u1").await.unwrap();
        assert_eq!(session.failed_tasks, 0);
        assert_eq!(session.completed_tasks, 1);
        assert_eq!(h.orchestrator.slots().in_use("u1"), 0);
    }
}
