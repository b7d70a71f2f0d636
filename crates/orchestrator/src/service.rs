//! The orchestrator entry point.
//!
//! [`Orchestrator::handle_user_message`] runs one request end to end:
//! session and task bookkeeping, context assembly, classification, then
//! dispatch to quick, status, single-daemon or multi-daemon mode. It returns
//! once the dispatched mode has published its outcome, bounded by the
//! configured request ceiling.

use conclave_agent::{ChatService, PhraseCompletion, RunnerDeps};
use conclave_config::OrchestratorConfig;
use conclave_core::error::OrchestratorError;
use conclave_core::event::{Event, EventBus};
use conclave_core::plan::{ClassificationResult, Mode};
use conclave_core::provider::Provider;
use conclave_core::session::{Session, Skill};
use conclave_core::store::{StoreResult, Stores};
use conclave_core::task::{Task, TaskMode, TaskSource, TaskStatus};
use conclave_core::tool::{RemoteBridge, ToolRegistry};
use conclave_tools::{ToolRouter, ToolSelector};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::classifier::{Classifier, override_plan, template_plan};
use crate::learning::LearningExtractor;
use crate::prompts::OrchestratorPrompt;
use crate::slots::SlotManager;
use crate::turn::{HISTORY_TASKS, MAX_SAVED_DOCUMENTS, MAX_SKILLS, Turn, dedupe, history_messages, with_reference_documents};

/// Engram summaries shown in the orchestrator prompt.
const PROMPT_ENGRAMS: usize = 10;

const SYNC_ERROR_REPLY: &str = "I encountered an error processing your request.";
const SYNC_EMPTY_REPLY: &str = "No response generated.";

/// One inbound user message and everything that shapes how it runs.
#[derive(Debug, Clone, Default)]
pub struct UserRequest {
    pub user_id: String,
    pub message: String,
    pub model: Option<String>,
    /// Only `daemon` and `multi_daemon` override classification.
    pub mode: Option<Mode>,
    /// Deploy this template directly, skipping classification.
    pub template_slug: Option<String>,
    pub project_id: Option<Uuid>,
    /// Reuse this task instead of opening a new one.
    pub follow_up_task_id: Option<Uuid>,
    pub routine_id: Option<Uuid>,
    pub skill_ids: Vec<String>,
    pub save_ids: Vec<Uuid>,
}

impl UserRequest {
    pub fn new(user_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            message: message.into(),
            ..Default::default()
        }
    }

    pub fn with_model(mut self, model: Option<&str>) -> Self {
        self.model = model.filter(|m| !m.is_empty()).map(str::to_string);
        self
    }

    pub fn with_mode(mut self, mode: Mode) -> Self {
        self.mode = Some(mode);
        self
    }

    pub fn with_template(mut self, slug: impl Into<String>) -> Self {
        self.template_slug = Some(slug.into());
        self
    }

    pub fn with_project(mut self, project_id: Uuid) -> Self {
        self.project_id = Some(project_id);
        self
    }

    pub fn follow_up(mut self, task_id: Uuid) -> Self {
        self.follow_up_task_id = Some(task_id);
        self
    }

    pub fn routine(mut self, routine_id: Uuid) -> Self {
        self.routine_id = Some(routine_id);
        self
    }

    pub fn with_skills(mut self, skill_ids: Vec<String>) -> Self {
        self.skill_ids = skill_ids;
        self
    }

    pub fn with_saves(mut self, save_ids: Vec<Uuid>) -> Self {
        self.save_ids = save_ids;
        self
    }
}

/// Log a failed store call and carry on without its value.
pub(crate) fn best_effort<T>(op: &str, result: StoreResult<T>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(op, error = %e, "Store call failed");
            None
        }
    }
}

#[derive(Clone)]
pub struct Orchestrator {
    pub(crate) config: Arc<OrchestratorConfig>,
    pub(crate) stores: Stores,
    pub(crate) events: Arc<EventBus>,
    pub(crate) chat: ChatService,
    pub(crate) classifier: Classifier,
    pub(crate) selector: Arc<ToolSelector>,
    pub(crate) runner: RunnerDeps,
    pub(crate) slots: Arc<SlotManager>,
    pub(crate) learning: LearningExtractor,
    registry: Arc<ToolRegistry>,
}

impl Orchestrator {
    pub fn new(
        config: OrchestratorConfig,
        provider: Arc<dyn Provider>,
        registry: Arc<ToolRegistry>,
        stores: Stores,
    ) -> Self {
        let router = Arc::new(ToolRouter::new(registry.clone()));
        let chat = ChatService::new(provider.clone(), router.clone(), config.default_model.clone());
        let runner = RunnerDeps {
            provider,
            router,
            daemons: stores.daemons.clone(),
            engrams: stores.engrams.clone(),
            completion: Arc::new(PhraseCompletion),
            default_model: config.default_model.clone(),
            context_window: config.daemon.context_window,
        };
        info!(
            model = %config.default_model,
            max_daemons = config.limits.max_daemons_per_user,
            tools = registry.len(),
            "Orchestrator ready"
        );

        Self {
            classifier: Classifier::new(chat.clone(), stores.templates.clone()),
            learning: LearningExtractor::new(chat.clone(), stores.daemons.clone(), stores.templates.clone()),
            selector: Arc::new(ToolSelector::new(registry.clone(), None)),
            slots: Arc::new(SlotManager::new(config.limits.max_daemons_per_user)),
            events: Arc::new(EventBus::default()),
            config: Arc::new(config),
            stores,
            chat,
            runner,
            registry,
        }
    }

    /// Route tools the user's client advertises through `bridge`.
    pub fn with_bridge(mut self, bridge: Arc<dyn RemoteBridge>) -> Self {
        let timeout = Duration::from_secs(self.config.daemon.remote_tool_timeout_secs);
        let router = Arc::new(ToolRouter::new(self.registry.clone()).with_bridge(bridge.clone(), timeout));
        self.chat = ChatService::new(self.chat.provider().clone(), router.clone(), self.config.default_model.clone());
        self.classifier = Classifier::new(self.chat.clone(), self.stores.templates.clone());
        self.learning = LearningExtractor::new(
            self.chat.clone(),
            self.stores.daemons.clone(),
            self.stores.templates.clone(),
        );
        self.selector = Arc::new(ToolSelector::new(self.registry.clone(), Some(bridge)));
        self.runner.router = router;
        self
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn slots(&self) -> &Arc<SlotManager> {
        &self.slots
    }

    pub fn stores(&self) -> &Stores {
        &self.stores
    }

    pub(crate) fn publish(&self, user_id: &str, event: Event) {
        self.events.publish(user_id, event);
    }

    /// Run one request to completion. Returns the id of the task it ran under.
    pub async fn handle_user_message(&self, request: UserRequest) -> Result<Uuid, OrchestratorError> {
        let user_id = request.user_id.clone();
        let session = match self.stores.sessions.get_or_create(&user_id).await {
            Ok(session) => session,
            Err(e) => {
                error!(user_id = %user_id, error = %e, "Session lookup failed");
                self.publish(&user_id, Event::error("failed to get session"));
                return Err(OrchestratorError::SessionUnavailable(e.to_string()));
            }
        };
        best_effort("touch session", self.stores.sessions.touch(session.id).await);

        let task = self.open_task(&session, &request).await?;
        info!(
            user_id = %user_id,
            task_id = %task.id,
            routine = task.is_routine(),
            "Handling user message"
        );

        let cancel = CancellationToken::new();
        let work = self.process(&session, &request, task.clone(), cancel.clone());
        self.under_ceiling(&task, cancel, work).await?;
        Ok(task.id)
    }

    /// Bound `work` by the request ceiling. On expiry the request's daemons
    /// are cancelled and the task fails.
    pub(crate) async fn under_ceiling(
        &self,
        task: &Task,
        cancel: CancellationToken,
        work: impl Future<Output = ()>,
    ) -> Result<(), OrchestratorError> {
        let secs = self.config.limits.request_ceiling_secs;
        if tokio::time::timeout(Duration::from_secs(secs), work).await.is_ok() {
            return Ok(());
        }

        cancel.cancel();
        let err = OrchestratorError::Timeout { secs };
        warn!(task_id = %task.id, secs, "Request ceiling reached, cancelling");
        if self.is_settled(task.id).await {
            debug!(task_id = %task.id, "Task already settled before the ceiling");
            return Err(err);
        }
        best_effort("record timeout", self.stores.tasks.set_error(task.id, &err.to_string()).await);
        if !task.is_routine() {
            best_effort(
                "untrack timed out task",
                self.stores.sessions.remove_active_task(task.session_id, task.id).await,
            );
        }
        self.publish(
            &task.user_id,
            Event::TaskFailed {
                task_id: task.id,
                error: err.to_string(),
            },
        );
        Err(err)
    }

    async fn open_task(&self, session: &Session, request: &UserRequest) -> Result<Task, OrchestratorError> {
        if let Some(task_id) = request.follow_up_task_id {
            match self.reopen_task(session, request, task_id).await {
                Some(task) => return Ok(task),
                None => debug!(task_id = %task_id, "Follow-up task unavailable, opening a new one"),
            }
        }

        let mut task = Task::new(session.id, &request.user_id, &request.message);
        task.model_id = self
            .chat
            .resolve_model(request.model.as_deref().or(Some(session.model_id.as_str())));
        task.project_id = request.project_id;
        if let Some(routine_id) = request.routine_id {
            task = task.with_source(TaskSource::Routine);
            task.routine_id = Some(routine_id);
        }
        if !task.is_routine() && task.project_id.is_none() {
            task.project_id = best_effort(
                "list projects",
                self.stores.projects.list_for_user(&request.user_id).await,
            )
            .and_then(|projects| projects.first().map(|p| p.id));
        }

        self.stores.tasks.create(task.clone()).await?;
        if !task.is_routine() {
            best_effort(
                "track active task",
                self.stores.sessions.add_active_task(session.id, task.id).await,
            );
        }
        self.publish(
            &request.user_id,
            Event::TaskCreated {
                task_id: task.id,
                prompt: task.prompt.clone(),
            },
        );
        Ok(task)
    }

    async fn reopen_task(&self, session: &Session, request: &UserRequest, task_id: Uuid) -> Option<Task> {
        let mut task = best_effort("load follow-up task", self.stores.tasks.get(task_id).await)
            .flatten()
            .filter(|t| t.user_id == request.user_id)?;

        task.mode = TaskMode::PendingClassification;
        task.status = TaskStatus::Executing;
        task.error = None;
        task.completed_at = None;
        if let Some(model) = &request.model {
            task.model_id = model.clone();
        }
        if request.project_id.is_some() {
            task.project_id = request.project_id;
        }
        best_effort("reopen task", self.stores.tasks.update(task.clone()).await)?;

        best_effort(
            "untrack recent task",
            self.stores.sessions.remove_recent_task(session.id, task.id).await,
        );
        best_effort(
            "track active task",
            self.stores.sessions.add_active_task(session.id, task.id).await,
        );
        info!(task_id = %task.id, "Reusing task for follow-up");
        self.publish(
            &request.user_id,
            Event::TaskUpdated {
                task_id: task.id,
                goal: task.goal.clone(),
            },
        );
        Some(task)
    }

    async fn process(&self, session: &Session, request: &UserRequest, task: Task, cancel: CancellationToken) {
        let message = self.attach_documents(request).await;
        let skills = self.resolve_skills(session, request).await;
        let turn = self.prepare(session, task, message, skills, cancel).await;

        let classification = self.choose(&turn, request).await;
        self.publish_classified(&turn, &classification);
        self.dispatch(&turn, classification).await;
    }

    async fn attach_documents(&self, request: &UserRequest) -> String {
        if request.save_ids.is_empty() {
            return request.message.clone();
        }
        let ids: Vec<Uuid> = request.save_ids.iter().take(MAX_SAVED_DOCUMENTS).copied().collect();
        match best_effort(
            "load saved documents",
            self.stores.saves.get_many(&request.user_id, &ids).await,
        ) {
            Some(docs) => {
                debug!(attached = docs.len(), "Attaching reference documents");
                with_reference_documents(&request.message, &docs)
            }
            None => request.message.clone(),
        }
    }

    /// Explicit skills, else the session's pinned skills, else whatever the
    /// catalog routes the message to.
    async fn resolve_skills(&self, session: &Session, request: &UserRequest) -> Vec<Skill> {
        let mut ids: Vec<String> = request.skill_ids.iter().take(MAX_SKILLS).cloned().collect();
        if ids.is_empty() {
            ids = session.pinned_skill_ids.clone();
        }
        if ids.is_empty() {
            ids = best_effort("route skills", self.stores.skills.route(&request.message).await).unwrap_or_default();
        }
        let ids = dedupe(ids);
        if ids.is_empty() {
            return Vec::new();
        }
        let skills = best_effort("load skills", self.stores.skills.get_many(&ids).await).unwrap_or_default();
        debug!(skills = ?skills.iter().map(|s| s.name.as_str()).collect::<Vec<_>>(), "Resolved skills");
        skills
    }

    /// Gather the context every mode runs with.
    pub(crate) async fn prepare(
        &self,
        session: &Session,
        task: Task,
        message: String,
        skills: Vec<Skill>,
        cancel: CancellationToken,
    ) -> Turn {
        let user_id = task.user_id.clone();

        let project_instruction = match task.project_id {
            Some(project_id) => best_effort("load project", self.stores.projects.get(project_id).await)
                .flatten()
                .map(|p| p.system_instruction)
                .filter(|i| !i.is_empty()),
            None => None,
        };

        let active = best_effort("load active daemons", self.stores.daemons.active_for_user(&user_id).await)
            .unwrap_or_default();
        let engrams = best_effort(
            "load recent engrams",
            self.stores.engrams.recent(session.id, PROMPT_ENGRAMS).await,
        )
        .unwrap_or_default();

        // One extra in case the current task is among them.
        let recent = best_effort(
            "load conversation history",
            self.stores
                .tasks
                .recent_for_session(session.id, task.project_id, HISTORY_TASKS + 1)
                .await,
        )
        .unwrap_or_default();
        let history = history_messages(&recent, task.id, &message);

        let system_prompt = OrchestratorPrompt {
            context_summary: &session.context_summary,
            active_daemons: &active,
            engrams: &engrams,
            project_instruction: project_instruction.as_deref(),
        }
        .build();

        Turn {
            user_id,
            session_id: session.id,
            model: task.model_id.clone(),
            task,
            message,
            system_prompt,
            history,
            active,
            project_instruction,
            skills,
            cancel,
        }
    }

    /// Template first, then an explicit mode override, then the classifier.
    async fn choose(&self, turn: &Turn, request: &UserRequest) -> ClassificationResult {
        if let Some(slug) = request.template_slug.as_deref() {
            match best_effort(
                "load template",
                self.stores.templates.get_by_slug(&turn.user_id, slug).await,
            )
            .flatten()
            {
                Some(template) => {
                    info!(template = %template.slug, "Direct template dispatch, skipping classification");
                    self.publish(&turn.user_id, Event::thinking(format!("Deploying {}...", template.name)));
                    return template_plan(&template, &turn.message);
                }
                None => warn!(slug, "Template not found, classifying instead"),
            }
        }

        if let Some(mode @ (Mode::Daemon | Mode::MultiDaemon)) = request.mode {
            info!(mode = %mode, "Using mode override");
            self.publish(&turn.user_id, Event::thinking(format!("Dispatching {mode}...")));
            return override_plan(mode, &turn.message);
        }

        self.publish(&turn.user_id, Event::thinking("Analyzing your request..."));
        match self
            .classifier
            .classify(&turn.user_id, turn.model(), turn.history.clone(), &turn.active)
            .await
        {
            Ok(classification) => classification,
            Err(e) => {
                warn!(user_id = %turn.user_id, error = %e, "Classification failed, answering directly");
                ClassificationResult::quick(None)
            }
        }
    }

    pub(crate) fn publish_classified(&self, turn: &Turn, classification: &ClassificationResult) {
        self.publish(
            &turn.user_id,
            Event::OrchestratorClassified {
                task_id: turn.task.id,
                mode: classification.mode.to_string(),
                daemons_planned: classification.daemons.len(),
            },
        );
    }

    async fn dispatch(&self, turn: &Turn, classification: ClassificationResult) {
        match classification.mode {
            Mode::Quick => self.run_quick(turn).await,
            Mode::Status => self.run_status(turn).await,
            Mode::Daemon => self.run_daemon(turn, classification.daemons).await,
            Mode::MultiDaemon => self.run_multi(turn, classification.daemons).await,
        }
    }

    /// Whether the stored task already reached a terminal status.
    pub(crate) async fn is_settled(&self, task_id: Uuid) -> bool {
        best_effort("load task", self.stores.tasks.get(task_id).await)
            .flatten()
            .is_some_and(|t| t.status.is_terminal())
    }

    /// Session bookkeeping once a top-level task ends.
    pub(crate) async fn close_task(&self, task: &Task, success: bool) {
        if !task.is_routine() {
            best_effort(
                "untrack active task",
                self.stores.sessions.remove_active_task(task.session_id, task.id).await,
            );
            if success {
                best_effort(
                    "track recent task",
                    self.stores.sessions.add_recent_task(task.session_id, task.id).await,
                );
            }
        }
        best_effort(
            "increment session stats",
            self.stores.sessions.increment_stats(task.session_id, success).await,
        );
    }

    /// Run a request and return its user-facing reply as text.
    pub async fn handle_user_message_sync(&self, user_id: &str, message: &str, model: Option<&str>) -> String {
        self.run_sync(UserRequest::new(user_id, message).with_model(model)).await
    }

    /// Like [`Self::handle_user_message_sync`], tagged as a routine run.
    pub async fn handle_routine_sync(
        &self,
        user_id: &str,
        message: &str,
        model: Option<&str>,
        routine_id: Uuid,
    ) -> String {
        self.run_sync(UserRequest::new(user_id, message).with_model(model).routine(routine_id))
            .await
    }

    pub(crate) async fn run_sync(&self, request: UserRequest) -> String {
        let mut rx = self.events.subscribe(&request.user_id);
        let mut reply = SyncReply::default();

        let work = self.handle_user_message(request);
        tokio::pin!(work);
        let result = loop {
            tokio::select! {
                biased;
                event = rx.recv() => match event {
                    Ok(event) => reply.observe(&event),
                    Err(RecvError::Lagged(skipped)) => debug!(skipped, "Sync reply lagged behind events"),
                    Err(RecvError::Closed) => break (&mut work).await,
                },
                result = &mut work => break result,
            }
        };
        if let Err(e) = result {
            debug!(error = %e, "Sync request failed");
            reply.failed = true;
        }

        loop {
            match rx.try_recv() {
                Ok(event) => reply.observe(&event),
                Err(TryRecvError::Lagged(_)) => continue,
                Err(_) => break,
            }
        }
        reply.into_text()
    }
}

/// What a synchronous caller gets back, folded from the event stream.
#[derive(Debug, Default)]
struct SyncReply {
    response: Option<String>,
    completed: Option<String>,
    failed: bool,
}

impl SyncReply {
    fn observe(&mut self, event: &Event) {
        match event {
            Event::OrchestratorResponse { content, .. } => self.response = Some(content.clone()),
            Event::TaskCompleted { summary, .. } => self.completed = Some(summary.clone()),
            Event::TaskFailed { .. } | Event::Error { .. } => self.failed = true,
            _ => {}
        }
    }

    fn into_text(self) -> String {
        self.response
            .or(self.completed)
            .unwrap_or_else(|| if self.failed { SYNC_ERROR_REPLY } else { SYNC_EMPTY_REPLY }.to_string())
    }
}
