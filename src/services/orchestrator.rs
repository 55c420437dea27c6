//! Orchestrator: the single entry point for executing an intent.
//!
//! Wires the router, planner, engine, hook chain, task manager, stores, and
//! scheduler into one explicit context and drives the full flow: session
//! creation, message recording, routing, planning, ledger creation,
//! execution, and finalisation.

use anyhow::Result;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{info, instrument, warn};

use crate::domain::models::config::Config;
use crate::domain::models::message::{Message, MessageKind};
use crate::domain::models::plan::Plan;
use crate::domain::models::session::SessionState;
use crate::infrastructure::remote::RemoteAdapter;
use crate::services::audit_log::{AuditEventKind, AuditLog, AuditLogConfig, NewAuditEvent};
use crate::services::engine::{ErrorRecord, ExecutionEngine, ExecutionReport};
use crate::services::hooks::stop::is_hard_stop;
use crate::services::hooks::{ApprovalHook, HookRegistry, PostStepHook, PreStepHook, StopHook};
use crate::services::memory_service::MemoryService;
use crate::services::message_store::MessageStore;
use crate::services::planner::Planner;
use crate::services::resolver::CapabilityResolver;
use crate::services::router::Router;
use crate::services::scheduler::Scheduler;
use crate::services::session_store::SessionStore;
use crate::services::task_ledger::TaskManager;

/// Number of error-history records surfaced to the caller on failure.
const ERROR_HISTORY_WINDOW: usize = 10;

/// Final outcome of handling one intent.
#[derive(Debug, Clone)]
pub struct OrchestratorOutcome {
    pub success: bool,
    pub session_id: String,
    pub message_id: String,
    /// Exactly `<Promise>DONE</Promise>` or `<Promise>BLOCKED: ...</Promise>`
    pub promise: String,
    pub report: ExecutionReport,
    /// Ledger tasks still incomplete at finalisation
    pub incomplete_tasks: Vec<String>,
    /// Recent error history (last records first-to-last)
    pub error_history: Vec<ErrorRecord>,
    /// Configuration gaps discovered during resolution
    pub needs_configuration: Vec<String>,
}

/// The orchestration context. All component handles are explicit; nothing
/// lives in module-level state.
pub struct Orchestrator {
    config: Config,
    /// Bounds how many sessions execute in parallel
    session_permits: Arc<Semaphore>,
    pub router: Arc<Router>,
    pub planner: Arc<Planner>,
    pub engine: Arc<ExecutionEngine>,
    pub resolver: Arc<CapabilityResolver>,
    pub hooks: Arc<HookRegistry>,
    pub stop_hook: Arc<StopHook>,
    pub approval: Arc<ApprovalHook>,
    pub tasks: Arc<TaskManager>,
    pub sessions: Arc<SessionStore>,
    pub messages: Arc<MessageStore>,
    pub memory: Arc<MemoryService>,
    pub audit: Arc<AuditLog>,
    pub remote: Arc<RemoteAdapter>,
    pub scheduler: Arc<Scheduler>,
}

impl Orchestrator {
    /// Build a fully wired orchestrator from configuration.
    ///
    /// Stores persist under the configured state paths; pass a config with
    /// an adjusted `state` section (or use [`Orchestrator::in_memory`]) to
    /// relocate them.
    pub async fn new(config: Config) -> Result<Self> {
        let state = &config.state;
        Self::build(
            config.clone(),
            Some(PathBuf::from(&state.audit_log)),
            Some(PathBuf::from(&state.tasks_json)),
            Some(PathBuf::from(&state.task_ledger_markdown)),
            Some(PathBuf::from(&state.sessions_json)),
            Some(PathBuf::from(&state.messages_json)),
            Some(PathBuf::from(&state.memory_json)),
            Some(PathBuf::from(&state.plans_dir)),
        )
        .await
    }

    /// Build an orchestrator that keeps all state in memory. Used by tests
    /// and embedders that manage persistence themselves.
    pub async fn in_memory(config: Config) -> Result<Self> {
        Self::build(config, None, None, None, None, None, None, None).await
    }

    #[allow(clippy::too_many_arguments)]
    async fn build(
        config: Config,
        audit_path: Option<PathBuf>,
        tasks_json: Option<PathBuf>,
        tasks_md: Option<PathBuf>,
        sessions_path: Option<PathBuf>,
        messages_path: Option<PathBuf>,
        memory_path: Option<PathBuf>,
        plans_dir: Option<PathBuf>,
    ) -> Result<Self> {
        let audit = Arc::new(AuditLog::new(AuditLogConfig {
            max_entries: 10_000,
            path: audit_path,
        }));
        let tasks = Arc::new(TaskManager::new(tasks_json, tasks_md));
        let sessions = Arc::new(SessionStore::new(sessions_path));
        let messages = Arc::new(MessageStore::new(messages_path));
        let memory = Arc::new(MemoryService::new(memory_path));
        memory.load().await;

        let resolver = Arc::new(CapabilityResolver::new(&config, audit.clone()));
        let remote = Arc::new(RemoteAdapter::new(config.remote.clone()));
        let router = Arc::new(Router::with_defaults().await);
        let planner = Arc::new(Planner::new(resolver.clone(), plans_dir));

        let hooks = Arc::new(HookRegistry::new());
        let pre_step = Arc::new(PreStepHook::new(
            config.hooks.dry_run,
            config.safety.estimated_step_cost,
            config.hooks.rate_limit_per_minute,
        ));
        let post_step = Arc::new(PostStepHook::new(Some(memory.clone())));
        hooks.register(pre_step).await;
        hooks.register(post_step).await;

        let stop_hook = Arc::new(StopHook::new(
            config.safety.max_iterations,
            config.safety.max_time_seconds,
            config.safety.max_retries_per_pattern,
            tasks.clone(),
            Some(messages.clone()),
        ));
        let approval = Arc::new(ApprovalHook::new(
            config.hooks.approval_timeout_seconds,
            config.hooks.approval_poll_seconds,
            audit.clone(),
            Some(messages.clone()),
        ));

        let engine = Arc::new(ExecutionEngine::new(
            hooks.clone(),
            stop_hook.clone(),
            approval.clone(),
            resolver.clone(),
            tasks.clone(),
            sessions.clone(),
            audit.clone(),
            config.clone(),
        ));

        let scheduler = Arc::new(Scheduler::new(remote.clone(), resolver.clone(), audit.clone()));
        let session_permits = Arc::new(Semaphore::new(config.engine.max_concurrent_sessions.max(1)));

        Ok(Self {
            config,
            session_permits,
            router,
            planner,
            engine,
            resolver,
            hooks,
            stop_hook,
            approval,
            tasks,
            sessions,
            messages,
            memory,
            audit,
            remote,
            scheduler,
        })
    }

    /// Execute a user intent end to end.
    #[instrument(skip(self, intent), fields(user_id))]
    pub async fn handle_intent(
        &self,
        user_id: &str,
        intent: &str,
        budget_limit: Option<f64>,
    ) -> OrchestratorOutcome {
        // Sessions are independent but bounded in parallelism
        let _permit = self.session_permits.acquire().await;

        let budget = budget_limit.unwrap_or(self.config.safety.max_budget);
        let session = self.sessions.create(user_id, intent, budget).await;
        let session_id = session.id.clone();

        self.audit
            .record(
                NewAuditEvent::new(AuditEventKind::SessionStart, session_id.clone(), "session_start")
                    .user(user_id)
                    .detail("budget_limit", json!(budget)),
            )
            .await;
        self.audit
            .record(
                NewAuditEvent::new(AuditEventKind::IntentReceived, session_id.clone(), "intent_received")
                    .user(user_id)
                    .detail("intent", json!(intent)),
            )
            .await;

        // The user message gets its ledger task before processing starts
        self.tasks.bind_session(&session_id).await;
        let message = self
            .messages
            .record(Message::new(user_id, intent, MessageKind::UserText, session_id.clone()))
            .await;
        let message_task = self.tasks.add_task(&format!("Handle message: {intent}")).await;
        let _ = self.messages.link_task(&message.message_id, &message_task).await;
        let _ = self.messages.mark_processing(&message.message_id).await;

        // Route and plan
        let route = self.router.route(intent).await;
        if let Err(e) = self.sessions.transition(&session_id, SessionState::Planning).await {
            warn!(error = %e, "Session could not enter planning");
        }
        let plan = self.planner.build_plan(intent, &route, None, &session_id).await;
        let _ = self
            .sessions
            .update(&session_id, |s| s.plan_id = Some(plan.task_id.clone()))
            .await;
        self.audit
            .record(
                NewAuditEvent::new(AuditEventKind::PlanCreated, session_id.clone(), "plan_created")
                    .user(user_id)
                    .detail("task_id", json!(plan.task_id))
                    .detail("steps", json!(plan.steps.len())),
            )
            .await;

        // One ledger task per step, all linked to the originating message
        let step_descriptions: Vec<String> =
            plan.steps.iter().map(|s| s.description.clone()).collect();
        let step_task_ids = self.tasks.create_tasks(&step_descriptions).await;
        for task_id in &step_task_ids {
            let _ = self.messages.link_task(&message.message_id, task_id).await;
        }

        // Execute
        if let Err(e) = self.sessions.transition(&session_id, SessionState::Executing).await {
            warn!(error = %e, "Session could not enter executing");
        }
        let report = self.engine.execute_plan(&session_id, &plan, &step_task_ids).await;

        self.finalize(user_id, &session_id, &message.message_id, &message_task, &plan, report)
            .await
    }

    async fn finalize(
        &self,
        user_id: &str,
        session_id: &str,
        message_id: &str,
        message_task: &str,
        plan: &Plan,
        report: ExecutionReport,
    ) -> OrchestratorOutcome {
        let done = report.is_done();

        if done {
            let _ = self.tasks.start(message_task).await;
            let _ = self
                .tasks
                .complete(
                    message_task,
                    &format!("All {} plan steps completed for {}", report.total_steps, plan.task_id),
                )
                .await;

            let snapshot = self.tasks.snapshot().await;
            if let Err(e) = self
                .messages
                .complete(message_id, |t| snapshot.is_completed(t))
                .await
            {
                warn!(error = %e, "Message could not be completed");
            }
        } else {
            let _ = self.messages.mark_failed(message_id).await;
        }

        let verification = self.tasks.verify_completion().await;
        let final_state = if done && verification.all_complete {
            SessionState::Completed
        } else if report
            .termination_reason
            .as_deref()
            .is_some_and(is_hard_stop)
        {
            SessionState::Terminated
        } else {
            SessionState::Failed
        };

        if let Err(e) = self.sessions.transition(session_id, final_state).await {
            warn!(error = %e, "Session could not reach final state");
        }

        self.audit
            .record(
                NewAuditEvent::new(AuditEventKind::SessionEnd, session_id, "session_end")
                    .user(user_id)
                    .detail("status", json!(final_state.as_str()))
                    .detail("promise", json!(report.promise)),
            )
            .await;

        info!(
            session_id,
            status = final_state.as_str(),
            promise = %report.promise,
            "Session finalised"
        );

        let error_start = report.error_history.len().saturating_sub(ERROR_HISTORY_WINDOW);
        let mut incomplete = verification.incomplete_ids;
        incomplete.extend(verification.blocked_ids);

        OrchestratorOutcome {
            success: final_state == SessionState::Completed,
            session_id: session_id.to_string(),
            message_id: message_id.to_string(),
            promise: report.promise.clone(),
            error_history: report.error_history[error_start..].to_vec(),
            needs_configuration: report.needs_configuration.clone(),
            incomplete_tasks: incomplete,
            report,
        }
    }

    /// Request cooperative cancellation of a session. Idempotent.
    pub async fn cancel(&self, session_id: &str) -> Result<()> {
        self.sessions.cancel(session_id).await?;
        self.audit
            .record(NewAuditEvent::new(AuditEventKind::SessionEnd, session_id, "cancel_requested"))
            .await;
        Ok(())
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}
