//! Retry-driven execution engine.
//!
//! Drives a sealed plan to a final promise. Each step runs in a bounded
//! retry loop: before-hooks, capability resolution and invocation,
//! after-hooks, then the test gate. Failures feed the failure analyser,
//! whose suggested input overrides are merged into the step's working
//! inputs before the next attempt. The stop hook is consulted after every
//! iteration; only its hard stops abort a plan early.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, instrument, warn};

use crate::domain::models::config::Config;
use crate::domain::models::hook::{HookContext, HookDecision, HookTrigger, TestReport};
use crate::domain::models::plan::{Plan, Step, StepStatus};
use crate::domain::models::session::SessionState;
use crate::domain::ports::provider::InvocationContext;
use crate::services::audit_log::{AuditEventKind, AuditLog, NewAuditEvent};
use crate::services::hooks::stop::is_hard_stop;
use crate::services::hooks::{ApprovalHook, HookRegistry, StopHook};
use crate::services::resolver::{CapabilityResolver, ResolutionOutcome};
use crate::services::session_store::SessionStore;
use crate::services::task_ledger::TaskManager;

/// Maximum characters of step output retained in an error-history record.
const OUTPUT_PREVIEW_CHARS: usize = 500;

/// Progress events published for observers around every invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    IterationStart { step: usize, iteration: u32 },
    IterationEnd { step: usize, iteration: u32, success: bool },
    StepFinished { step: usize, status: StepStatus },
    PromiseIssued { task_id: String, promise: String },
}

/// Result of one executed step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    pub step_number: usize,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub iterations: u32,
    pub tests_passed: bool,
    #[serde(default)]
    pub test_output: String,
    pub duration_ms: u64,
}

/// One failed iteration, kept for the caller and the failure analyser.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub step: usize,
    pub iteration: u32,
    pub error_summary: String,
    pub output_preview: String,
}

/// Final outcome of a plan execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub task_id: String,
    /// Exactly `<Promise>DONE</Promise>` or `<Promise>BLOCKED: ...</Promise>`
    pub promise: String,
    pub steps_completed: usize,
    pub total_steps: usize,
    pub results: Vec<StepRecord>,
    #[serde(default)]
    pub error_history: Vec<ErrorRecord>,
    #[serde(default)]
    pub needs_configuration: Vec<String>,
    /// Stop-hook reason when a hard stop or rejection ended the plan
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub termination_reason: Option<String>,
}

impl ExecutionReport {
    pub fn is_done(&self) -> bool {
        self.promise == promise_done()
    }
}

/// The engine's verdict for one step.
enum StepOutcome {
    Done(StepRecord),
    Blocked {
        record: StepRecord,
        reason: String,
        termination: Option<String>,
    },
}

pub fn promise_done() -> String {
    "<Promise>DONE</Promise>".to_string()
}

pub fn promise_blocked(reason: &str) -> String {
    format!("<Promise>BLOCKED: {reason}</Promise>")
}

/// Retry-driven plan executor.
pub struct ExecutionEngine {
    hooks: Arc<HookRegistry>,
    stop_hook: Arc<StopHook>,
    approval: Arc<ApprovalHook>,
    resolver: Arc<CapabilityResolver>,
    tasks: Arc<TaskManager>,
    sessions: Arc<SessionStore>,
    audit: Arc<AuditLog>,
    config: Config,
    progress: broadcast::Sender<ProgressEvent>,
}

impl ExecutionEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        hooks: Arc<HookRegistry>,
        stop_hook: Arc<StopHook>,
        approval: Arc<ApprovalHook>,
        resolver: Arc<CapabilityResolver>,
        tasks: Arc<TaskManager>,
        sessions: Arc<SessionStore>,
        audit: Arc<AuditLog>,
        config: Config,
    ) -> Self {
        let (progress, _) = broadcast::channel(256);
        Self {
            hooks,
            stop_hook,
            approval,
            resolver,
            tasks,
            sessions,
            audit,
            config,
            progress,
        }
    }

    /// Subscribe to progress events.
    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.progress.subscribe()
    }

    /// Execute a sealed plan.
    ///
    /// `step_task_ids` maps each step (by position) to its ledger task. The
    /// session's `completed_at` is stamped regardless of outcome.
    #[instrument(skip(self, plan, step_task_ids), fields(task_id = %plan.task_id))]
    pub async fn execute_plan(
        &self,
        session_id: &str,
        plan: &Plan,
        step_task_ids: &[String],
    ) -> ExecutionReport {
        let mut report = ExecutionReport {
            task_id: plan.task_id.clone(),
            promise: promise_done(),
            steps_completed: 0,
            total_steps: plan.steps.len(),
            results: Vec::new(),
            error_history: Vec::new(),
            needs_configuration: Vec::new(),
            termination_reason: None,
        };

        let cancel = self.sessions.cancel_flag(session_id).await;

        for (idx, step) in plan.steps.iter().enumerate() {
            let ledger_id = step_task_ids.get(idx).map(String::as_str);
            let outcome = self
                .run_step(session_id, plan, step, ledger_id, cancel.as_deref(), &mut report)
                .await;

            match outcome {
                StepOutcome::Done(record) => {
                    report.steps_completed += 1;
                    report.results.push(record);
                }
                StepOutcome::Blocked {
                    record,
                    reason,
                    termination,
                } => {
                    report.results.push(record);
                    report.termination_reason = termination;
                    report.promise = promise_blocked(&reason);
                    self.finish(session_id, plan, &report).await;
                    return report;
                }
            }
        }

        self.finish(session_id, plan, &report).await;
        report
    }

    async fn finish(&self, session_id: &str, plan: &Plan, report: &ExecutionReport) {
        let _ = self
            .sessions
            .update(session_id, |s| s.completed_at = Some(Utc::now()))
            .await;

        let session_iter = self
            .sessions
            .get(session_id)
            .await
            .map_or(0, |s| s.iteration);
        let ctx = self.hook_context(session_id, "engine", session_iter).await;
        let _ = self.hooks.fire_all(HookTrigger::OnComplete, &ctx).await;

        let _ = self.progress.send(ProgressEvent::PromiseIssued {
            task_id: plan.task_id.clone(),
            promise: report.promise.clone(),
        });
        info!(promise = %report.promise, steps = report.steps_completed, "Plan finished");
    }

    #[allow(clippy::too_many_lines)]
    async fn run_step(
        &self,
        session_id: &str,
        plan: &Plan,
        step: &Step,
        ledger_id: Option<&str>,
        cancel: Option<&AtomicBool>,
        report: &mut ExecutionReport,
    ) -> StepOutcome {
        let max_iters = plan.iterations_for(step);
        let started = std::time::Instant::now();
        let mut inputs = step.inputs.clone();
        let mut last_error: Option<String> = None;
        let mut last_output: Option<serde_json::Value> = None;
        let mut last_test_output = String::new();

        if max_iters == 0 {
            let reason = format!("Max iterations ({max_iters}) reached");
            self.block_ledger_task(ledger_id, &reason).await;
            return self
                .blocked(session_id, step, 0, None, &reason, None, started)
                .await;
        }

        let before_names = self.hook_names(&step.hooks_before, "pre-step");
        let after_names = self.hook_names(&step.hooks_after, "post-step");

        for iteration in 1..=max_iters {
            if cancel.is_some_and(|c| c.load(Ordering::SeqCst)) {
                self.block_ledger_task(ledger_id, "cancelled").await;
                return self
                    .blocked(session_id, step, iteration - 1, last_output, "cancelled", None, started)
                    .await;
            }

            let session_iter = self
                .sessions
                .increment_iteration(session_id)
                .await
                .unwrap_or(iteration);
            let _ = self.progress.send(ProgressEvent::IterationStart {
                step: step.number,
                iteration,
            });

            // Before-hooks, priority descending
            let mut ctx = self.hook_context(session_id, &step.capability, session_iter).await;
            let mut skipped_by: Option<String> = None;
            let mut retry_wait: Option<f64> = None;

            for (name, outcome) in self.hooks.fire(HookTrigger::Before, &before_names, &ctx).await {
                match outcome.decision {
                    HookDecision::Terminate => {
                        self.audit_hook(session_id, &name, &outcome.reason, "terminate").await;
                        self.block_ledger_task(ledger_id, &outcome.reason).await;
                        return self
                            .blocked(session_id, step, iteration, last_output, &outcome.reason, None, started)
                            .await;
                    }
                    HookDecision::Skip => {
                        skipped_by = Some(format!("{name}: {}", outcome.reason));
                    }
                    HookDecision::Escalate => {
                        self.audit_hook(session_id, &name, &outcome.reason, "escalate").await;
                        match self.seek_approval(session_id, &ctx, &outcome.reason).await {
                            Ok(()) => {}
                            Err(reason) => {
                                self.block_ledger_task(ledger_id, &reason).await;
                                return self
                                    .blocked(
                                        session_id,
                                        step,
                                        iteration,
                                        last_output,
                                        &reason,
                                        Some(reason.clone()),
                                        started,
                                    )
                                    .await;
                            }
                        }
                    }
                    HookDecision::Retry => {
                        retry_wait = outcome
                            .data
                            .as_ref()
                            .and_then(|d| d.get("wait_seconds"))
                            .and_then(serde_json::Value::as_f64);
                        last_error = Some(format!("{name}: {}", outcome.reason));
                    }
                    HookDecision::Continue => {}
                }
            }

            if let Some(reason) = skipped_by {
                // Hook asked to skip: the step counts as done with empty
                // output.
                self.complete_ledger_task(ledger_id, &format!("Step skipped by hook ({reason})"))
                    .await;
                let _ = self.progress.send(ProgressEvent::IterationEnd {
                    step: step.number,
                    iteration,
                    success: true,
                });
                return self
                    .done(session_id, step, iteration, None, true, String::new(), started)
                    .await;
            }

            if let Some(wait) = retry_wait {
                debug!(step = step.number, wait, "Before-hook requested retry");
                tokio::time::sleep(std::time::Duration::from_secs_f64(wait.clamp(0.0, 1.0))).await;
                let _ = self.progress.send(ProgressEvent::IterationEnd {
                    step: step.number,
                    iteration,
                    success: false,
                });
                continue;
            }

            // Invoke the capability through the resolver
            self.start_ledger_task(ledger_id).await;
            let inv_ctx = InvocationContext {
                message_id: None,
                task_id: ledger_id.map(String::from),
                session_id: session_id.to_string(),
                iteration: session_iter,
            };
            let request = format!("{} {}", step.capability, step.description);
            let resolution = self
                .resolver
                .execute_with_fallback(&request, &step.capability, &inputs, &inv_ctx)
                .await;

            report.needs_configuration.extend(resolution.needs_configuration.clone());
            let _ = self
                .sessions
                .update(session_id, |s| {
                    s.record_cost(resolution.cost);
                    if resolution.success {
                        s.append_log(format!("step {} iteration {iteration}: ok", step.number));
                    } else {
                        s.append_log(format!(
                            "step {} iteration {iteration}: {}",
                            step.number,
                            resolution.errors.join("; ")
                        ));
                    }
                })
                .await;

            last_output = resolution.data.clone();

            // After-hooks: failures are logged but never block
            ctx.step_result = resolution
                .data
                .clone()
                .or_else(|| Some(json!({ "error": resolution.errors.join("; ") })));
            let _ = self.hooks.fire(HookTrigger::After, &after_names, &ctx).await;

            // Test gate
            let (tests_passed, test_output, test_report) =
                evaluate_criteria(&step.test_criteria, &resolution);
            last_test_output = test_output.clone();
            let success = resolution.success && tests_passed;

            let _ = self.progress.send(ProgressEvent::IterationEnd {
                step: step.number,
                iteration,
                success,
            });

            // Stop hook runs after every iteration
            if self.config.hooks.stop_hook_enabled {
                let mut stop_ctx = self
                    .hook_context(session_id, &step.capability, session_iter)
                    .await;
                stop_ctx.test_results = Some(test_report);

                let verdict = self.stop_hook.decide(&stop_ctx).await;
                match verdict.decision {
                    HookDecision::Terminate if is_hard_stop(&verdict.reason) => {
                        self.audit_hook(session_id, "stop-hook", &verdict.reason, "terminate").await;
                        self.block_ledger_task(ledger_id, &verdict.reason).await;
                        return self
                            .blocked(
                                session_id,
                                step,
                                iteration,
                                last_output,
                                &verdict.reason,
                                Some(verdict.reason.clone()),
                                started,
                            )
                            .await;
                    }
                    HookDecision::Escalate => {
                        self.audit_hook(session_id, "stop-hook", &verdict.reason, "escalate").await;
                        if let Err(reason) = self.seek_approval(session_id, &stop_ctx, &verdict.reason).await {
                            self.block_ledger_task(ledger_id, &reason).await;
                            return self
                                .blocked(
                                    session_id,
                                    step,
                                    iteration,
                                    last_output,
                                    &reason,
                                    Some(reason.clone()),
                                    started,
                                )
                                .await;
                        }
                    }
                    _ => {}
                }
            }

            if success {
                let preview = preview(&last_output);
                self.complete_ledger_task(
                    ledger_id,
                    &format!("Step {} completed on iteration {iteration}: {preview}", step.number),
                )
                .await;
                return self
                    .done(session_id, step, iteration, last_output, tests_passed, last_test_output, started)
                    .await;
            }

            // Failure: record history, consult the analyser, retry
            let error_summary = if resolution.success {
                format!("Tests failed: {test_output}")
            } else {
                resolution.errors.join("; ")
            };
            last_error = Some(error_summary.clone());
            report.error_history.push(ErrorRecord {
                step: step.number,
                iteration,
                error_summary: error_summary.clone(),
                output_preview: preview(&last_output),
            });

            let overrides = self
                .analyse_failure(session_id, step, &error_summary, &last_output, report.error_history.len())
                .await;
            merge_overrides(&mut inputs, overrides);

            debug!(step = step.number, iteration, "Step retrying");
        }

        let reason = match last_error {
            Some(ref err) => format!("Max iterations ({max_iters}) reached: {err}"),
            None => format!("Max iterations ({max_iters}) reached"),
        };
        self.block_ledger_task(ledger_id, &reason).await;
        self.blocked(session_id, step, max_iters, last_output, &reason, None, started)
            .await
    }

    /// Route an escalation through the approval hook.
    ///
    /// Ok means execution may continue; Err carries the blocking reason.
    async fn seek_approval(
        &self,
        session_id: &str,
        ctx: &HookContext,
        reason: &str,
    ) -> Result<(), String> {
        if let Err(e) = self.sessions.transition(session_id, SessionState::AwaitingApproval).await {
            warn!(error = %e, "Could not pause session for approval");
        }

        let decision = self.approval.await_decision(ctx, reason).await;
        match decision.decision {
            HookDecision::Continue => {
                if let Err(e) = self.sessions.transition(session_id, SessionState::Executing).await {
                    warn!(error = %e, "Could not resume session after approval");
                }
                Ok(())
            }
            _ => Err(decision.reason),
        }
    }

    async fn analyse_failure(
        &self,
        session_id: &str,
        step: &Step,
        error: &str,
        output: &Option<serde_json::Value>,
        attempts: usize,
    ) -> Option<serde_json::Value> {
        let mut params = serde_json::Map::new();
        params.insert("description".to_string(), json!(step.description));
        params.insert("error".to_string(), json!(error));
        params.insert("output_preview".to_string(), json!(preview(output)));
        params.insert("previous_attempts".to_string(), json!(attempts));

        let ctx = InvocationContext {
            session_id: session_id.to_string(),
            ..InvocationContext::default()
        };
        let outcome = self
            .resolver
            .execute_with_fallback("failure-analyser", "analyze-failure", &params, &ctx)
            .await;

        if !outcome.success {
            // Analyser unavailable: retry with unchanged inputs
            return None;
        }
        outcome.data
    }

    fn hook_names(&self, step_hooks: &[String], builtin: &str) -> Vec<String> {
        let enabled = match builtin {
            "pre-step" => self.config.hooks.pre_step_hook_enabled,
            _ => self.config.hooks.post_step_hook_enabled,
        };
        let mut names = Vec::with_capacity(step_hooks.len() + 1);
        if enabled {
            names.push(builtin.to_string());
        }
        names.extend(step_hooks.iter().cloned());
        names
    }

    async fn hook_context(&self, session_id: &str, agent_id: &str, iteration: u32) -> HookContext {
        match self.sessions.get(session_id).await {
            Some(session) => HookContext {
                session_id: session_id.to_string(),
                agent_id: agent_id.to_string(),
                iteration,
                elapsed_seconds: session.elapsed_seconds(),
                logs: session.recent_logs(50),
                test_results: None,
                permissions: Vec::new(),
                budget_spent: session.budget_spent,
                budget_limit: session.budget_limit,
                permission_violation: false,
                artifacts: Vec::new(),
                step_result: None,
            },
            None => HookContext::new(session_id, agent_id),
        }
    }

    async fn start_ledger_task(&self, ledger_id: Option<&str>) {
        if let Some(id) = ledger_id {
            // Already-started tasks fail the transition check; that is fine
            // across retries.
            let _ = self.tasks.start(id).await;
        }
    }

    async fn complete_ledger_task(&self, ledger_id: Option<&str>, evidence: &str) {
        if let Some(id) = ledger_id {
            let _ = self.tasks.start(id).await;
            if let Err(e) = self.tasks.complete(id, evidence).await {
                warn!(task_id = id, error = %e, "Could not complete ledger task");
            }
        }
    }

    async fn block_ledger_task(&self, ledger_id: Option<&str>, reason: &str) {
        if let Some(id) = ledger_id {
            if let Err(e) = self.tasks.block(id, reason).await {
                warn!(task_id = id, error = %e, "Could not block ledger task");
            }
        }
    }

    async fn audit_hook(&self, session_id: &str, hook: &str, reason: &str, decision: &str) {
        self.audit
            .record(
                NewAuditEvent::new(AuditEventKind::HookDecision, session_id, decision)
                    .agent(hook)
                    .detail("reason", json!(reason)),
            )
            .await;
    }

    #[allow(clippy::too_many_arguments)]
    async fn done(
        &self,
        session_id: &str,
        step: &Step,
        iterations: u32,
        output: Option<serde_json::Value>,
        tests_passed: bool,
        test_output: String,
        started: std::time::Instant,
    ) -> StepOutcome {
        self.audit
            .record(
                NewAuditEvent::new(AuditEventKind::AgentStep, session_id, format!("step_{}", step.number))
                    .agent(&step.capability)
                    .detail("iterations", json!(iterations)),
            )
            .await;
        let _ = self.progress.send(ProgressEvent::StepFinished {
            step: step.number,
            status: StepStatus::Done,
        });
        StepOutcome::Done(StepRecord {
            step_number: step.number,
            success: true,
            output,
            error: None,
            iterations,
            tests_passed,
            test_output,
            duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn blocked(
        &self,
        session_id: &str,
        step: &Step,
        iterations: u32,
        output: Option<serde_json::Value>,
        reason: &str,
        termination: Option<String>,
        started: std::time::Instant,
    ) -> StepOutcome {
        self.audit
            .record(
                NewAuditEvent::new(AuditEventKind::AgentStep, session_id, format!("step_{}", step.number))
                    .agent(&step.capability)
                    .detail("iterations", json!(iterations))
                    .failed(reason),
            )
            .await;
        let _ = self.progress.send(ProgressEvent::StepFinished {
            step: step.number,
            status: StepStatus::Blocked,
        });
        StepOutcome::Blocked {
            record: StepRecord {
                step_number: step.number,
                success: false,
                output,
                error: Some(reason.to_string()),
                iterations,
                tests_passed: false,
                test_output: String::new(),
                duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            },
            reason: reason.to_string(),
            termination,
        }
    }
}

/// Evaluate test criteria over an invocation outcome.
///
/// Success requires every criterion to pass; an empty list passes when the
/// invocation itself succeeded.
fn evaluate_criteria(
    criteria: &[String],
    resolution: &ResolutionOutcome,
) -> (bool, String, TestReport) {
    if criteria.is_empty() {
        let report = TestReport {
            passed: u32::from(resolution.success),
            failed: u32::from(!resolution.success),
            skipped: 0,
        };
        return (true, String::new(), report);
    }

    let mut passed = 0;
    let mut failed = 0;
    let mut lines = Vec::with_capacity(criteria.len());
    for criterion in criteria {
        let ok = check_criterion(criterion, resolution);
        if ok {
            passed += 1;
        } else {
            failed += 1;
        }
        lines.push(format!("{} {criterion}", if ok { "pass" } else { "FAIL" }));
    }

    (
        failed == 0,
        lines.join("\n"),
        TestReport {
            passed,
            failed,
            skipped: 0,
        },
    )
}

fn check_criterion(criterion: &str, resolution: &ResolutionOutcome) -> bool {
    let lowered = criterion.to_lowercase();
    let data = resolution.data.as_ref();

    if lowered.contains("no error") || lowered.contains("no regression") {
        return resolution.success
            && data.is_none_or(|d| d.get("error").is_none_or(serde_json::Value::is_null));
    }

    if lowered.contains("all tests pass") {
        let failed = data
            .and_then(|d| d.get("failed"))
            .and_then(serde_json::Value::as_u64)
            .unwrap_or(0);
        return resolution.success && failed == 0;
    }

    if lowered.contains("file exists") {
        return data
            .and_then(|d| d.get("path"))
            .and_then(serde_json::Value::as_str)
            .is_none_or(|p| Path::new(p).exists());
    }

    // Unrecognised criteria default to pass
    true
}

/// Merge analyser-suggested input overrides.
///
/// Only the `inputs` object is merged; a non-mergeable override is
/// discarded silently and the retry proceeds with unchanged inputs.
fn merge_overrides(
    inputs: &mut serde_json::Map<String, serde_json::Value>,
    overrides: Option<serde_json::Value>,
) {
    let Some(overrides) = overrides else { return };
    let Some(new_inputs) = overrides.get("inputs").and_then(|v| v.as_object()) else {
        return;
    };
    for (key, value) in new_inputs {
        inputs.insert(key.clone(), value.clone());
    }
}

fn preview(output: &Option<serde_json::Value>) -> String {
    let Some(output) = output else {
        return "none".to_string();
    };
    let rendered = output.to_string();
    rendered.chars().take(OUTPUT_PREVIEW_CHARS).collect()
}
