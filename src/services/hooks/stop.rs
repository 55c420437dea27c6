//! Stop hook: the termination gate.
//!
//! Runs after every engine iteration and decides whether the session may
//! terminate. Agents never decide termination; only this hook does. The
//! decision tree is evaluated in order and the first match wins:
//!
//! 1. Hard stops (iterations, time, budget, permission violation)
//! 2. Task-ledger check (any task not completed -> continue)
//! 3. Message-linked-task check (user messages gate termination)
//! 4. Test success (all tests passed -> terminate)
//! 5. Known error with remediation (bounded retries -> continue)
//! 6. Escalation triggers (high cost, destructive verbs)
//! 7. Default -> continue

use async_trait::async_trait;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::domain::models::hook::{HookContext, HookOutcome, HookTrigger};
use crate::domain::ports::hook::Hook;
use crate::services::message_store::MessageStore;
use crate::services::task_ledger::TaskManager;

/// Error patterns with known remediations.
const REMEDIABLE_PATTERNS: &[&str] = &[
    "connection refused",
    "timeout",
    "rate limit",
    "out of memory",
];

/// Verbs that suggest a destructive action is underway.
const DESTRUCTIVE_PATTERNS: &[&str] = &["delete", "drop", "remove", "destroy", "terminate", "kill"];

/// Hard-stop reasons; the engine aborts the plan when it sees one.
pub const HARD_STOP_REASONS: &[&str] = &[
    "max_iterations_exceeded",
    "max_time_exceeded",
    "budget_exceeded",
    "permission_violation",
];

/// Whether a terminate outcome is a hard stop rather than a success signal.
pub fn is_hard_stop(reason: &str) -> bool {
    HARD_STOP_REASONS.contains(&reason)
}

/// The termination gate.
pub struct StopHook {
    max_iterations: u32,
    max_time_seconds: u64,
    max_retries: u32,
    tasks: Arc<TaskManager>,
    messages: Option<Arc<MessageStore>>,
    /// Remediation retries per (session, pattern)
    retry_counts: Mutex<HashMap<String, u32>>,
}

impl StopHook {
    pub fn new(
        max_iterations: u32,
        max_time_seconds: u64,
        max_retries: u32,
        tasks: Arc<TaskManager>,
        messages: Option<Arc<MessageStore>>,
    ) -> Self {
        Self {
            max_iterations,
            max_time_seconds,
            max_retries,
            tasks,
            messages,
            retry_counts: Mutex::new(HashMap::new()),
        }
    }

    /// Walk the decision tree. First match wins.
    pub async fn decide(&self, ctx: &HookContext) -> HookOutcome {
        if let Some(outcome) = self.check_hard_stops(ctx) {
            return outcome;
        }

        // Ledger and message checks can only yield "continue"; when they
        // pass, evaluation falls through to the success and risk checks.
        if let Some(outcome) = self.check_task_ledger().await {
            return outcome;
        }

        if let Some(outcome) = self.check_message_linked_tasks().await {
            return outcome;
        }

        if let Some(results) = ctx.test_results {
            if results.all_passed() {
                return HookOutcome::terminate("all_tests_passed").with_data(json!({
                    "passed": results.passed,
                    "total": results.total(),
                }));
            }
        }

        if let Some(outcome) = self.check_remediation(ctx).await {
            return outcome;
        }

        if let Some(outcome) = Self::check_escalation(ctx) {
            return outcome;
        }

        HookOutcome::proceed("default_continue", 0.7)
    }

    fn check_hard_stops(&self, ctx: &HookContext) -> Option<HookOutcome> {
        if ctx.iteration >= self.max_iterations {
            return Some(
                HookOutcome::terminate("max_iterations_exceeded").with_data(json!({
                    "iteration": ctx.iteration,
                    "max_iterations": self.max_iterations,
                })),
            );
        }

        if ctx.elapsed_seconds >= self.max_time_seconds as f64 {
            return Some(HookOutcome::terminate("max_time_exceeded").with_data(json!({
                "elapsed": ctx.elapsed_seconds,
                "max_time": self.max_time_seconds,
            })));
        }

        if ctx.budget_spent >= ctx.budget_limit {
            return Some(HookOutcome::terminate("budget_exceeded").with_data(json!({
                "spent": ctx.budget_spent,
                "limit": ctx.budget_limit,
            })));
        }

        if ctx.permission_violation {
            return Some(HookOutcome::terminate("permission_violation"));
        }

        None
    }

    async fn check_task_ledger(&self) -> Option<HookOutcome> {
        let report = self.tasks.verify_completion().await;
        if report.all_complete {
            return None;
        }
        Some(
            HookOutcome::proceed("tasks_remaining", 1.0).with_data(json!({
                "incomplete_count": report.incomplete_ids.len(),
                "blocked_count": report.blocked_ids.len(),
                "incomplete_tasks": report.incomplete_ids,
                "blocked_tasks": report.blocked_ids,
            })),
        )
    }

    async fn check_message_linked_tasks(&self) -> Option<HookOutcome> {
        let messages = self.messages.as_ref()?;
        let snapshot = self.tasks.snapshot().await;
        let gating = messages
            .messages_with_incomplete_tasks(|task_id| snapshot.is_completed(task_id))
            .await;

        if gating.is_empty() {
            return None;
        }

        let detail: Vec<serde_json::Value> = gating
            .iter()
            .take(10)
            .map(|m| {
                json!({
                    "message_id": m.message_id,
                    "linked_tasks": m.linked_tasks,
                })
            })
            .collect();

        Some(
            HookOutcome::proceed("message_linked_tasks_incomplete", 1.0).with_data(json!({
                "incomplete_count": gating.len(),
                "messages": detail,
            })),
        )
    }

    async fn check_remediation(&self, ctx: &HookContext) -> Option<HookOutcome> {
        let logs_text = ctx.logs.join("\n").to_lowercase();

        for pattern in REMEDIABLE_PATTERNS {
            if !logs_text.contains(pattern) {
                continue;
            }
            let key = format!("{}_{pattern}", ctx.session_id);
            let mut counts = self.retry_counts.lock().await;
            let current = counts.get(&key).copied().unwrap_or(0);
            if current < self.max_retries {
                counts.insert(key, current + 1);
                return Some(
                    HookOutcome::proceed("known_error_with_remediation", 0.85).with_data(json!({
                        "error_pattern": pattern,
                        "retry_count": current + 1,
                        "max_retries": self.max_retries,
                    })),
                );
            }
        }

        None
    }

    fn check_escalation(ctx: &HookContext) -> Option<HookOutcome> {
        if ctx.budget_limit > 0.0 && ctx.budget_spent > ctx.budget_limit * 0.8 {
            return Some(
                HookOutcome::escalate("high_cost_operation", 0.9).with_data(json!({
                    "budget_spent": ctx.budget_spent,
                    "budget_limit": ctx.budget_limit,
                    "percentage_used": ctx.budget_spent / ctx.budget_limit * 100.0,
                })),
            );
        }

        let logs_text = ctx.logs.join("\n").to_lowercase();
        for pattern in DESTRUCTIVE_PATTERNS {
            if logs_text.contains(pattern) {
                return Some(
                    HookOutcome::escalate("potential_destructive_action", 0.75)
                        .with_data(json!({ "pattern_detected": pattern })),
                );
            }
        }

        None
    }
}

#[async_trait]
impl Hook for StopHook {
    fn name(&self) -> &str {
        "stop-hook"
    }

    fn trigger(&self) -> HookTrigger {
        HookTrigger::AfterIteration
    }

    fn priority(&self) -> u8 {
        10
    }

    async fn evaluate(&self, ctx: &HookContext) -> HookOutcome {
        self.decide(ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::hook::{HookDecision, TestReport};
    use crate::domain::models::message::{Message, MessageKind};

    fn ctx() -> HookContext {
        HookContext {
            session_id: "sess_1".to_string(),
            agent_id: "orchestrator".to_string(),
            iteration: 1,
            elapsed_seconds: 1.0,
            budget_spent: 0.0,
            budget_limit: 100.0,
            ..HookContext::default()
        }
    }

    fn stop_hook(tasks: Arc<TaskManager>, messages: Option<Arc<MessageStore>>) -> StopHook {
        StopHook::new(100, 3600, 5, tasks, messages)
    }

    async fn completed_ledger() -> Arc<TaskManager> {
        let tasks = Arc::new(TaskManager::new(None, None));
        tasks.create_tasks(&["only task".to_string()]).await;
        tasks.start("task_1").await.unwrap();
        tasks.complete("task_1", "all work verified").await.unwrap();
        tasks
    }

    #[tokio::test]
    async fn test_hard_stop_iterations() {
        let hook = stop_hook(completed_ledger().await, None);
        let mut ctx = ctx();
        ctx.iteration = 100;

        let outcome = hook.decide(&ctx).await;
        assert_eq!(outcome.decision, HookDecision::Terminate);
        assert_eq!(outcome.reason, "max_iterations_exceeded");
        assert!(is_hard_stop(&outcome.reason));
    }

    #[tokio::test]
    async fn test_hard_stop_budget() {
        let hook = stop_hook(completed_ledger().await, None);
        let mut ctx = ctx();
        ctx.budget_spent = 100.0;

        let outcome = hook.decide(&ctx).await;
        assert_eq!(outcome.decision, HookDecision::Terminate);
        assert_eq!(outcome.reason, "budget_exceeded");
    }

    #[tokio::test]
    async fn test_hard_stop_permission_violation() {
        let hook = stop_hook(completed_ledger().await, None);
        let mut ctx = ctx();
        ctx.permission_violation = true;

        let outcome = hook.decide(&ctx).await;
        assert_eq!(outcome.reason, "permission_violation");
    }

    #[tokio::test]
    async fn test_tasks_remaining_continues() {
        let tasks = Arc::new(TaskManager::new(None, None));
        tasks.create_tasks(&["a".to_string(), "b".to_string()]).await;
        tasks.start("task_1").await.unwrap();
        tasks.complete("task_1", "done and verified").await.unwrap();

        let hook = stop_hook(tasks, None);
        let outcome = hook.decide(&ctx()).await;
        assert_eq!(outcome.decision, HookDecision::Continue);
        assert_eq!(outcome.reason, "tasks_remaining");
    }

    #[tokio::test]
    async fn test_blocked_tasks_also_continue() {
        let tasks = Arc::new(TaskManager::new(None, None));
        tasks.create_tasks(&["a".to_string()]).await;
        tasks.block("task_1", "stuck on upstream").await.unwrap();

        let hook = stop_hook(tasks, None);
        let outcome = hook.decide(&ctx()).await;
        assert_eq!(outcome.decision, HookDecision::Continue);
        assert_eq!(outcome.reason, "tasks_remaining");
    }

    #[tokio::test]
    async fn test_message_linked_tasks_gate_termination() {
        // Two user messages, one linked task each. The ledger only tracks
        // message #1's task (completed); message #2 references a task the
        // ledger does not know, so the ledger check passes but the
        // message-linked check gates termination.
        let tasks = Arc::new(TaskManager::new(None, None));
        let ids = tasks.create_tasks(&["first ask".to_string()]).await;
        tasks.start(&ids[0]).await.unwrap();
        tasks.complete(&ids[0], "answered in thread").await.unwrap();

        let messages = Arc::new(MessageStore::new(None));
        let m1 = messages
            .record(Message::new("alice", "first", MessageKind::UserText, "sess_1"))
            .await;
        let m2 = messages
            .record(Message::new("alice", "second", MessageKind::UserText, "sess_1"))
            .await;
        messages.link_task(&m1.message_id, &ids[0]).await.unwrap();
        messages.link_task(&m2.message_id, "task_followup").await.unwrap();

        let hook = stop_hook(tasks, Some(messages.clone()));

        // Even passing tests (which would otherwise terminate) cannot beat
        // the message gate.
        let mut ctx_with_tests = ctx();
        ctx_with_tests.test_results = Some(TestReport {
            passed: 3,
            failed: 0,
            skipped: 0,
        });
        let outcome = hook.decide(&ctx_with_tests).await;
        assert_eq!(outcome.decision, HookDecision::Continue);
        assert_eq!(outcome.reason, "message_linked_tasks_incomplete");

        // Completing the gating message releases the gate.
        messages.complete(&m2.message_id, |_| true).await.unwrap();
        let outcome = hook.decide(&ctx_with_tests).await;
        assert_eq!(outcome.decision, HookDecision::Terminate);
        assert_eq!(outcome.reason, "all_tests_passed");
    }

    #[tokio::test]
    async fn test_all_tests_passed_terminates() {
        let hook = stop_hook(completed_ledger().await, None);
        let mut ctx = ctx();
        ctx.test_results = Some(TestReport {
            passed: 4,
            failed: 0,
            skipped: 1,
        });

        let outcome = hook.decide(&ctx).await;
        assert_eq!(outcome.decision, HookDecision::Terminate);
        assert_eq!(outcome.reason, "all_tests_passed");
        assert!(!is_hard_stop(&outcome.reason));
    }

    #[tokio::test]
    async fn test_failing_tests_do_not_terminate() {
        let hook = stop_hook(completed_ledger().await, None);
        let mut ctx = ctx();
        ctx.test_results = Some(TestReport {
            passed: 4,
            failed: 1,
            skipped: 0,
        });

        let outcome = hook.decide(&ctx).await;
        assert_ne!(outcome.decision, HookDecision::Terminate);
    }

    #[tokio::test]
    async fn test_known_error_remediation_bounded() {
        let hook = stop_hook(completed_ledger().await, None);
        let mut ctx = ctx();
        ctx.logs = vec!["request failed: connection refused".to_string()];

        for attempt in 1..=5 {
            let outcome = hook.decide(&ctx).await;
            assert_eq!(outcome.reason, "known_error_with_remediation", "attempt {attempt}");
        }

        // Retries exhausted: falls through. "refused" is not a destructive
        // verb, so this lands on the default.
        let outcome = hook.decide(&ctx).await;
        assert_eq!(outcome.reason, "default_continue");
    }

    #[tokio::test]
    async fn test_budget_escalation_at_80_percent() {
        let hook = stop_hook(completed_ledger().await, None);
        let mut ctx = ctx();
        ctx.budget_spent = 85.0;

        let outcome = hook.decide(&ctx).await;
        assert_eq!(outcome.decision, HookDecision::Escalate);
        assert_eq!(outcome.reason, "high_cost_operation");
    }

    #[tokio::test]
    async fn test_destructive_verb_escalates() {
        let hook = stop_hook(completed_ledger().await, None);
        let mut ctx = ctx();
        ctx.logs = vec!["about to drop table users".to_string()];

        let outcome = hook.decide(&ctx).await;
        assert_eq!(outcome.decision, HookDecision::Escalate);
        assert_eq!(outcome.reason, "potential_destructive_action");
    }

    #[tokio::test]
    async fn test_default_continue() {
        let hook = stop_hook(completed_ledger().await, None);
        let outcome = hook.decide(&ctx()).await;
        assert_eq!(outcome.decision, HookDecision::Continue);
        assert_eq!(outcome.reason, "default_continue");
    }

    #[tokio::test]
    async fn test_never_terminates_while_ledger_would_continue() {
        // Even with hard-stop-free context and passing tests, an incomplete
        // ledger forces continue.
        let tasks = Arc::new(TaskManager::new(None, None));
        tasks.create_tasks(&["open".to_string()]).await;

        let hook = stop_hook(tasks, None);
        let mut ctx = ctx();
        ctx.test_results = Some(TestReport {
            passed: 10,
            failed: 0,
            skipped: 0,
        });

        let outcome = hook.decide(&ctx).await;
        assert_eq!(outcome.decision, HookDecision::Continue);
        assert_eq!(outcome.reason, "tasks_remaining");
    }
}
