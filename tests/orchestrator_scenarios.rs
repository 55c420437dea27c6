//! End-to-end orchestration scenarios with mock providers.

mod common;

use common::ScriptedProvider;
use serde_json::json;
use std::time::Duration;

use conductor::domain::models::config::Config;
use conductor::domain::models::session::SessionState;
use conductor::domain::models::task::TaskState;
use conductor::domain::ports::provider::ProviderResponse;
use conductor::services::audit_log::AuditEventKind;
use conductor::services::orchestrator::Orchestrator;

async fn orchestrator(config: Config) -> Orchestrator {
    Orchestrator::in_memory(config).await.unwrap()
}

/// Happy path: the workflow intent plans, executes, and completes with
/// every ledger task finished and a DONE promise.
#[tokio::test]
async fn happy_path_deployment_workflow() {
    let orch = orchestrator(Config::default()).await;
    let provider = ScriptedProvider::ok(
        "workflow-runner",
        &["context", "workflow", "test", "verify"],
        8,
        json!({"result": "ok"}),
    );
    orch.resolver.register_provider(provider.clone()).await;

    let outcome = orch
        .handle_intent("alice", "run deployment workflow", None)
        .await;

    assert!(outcome.success, "promise was {}", outcome.promise);
    assert_eq!(outcome.promise, "<Promise>DONE</Promise>");
    assert!(outcome.incomplete_tasks.is_empty());
    assert!(outcome.error_history.is_empty());

    // Every ledger task is completed
    let verification = orch.tasks.verify_completion().await;
    assert!(verification.all_complete);
    let summary = orch.tasks.summary().await;
    assert_eq!(summary.completed, summary.total);
    assert!(summary.total >= 2);

    // Session reached completed
    let session = orch.sessions.get(&outcome.session_id).await.unwrap();
    assert_eq!(session.state, SessionState::Completed);
    assert!(session.completed_at.is_some());

    // Audit: exactly one session_start and one session_end, and one
    // agent_step per plan step, all successful
    let session_id = &outcome.session_id;
    assert_eq!(orch.audit.count_kind(session_id, AuditEventKind::SessionStart).await, 1);
    assert_eq!(orch.audit.count_kind(session_id, AuditEventKind::SessionEnd).await, 1);
    assert_eq!(
        orch.audit.count_kind(session_id, AuditEventKind::AgentStep).await,
        outcome.report.total_steps
    );
    let steps: Vec<_> = orch
        .audit
        .events_for_session(session_id)
        .await
        .into_iter()
        .filter(|e| e.kind == AuditEventKind::AgentStep)
        .collect();
    assert!(steps.iter().all(|e| e.success));
}

/// Retry-to-success: the provider times out once, the failure analyser
/// suggests a larger timeout, and the second iteration succeeds.
#[tokio::test]
async fn retry_to_success_after_analyser_adjustment() {
    let orch = orchestrator(Config::default()).await;

    let support = ScriptedProvider::ok(
        "support",
        &["context", "verify"],
        5,
        json!({"result": "ok"}),
    );
    orch.resolver.register_provider(support).await;

    let flaky = ScriptedProvider::ok("status-provider", &["fetch"], 7, json!({"status": "up"}));
    flaky.script(ProviderResponse::fail("timeout")).await;
    orch.resolver.register_provider(flaky.clone()).await;

    let analyser = ScriptedProvider::ok(
        "failure-analyser",
        &["failure-analyser"],
        5,
        json!({"inputs": {"timeout": 60}}),
    );
    orch.resolver.register_provider(analyser.clone()).await;

    let outcome = orch.handle_intent("alice", "fetch status", None).await;

    assert!(outcome.success, "promise was {}", outcome.promise);
    assert_eq!(outcome.promise, "<Promise>DONE</Promise>");

    // The flaky step recorded two iterations and one error-history entry
    // with the timeout pattern
    let flaky_record = outcome
        .report
        .results
        .iter()
        .find(|r| r.iterations == 2)
        .expect("one step should have retried");
    assert!(flaky_record.success);
    assert_eq!(outcome.report.error_history.len(), 1);
    assert!(outcome.report.error_history[0].error_summary.contains("timeout"));

    // The analyser ran once and its override reached the provider
    assert_eq!(analyser.call_count(), 1);
    let params = flaky.last_params.lock().await.clone().unwrap();
    assert_eq!(params.get("timeout"), Some(&json!(60)));
}

/// Hard stop: with MAX_ITERATIONS=5 and a step whose tests never pass, the
/// stop hook terminates the session and the step's task ends blocked.
#[tokio::test]
async fn hard_stop_on_max_iterations() {
    let mut config = Config::default();
    config.safety.max_iterations = 5;
    let orch = orchestrator(config).await;

    let support = ScriptedProvider::ok(
        "support",
        &["context", "verify"],
        5,
        json!({"result": "ok"}),
    );
    orch.resolver.register_provider(support).await;

    // Succeeds as an invocation but always carries an error field, so the
    // "no error" criterion never passes
    let broken = ScriptedProvider::ok("flaky-fetch", &["fetch"], 7, json!({"error": "broken"}));
    orch.resolver.register_provider(broken).await;

    let outcome = orch.handle_intent("alice", "fetch status", None).await;

    assert!(!outcome.success);
    assert_eq!(
        outcome.promise,
        "<Promise>BLOCKED: max_iterations_exceeded</Promise>"
    );
    assert_eq!(
        outcome.report.termination_reason.as_deref(),
        Some("max_iterations_exceeded")
    );

    // The gating step's ledger task is blocked with the stop-hook reason
    let snapshot = orch.tasks.snapshot().await;
    let blocked: Vec<_> = snapshot
        .tasks
        .iter()
        .filter(|t| t.state == TaskState::Blocked)
        .collect();
    assert_eq!(blocked.len(), 1);
    assert_eq!(blocked[0].blocked_reason.as_deref(), Some("max_iterations_exceeded"));

    let session = orch.sessions.get(&outcome.session_id).await.unwrap();
    assert_eq!(session.state, SessionState::Terminated);
    assert!(!outcome.incomplete_tasks.is_empty());
}

/// Resolver fall-through: the top provider reports a missing API key, the
/// second succeeds, and the step's output names the provider that won.
#[tokio::test]
async fn resolver_falls_through_to_working_provider() {
    let orch = orchestrator(Config::default()).await;

    let support = ScriptedProvider::ok(
        "support",
        &["context", "verify"],
        5,
        json!({"result": "ok"}),
    );
    orch.resolver.register_provider(support).await;

    let premium = ScriptedProvider::with_default(
        "premium-scraper",
        &["scrape"],
        9,
        ProviderResponse::needs_api_key("API key required"),
    );
    let fallback = ScriptedProvider::ok(
        "fallback-scraper",
        &["scrape"],
        5,
        json!({"payload": "page content"}),
    );
    orch.resolver.register_provider(premium.clone()).await;
    orch.resolver.register_provider(fallback.clone()).await;

    let outcome = orch
        .handle_intent("alice", "scrape example.com headlines", None)
        .await;

    assert!(outcome.success, "promise was {}", outcome.promise);
    assert_eq!(premium.call_count(), 1);
    assert_eq!(fallback.call_count(), 1);

    // The configuration gap is surfaced verbatim
    assert!(outcome
        .needs_configuration
        .iter()
        .any(|gap| gap == "premium-scraper: needs_api_key"));

    // The step output reflects the provider that actually served it
    let scrape_record = outcome
        .report
        .results
        .iter()
        .find(|r| {
            r.output
                .as_ref()
                .is_some_and(|o| o.get("payload").is_some())
        })
        .expect("scrape step output");
    assert_eq!(
        scrape_record.output.as_ref().unwrap().get("method"),
        Some(&json!("fallback-scraper"))
    );

    // Both invocations were audited
    assert!(
        orch.audit
            .count_kind(&outcome.session_id, AuditEventKind::SkillExecution)
            .await
            >= 2
    );
}

/// Approval rejection: an escalating step pauses the session; rejecting the
/// request fails the session with the approval reason.
#[tokio::test]
async fn approval_rejection_fails_session() {
    let config = Config::default();
    let orch = std::sync::Arc::new(orchestrator(config).await);

    let provider = ScriptedProvider::ok(
        "workflow-runner",
        &["context", "workflow", "test", "verify"],
        8,
        json!({"result": "ok"}),
    );
    orch.resolver.register_provider(provider).await;

    // A budget below the estimated step cost trips the pre-step hook's
    // escalation before the first invocation
    let runner = {
        let orch = orch.clone();
        tokio::spawn(async move {
            orch.handle_intent("alice", "run deployment workflow", Some(0.05))
                .await
        })
    };

    // Reject the approval request once it appears
    let request_id = loop {
        let pending = orch.approval.pending_requests().await;
        if let Some((id, reason)) = pending.first() {
            assert_eq!(reason, "insufficient_budget");
            break id.clone();
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    };

    // The session paused while awaiting the decision
    let sessions = orch.sessions.list().await;
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].state, SessionState::AwaitingApproval);

    assert!(orch.approval.reject(&request_id, "alice").await);
    let outcome = runner.await.unwrap();

    assert!(!outcome.success);
    assert_eq!(outcome.promise, "<Promise>BLOCKED: approval_rejected</Promise>");

    let session = orch.sessions.get(&outcome.session_id).await.unwrap();
    assert_eq!(session.state, SessionState::Failed);

    // Both sides of the approval exchange were audited
    assert_eq!(
        orch.audit
            .count_kind(&outcome.session_id, AuditEventKind::ApprovalRequest)
            .await,
        1
    );
    assert_eq!(
        orch.audit
            .count_kind(&outcome.session_id, AuditEventKind::ApprovalResponse)
            .await,
        1
    );
}

/// Dry-run mode: every step is skipped by the pre-step hook and the plan
/// still completes with all tasks done.
#[tokio::test]
async fn dry_run_skips_every_step() {
    let mut config = Config::default();
    config.hooks.dry_run = true;
    let orch = orchestrator(config).await;

    // No providers registered: skipped steps never reach the resolver
    let outcome = orch.handle_intent("alice", "run deployment workflow", None).await;

    assert!(outcome.success, "promise was {}", outcome.promise);
    let verification = orch.tasks.verify_completion().await;
    assert!(verification.all_complete);
}
