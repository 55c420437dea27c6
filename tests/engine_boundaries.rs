//! Engine boundary behaviour: empty plans, zero/one-iteration budgets, and
//! cooperative cancellation.

mod common;

use common::ScriptedProvider;
use serde_json::json;

use conductor::domain::models::capability::CapabilityKind;
use conductor::domain::models::config::Config;
use conductor::domain::models::plan::{Plan, Step};
use conductor::domain::models::session::SessionState;
use conductor::domain::models::task::TaskState;
use conductor::domain::ports::provider::ProviderResponse;
use conductor::services::orchestrator::Orchestrator;

async fn orchestrator() -> Orchestrator {
    Orchestrator::in_memory(Config::default()).await.unwrap()
}

async fn executing_session(orch: &Orchestrator) -> String {
    let session = orch.sessions.create("alice", "manual plan", 100.0).await;
    orch.sessions
        .transition(&session.id, SessionState::Executing)
        .await
        .unwrap();
    orch.tasks.bind_session(&session.id).await;
    session.id
}

fn single_step_plan(capability: &str) -> Plan {
    let mut plan = Plan::new("task_manual", "manual plan");
    plan.steps.push(
        Step::new(1, "do the work", capability, CapabilityKind::Skill)
            .with_test_criteria(&["no error"]),
    );
    plan
}

#[tokio::test]
async fn empty_plan_is_done_with_zero_results() {
    let orch = orchestrator().await;
    let session_id = executing_session(&orch).await;

    let plan = Plan::new("task_empty", "do nothing");
    let report = orch.engine.execute_plan(&session_id, &plan, &[]).await;

    assert_eq!(report.promise, "<Promise>DONE</Promise>");
    assert!(report.results.is_empty());
    assert_eq!(report.steps_completed, 0);
}

#[tokio::test]
async fn zero_iterations_blocks_without_invocation() {
    let orch = orchestrator().await;
    let session_id = executing_session(&orch).await;

    let provider = ScriptedProvider::ok("worker", &["work"], 5, json!({"result": "ok"}));
    orch.resolver.register_provider(provider.clone()).await;

    let mut plan = single_step_plan("work");
    plan.steps[0].max_iterations = Some(0);
    let task_ids = orch.tasks.create_tasks(&["do the work".to_string()]).await;

    let report = orch.engine.execute_plan(&session_id, &plan, &task_ids).await;

    assert!(report.promise.starts_with("<Promise>BLOCKED:"));
    assert_eq!(provider.call_count(), 0);
    assert_eq!(report.results[0].iterations, 0);

    let task = orch.tasks.get(&task_ids[0]).await.unwrap();
    assert_eq!(task.state, TaskState::Blocked);
}

#[tokio::test]
async fn one_iteration_runs_exactly_once() {
    let orch = orchestrator().await;

    // Success case: done after exactly one invocation
    {
        let session_id = executing_session(&orch).await;
        let provider = ScriptedProvider::ok("win", &["succeed"], 5, json!({"result": "ok"}));
        orch.resolver.register_provider(provider.clone()).await;

        let mut plan = single_step_plan("succeed");
        plan.steps[0].max_iterations = Some(1);
        let task_ids = orch.tasks.create_tasks(&["succeed once".to_string()]).await;

        let report = orch.engine.execute_plan(&session_id, &plan, &task_ids).await;
        assert_eq!(report.promise, "<Promise>DONE</Promise>");
        assert_eq!(provider.call_count(), 1);
        assert_eq!(report.results[0].iterations, 1);
    }

    // Failure case: blocked after exactly one invocation
    {
        let session_id = executing_session(&orch).await;
        let provider = ScriptedProvider::with_default(
            "lose",
            &["collapse"],
            5,
            ProviderResponse::fail("boom"),
        );
        orch.resolver.register_provider(provider.clone()).await;

        let mut plan = single_step_plan("collapse");
        plan.steps[0].max_iterations = Some(1);
        let task_ids = orch.tasks.create_tasks(&["fail once".to_string()]).await;

        let report = orch.engine.execute_plan(&session_id, &plan, &task_ids).await;
        assert!(report.promise.starts_with("<Promise>BLOCKED:"));
        assert_eq!(provider.call_count(), 1);
        assert_eq!(report.results[0].iterations, 1);
        assert_eq!(report.error_history.len(), 1);
    }
}

#[tokio::test]
async fn cancellation_blocks_with_cancelled_reason() {
    let orch = orchestrator().await;
    let session_id = executing_session(&orch).await;

    let provider = ScriptedProvider::ok("worker", &["work"], 5, json!({"result": "ok"}));
    orch.resolver.register_provider(provider.clone()).await;

    // Cancel before execution starts: the flag is observed at the top of
    // the first iteration
    orch.sessions.cancel(&session_id).await.unwrap();
    // Cancelling again is a no-op
    orch.sessions.cancel(&session_id).await.unwrap();

    let plan = single_step_plan("work");
    let task_ids = orch.tasks.create_tasks(&["do the work".to_string()]).await;

    let report = orch.engine.execute_plan(&session_id, &plan, &task_ids).await;

    assert_eq!(report.promise, "<Promise>BLOCKED: cancelled</Promise>");
    assert_eq!(provider.call_count(), 0);

    let task = orch.tasks.get(&task_ids[0]).await.unwrap();
    assert_eq!(task.state, TaskState::Blocked);
    assert_eq!(task.blocked_reason.as_deref(), Some("cancelled"));
}

#[tokio::test]
async fn sibling_steps_have_independent_retry_budgets() {
    let orch = orchestrator().await;
    let session_id = executing_session(&orch).await;

    // First step exhausts its own budget; the sibling never shares it
    let first = ScriptedProvider::with_default("a", &["alpha"], 5, ProviderResponse::fail("boom"));
    let second = ScriptedProvider::ok("b", &["beta"], 5, json!({"result": "ok"}));
    orch.resolver.register_provider(first.clone()).await;
    orch.resolver.register_provider(second.clone()).await;

    let mut plan = Plan::new("task_siblings", "two steps");
    plan.steps.push(Step::new(1, "first", "alpha", CapabilityKind::Skill));
    plan.steps.push(Step::new(2, "second", "beta", CapabilityKind::Skill));
    plan.steps[0].max_iterations = Some(3);
    plan.steps[1].max_iterations = Some(3);
    let task_ids = orch
        .tasks
        .create_tasks(&["first".to_string(), "second".to_string()])
        .await;

    let report = orch.engine.execute_plan(&session_id, &plan, &task_ids).await;

    // First step blocked after its own 3 iterations; plan stops there
    assert!(report.promise.starts_with("<Promise>BLOCKED:"));
    assert_eq!(first.call_count(), 3);
    assert_eq!(second.call_count(), 0);
    assert_eq!(report.results.len(), 1);
    assert_eq!(report.results[0].iterations, 3);
}
