//! Hook chain domain models.
//!
//! Hooks are policy gates with no business logic of their own. Each returns
//! a decision plus a reason, a confidence, and optional data; the engine
//! interprets decisions through its own table.

use serde::{Deserialize, Serialize};

/// Point in the execution lifecycle where a hook fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookTrigger {
    /// Before a step's capability invocation
    Before,
    /// After a step's capability invocation
    After,
    /// When an invocation errors
    OnError,
    /// When a plan completes
    OnComplete,
    /// After every engine iteration (the stop hook's trigger)
    AfterIteration,
}

impl HookTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Before => "before",
            Self::After => "after",
            Self::OnError => "on_error",
            Self::OnComplete => "on_complete",
            Self::AfterIteration => "after_iteration",
        }
    }
}

/// Decision a hook can return.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookDecision {
    /// Keep going
    Continue,
    /// Skip the current step
    Skip,
    /// Retry the current step
    Retry,
    /// Stop execution
    Terminate,
    /// Pause and ask a human
    Escalate,
}

impl HookDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Continue => "continue",
            Self::Skip => "skip",
            Self::Retry => "retry",
            Self::Terminate => "terminate",
            Self::Escalate => "escalate",
        }
    }
}

/// Outcome of a hook evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HookOutcome {
    pub decision: HookDecision,
    pub reason: String,
    /// Confidence in [0, 1]
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl HookOutcome {
    pub fn new(decision: HookDecision, reason: impl Into<String>, confidence: f64) -> Self {
        Self {
            decision,
            reason: reason.into(),
            confidence: confidence.clamp(0.0, 1.0),
            data: None,
        }
    }

    pub fn proceed(reason: impl Into<String>, confidence: f64) -> Self {
        Self::new(HookDecision::Continue, reason, confidence)
    }

    pub fn skip(reason: impl Into<String>) -> Self {
        Self::new(HookDecision::Skip, reason, 1.0)
    }

    pub fn retry(reason: impl Into<String>, confidence: f64) -> Self {
        Self::new(HookDecision::Retry, reason, confidence)
    }

    pub fn terminate(reason: impl Into<String>) -> Self {
        Self::new(HookDecision::Terminate, reason, 1.0)
    }

    pub fn escalate(reason: impl Into<String>, confidence: f64) -> Self {
        Self::new(HookDecision::Escalate, reason, confidence)
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// Latest test results visible to the stop hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TestReport {
    pub passed: u32,
    pub failed: u32,
    pub skipped: u32,
}

impl TestReport {
    pub fn total(&self) -> u32 {
        self.passed + self.failed + self.skipped
    }

    /// Success means at least one test passed and none failed.
    pub fn all_passed(&self) -> bool {
        self.failed == 0 && self.passed > 0
    }
}

/// Context handed to every hook evaluation.
#[derive(Debug, Clone, Default)]
pub struct HookContext {
    pub session_id: String,
    pub agent_id: String,
    pub iteration: u32,
    pub elapsed_seconds: f64,
    /// Recent log tail of the session
    pub logs: Vec<String>,
    pub test_results: Option<TestReport>,
    /// Permissions held by the acting agent
    pub permissions: Vec<String>,
    pub budget_spent: f64,
    pub budget_limit: f64,
    /// Set when the pre-step permission check fired this iteration
    pub permission_violation: bool,
    /// Artifacts the current step declared it produced
    pub artifacts: Vec<String>,
    /// Output of the current step's invocation, when one has run
    pub step_result: Option<serde_json::Value>,
}

impl HookContext {
    pub fn new(session_id: impl Into<String>, agent_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            agent_id: agent_id.into(),
            budget_limit: 100.0,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confidence_is_clamped() {
        let outcome = HookOutcome::proceed("ok", 3.5);
        assert!((outcome.confidence - 1.0).abs() < f64::EPSILON);
        let outcome = HookOutcome::escalate("risk", -0.2);
        assert!(outcome.confidence.abs() < f64::EPSILON);
    }

    #[test]
    fn test_test_report_all_passed() {
        assert!(TestReport { passed: 3, failed: 0, skipped: 1 }.all_passed());
        assert!(!TestReport { passed: 0, failed: 0, skipped: 0 }.all_passed());
        assert!(!TestReport { passed: 5, failed: 1, skipped: 0 }.all_passed());
    }

    #[test]
    fn test_decision_serialization() {
        assert_eq!(
            serde_json::to_string(&HookDecision::Escalate).unwrap(),
            r#""escalate""#
        );
        assert_eq!(HookTrigger::AfterIteration.as_str(), "after_iteration");
    }
}
