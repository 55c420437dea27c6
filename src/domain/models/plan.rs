//! Plan and step domain models.
//!
//! A plan is an ordered sequence of steps sealed by the planner. The engine
//! may re-bind a step's inputs while retrying but never reorders or removes
//! steps.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::capability::{CapabilityKind, TaskCategory};

/// Complexity bucket assigned by the planner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Complexity {
    Simple,
    Medium,
    Complex,
}

impl Default for Complexity {
    fn default() -> Self {
        Self::Medium
    }
}

impl Complexity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Simple => "simple",
            Self::Medium => "medium",
            Self::Complex => "complex",
        }
    }
}

/// Runtime status of a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    InProgress,
    Testing,
    Retrying,
    Done,
    Blocked,
}

impl Default for StepStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Testing => "testing",
            Self::Retrying => "retrying",
            Self::Done => "done",
            Self::Blocked => "blocked",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Blocked)
    }
}

/// One unit of work in a plan, bound to exactly one capability invocation
/// per iteration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    /// 1-based position; numbering stays dense and monotonic
    pub number: usize,

    pub description: String,

    /// Name of the requested capability
    pub capability: String,

    pub capability_kind: CapabilityKind,

    #[serde(default)]
    pub hooks_before: Vec<String>,

    #[serde(default)]
    pub hooks_after: Vec<String>,

    /// Input map; the engine re-binds these across retries
    #[serde(default)]
    pub inputs: serde_json::Map<String, serde_json::Value>,

    /// All criteria must pass; an empty list passes vacuously
    #[serde(default)]
    pub test_criteria: Vec<String>,

    /// Per-step override of the retry budget
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_iterations: Option<u32>,

    #[serde(default)]
    pub status: StepStatus,
}

impl Step {
    pub fn new(
        number: usize,
        description: impl Into<String>,
        capability: impl Into<String>,
        capability_kind: CapabilityKind,
    ) -> Self {
        Self {
            number,
            description: description.into(),
            capability: capability.into(),
            capability_kind,
            hooks_before: Vec::new(),
            hooks_after: Vec::new(),
            inputs: serde_json::Map::new(),
            test_criteria: Vec::new(),
            max_iterations: None,
            status: StepStatus::Pending,
        }
    }

    pub fn with_input(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.inputs.insert(key.into(), value);
        self
    }

    pub fn with_test_criteria(mut self, criteria: &[&str]) -> Self {
        self.test_criteria = criteria.iter().map(|s| (*s).to_string()).collect();
        self
    }

    pub fn with_hooks(mut self, before: &[&str], after: &[&str]) -> Self {
        self.hooks_before = before.iter().map(|s| (*s).to_string()).collect();
        self.hooks_after = after.iter().map(|s| (*s).to_string()).collect();
        self
    }
}

/// An ordered sequence of steps sealed by the planner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    /// Unique plan/task identifier
    pub task_id: String,

    pub original_request: String,

    /// Restatement of what the user actually wants
    pub understood_goal: String,

    pub category: TaskCategory,

    pub complexity: Complexity,

    pub steps: Vec<Step>,

    /// Questions the planner would ask; may be empty
    #[serde(default)]
    pub clarifying_questions: Vec<String>,

    /// Plan-level retry budget used when a step carries no override
    #[serde(default = "default_plan_iterations")]
    pub max_iterations: u32,

    pub created_at: DateTime<Utc>,
}

fn default_plan_iterations() -> u32 {
    10
}

impl Plan {
    pub fn new(task_id: impl Into<String>, original_request: impl Into<String>) -> Self {
        let original_request = original_request.into();
        Self {
            task_id: task_id.into(),
            understood_goal: original_request.clone(),
            original_request,
            category: TaskCategory::Unknown,
            complexity: Complexity::Medium,
            steps: Vec::new(),
            clarifying_questions: Vec::new(),
            max_iterations: default_plan_iterations(),
            created_at: Utc::now(),
        }
    }

    /// Renumber steps densely 1..N, preserving order.
    pub fn renumber(&mut self) {
        for (idx, step) in self.steps.iter_mut().enumerate() {
            step.number = idx + 1;
        }
    }

    /// The retry budget for a step, honouring its override.
    pub fn iterations_for(&self, step: &Step) -> u32 {
        step.max_iterations.unwrap_or(self.max_iterations)
    }
}
