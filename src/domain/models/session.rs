//! Session domain model.
//!
//! A session represents one end-to-end execution of a user intent. It owns
//! its plan reference, log buffer, and cost/iteration counters; it is
//! mutated only through typed transitions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::error::SessionError;

/// Maximum log lines retained on a session before the oldest are dropped.
const LOG_BUFFER_CAP: usize = 500;

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Session created but planning has not started
    Created,
    /// Planner is expanding the intent
    Planning,
    /// Engine is driving the plan
    Executing,
    /// Execution paused (cooperative)
    Paused,
    /// Waiting on a human approval decision
    AwaitingApproval,
    /// All ledger tasks completed
    Completed,
    /// Execution failed or was rejected
    Failed,
    /// Hard-stopped by the termination gate
    Terminated,
}

impl Default for SessionState {
    fn default() -> Self {
        Self::Created
    }
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Planning => "planning",
            Self::Executing => "executing",
            Self::Paused => "paused",
            Self::AwaitingApproval => "awaiting_approval",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Terminated => "terminated",
        }
    }

    /// Check if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Terminated)
    }

    /// Valid transitions from this state.
    pub fn valid_transitions(&self) -> &'static [SessionState] {
        match self {
            Self::Created => &[Self::Planning, Self::Executing, Self::Failed, Self::Terminated],
            Self::Planning => &[Self::Executing, Self::Failed, Self::Terminated],
            Self::Executing => &[
                Self::Paused,
                Self::AwaitingApproval,
                Self::Completed,
                Self::Failed,
                Self::Terminated,
            ],
            Self::Paused => &[Self::Executing, Self::Failed, Self::Terminated],
            Self::AwaitingApproval => &[Self::Executing, Self::Failed, Self::Terminated],
            Self::Completed | Self::Failed | Self::Terminated => &[],
        }
    }

    pub fn can_transition_to(&self, new_state: Self) -> bool {
        self.valid_transitions().contains(&new_state)
    }
}

/// One end-to-end execution of an intent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// Opaque session identifier
    pub id: String,

    /// Owner of the session
    pub user_id: String,

    /// The original free-text intent
    pub intent: String,

    /// Current lifecycle state
    pub state: SessionState,

    /// Monotonic iteration counter, incremented by the engine
    pub iteration: u32,

    /// Budget consumed so far
    pub budget_spent: f64,

    /// Budget ceiling for this session
    pub budget_limit: f64,

    /// Elapsed-time baseline
    pub started_at: DateTime<Utc>,

    /// Stamped when execution finishes, regardless of outcome
    pub completed_at: Option<DateTime<Utc>>,

    /// References to artifacts produced during execution
    #[serde(default)]
    pub artifacts: Vec<String>,

    /// Bounded append-only log buffer (oldest lines dropped past the cap)
    #[serde(default)]
    pub logs: Vec<String>,

    /// Identifier of the active plan, once sealed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan_id: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    /// Create a new session for a user intent.
    pub fn new(user_id: impl Into<String>, intent: impl Into<String>, budget_limit: f64) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            intent: intent.into(),
            state: SessionState::Created,
            iteration: 0,
            budget_spent: 0.0,
            budget_limit,
            started_at: now,
            completed_at: None,
            artifacts: Vec::new(),
            logs: Vec::new(),
            plan_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Apply a typed state transition.
    pub fn transition_to(&mut self, new_state: SessionState) -> Result<(), SessionError> {
        if !self.state.can_transition_to(new_state) {
            return Err(SessionError::InvalidTransition {
                from: self.state.as_str().to_string(),
                to: new_state.as_str().to_string(),
            });
        }
        self.state = new_state;
        self.updated_at = Utc::now();
        if new_state.is_terminal() {
            self.completed_at = Some(Utc::now());
        }
        Ok(())
    }

    /// Append a log line, dropping the oldest past the buffer cap.
    pub fn append_log(&mut self, line: impl Into<String>) {
        self.logs.push(line.into());
        if self.logs.len() > LOG_BUFFER_CAP {
            let overflow = self.logs.len() - LOG_BUFFER_CAP;
            self.logs.drain(..overflow);
        }
        self.updated_at = Utc::now();
    }

    /// The most recent `n` log lines, oldest first.
    pub fn recent_logs(&self, n: usize) -> Vec<String> {
        let start = self.logs.len().saturating_sub(n);
        self.logs[start..].to_vec()
    }

    /// Record budget consumption.
    pub fn record_cost(&mut self, cost: f64) {
        self.budget_spent += cost.max(0.0);
        self.updated_at = Utc::now();
    }

    /// Seconds elapsed since the session baseline.
    pub fn elapsed_seconds(&self) -> f64 {
        (Utc::now() - self.started_at).num_milliseconds() as f64 / 1000.0
    }
}
