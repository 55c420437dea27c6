//! Ledger task domain model.
//!
//! Tasks are the authoritative progress record for a session. The ledger is
//! expand-only: tasks may be added but never deleted, and completed tasks
//! are final.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::error::TaskError;

/// Minimum evidence length required to mark a task completed.
pub const MIN_EVIDENCE_CHARS: usize = 10;

/// State of a ledger task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Task is defined but work has not started
    Pending,
    /// Task is actively being worked
    InProgress,
    /// Task finished with evidence attached
    Completed,
    /// Task cannot proceed; carries a reason
    Blocked,
}

impl Default for TaskState {
    fn default() -> Self {
        Self::Pending
    }
}

impl TaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Blocked => "blocked",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "in_progress" | "in-progress" => Some(Self::InProgress),
            "completed" | "complete" => Some(Self::Completed),
            "blocked" => Some(Self::Blocked),
            _ => None,
        }
    }

    /// Markdown status marker used by the ledger rendering.
    pub fn marker(&self) -> &'static str {
        match self {
            Self::Pending => "[ ]",
            Self::InProgress => "[~]",
            Self::Completed => "[x]",
            Self::Blocked => "[!]",
        }
    }

    /// Valid transitions from this state.
    ///
    /// Completed is final. Blocked is recoverable back to in-progress.
    pub fn valid_transitions(&self) -> &'static [TaskState] {
        match self {
            Self::Pending => &[Self::InProgress, Self::Blocked],
            Self::InProgress => &[Self::Completed, Self::Blocked],
            Self::Blocked => &[Self::InProgress],
            Self::Completed => &[],
        }
    }

    pub fn can_transition_to(&self, new_state: Self) -> bool {
        self.valid_transitions().contains(&new_state)
    }
}

/// A single task in the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Stable identifier (e.g. "task_1")
    pub id: String,

    /// Human description of the work
    pub description: String,

    /// Current state
    pub state: TaskState,

    /// Evidence string; required to be at least [`MIN_EVIDENCE_CHARS`] on completion
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evidence: Option<String>,

    /// Free-form progress notes
    #[serde(default)]
    pub notes: Vec<String>,

    /// Reason the task is blocked, when it is
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocked_reason: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Task {
    /// Create a new pending task.
    pub fn new(id: impl Into<String>, description: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            description: description.into(),
            state: TaskState::Pending,
            evidence: None,
            notes: Vec::new(),
            blocked_reason: None,
            created_at: Some(now),
            updated_at: Some(now),
        }
    }

    /// Validate a requested transition against the ledger rules.
    ///
    /// Evidence and reasons are checked here so the rules live in one place;
    /// the task manager applies the transition only after this passes.
    pub fn validate_transition(
        &self,
        new_state: TaskState,
        evidence: Option<&str>,
        reason: Option<&str>,
    ) -> Result<(), TaskError> {
        if self.state == TaskState::Completed {
            return Err(TaskError::CompletedIsFinal(self.id.clone()));
        }

        if !self.state.can_transition_to(new_state) {
            return Err(TaskError::InvalidTransition {
                from: self.state.as_str().to_string(),
                to: new_state.as_str().to_string(),
            });
        }

        match new_state {
            TaskState::Completed => {
                let evidence = evidence.ok_or_else(|| TaskError::EvidenceRequired(self.id.clone()))?;
                if evidence.trim().is_empty() {
                    return Err(TaskError::EvidenceRequired(self.id.clone()));
                }
                if evidence.len() < MIN_EVIDENCE_CHARS {
                    return Err(TaskError::EvidenceTooShort {
                        len: evidence.len(),
                        min: MIN_EVIDENCE_CHARS,
                    });
                }
            }
            TaskState::Blocked => {
                let reason = reason.ok_or_else(|| TaskError::BlockReasonRequired(self.id.clone()))?;
                if reason.trim().is_empty() {
                    return Err(TaskError::BlockReasonRequired(self.id.clone()));
                }
            }
            _ => {}
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_markers() {
        assert_eq!(TaskState::Pending.marker(), "[ ]");
        assert_eq!(TaskState::InProgress.marker(), "[~]");
        assert_eq!(TaskState::Completed.marker(), "[x]");
        assert_eq!(TaskState::Blocked.marker(), "[!]");
    }

    #[test]
    fn test_state_round_trip() {
        for state in [
            TaskState::Pending,
            TaskState::InProgress,
            TaskState::Completed,
            TaskState::Blocked,
        ] {
            assert_eq!(TaskState::from_str(state.as_str()), Some(state));
        }
        assert_eq!(TaskState::from_str("nonsense"), None);
    }

    #[test]
    fn test_pending_to_in_progress_is_unconditional() {
        let task = Task::new("task_1", "do the thing");
        assert!(task
            .validate_transition(TaskState::InProgress, None, None)
            .is_ok());
    }

    #[test]
    fn test_completion_requires_evidence() {
        let mut task = Task::new("task_1", "do the thing");
        task.state = TaskState::InProgress;

        assert_eq!(
            task.validate_transition(TaskState::Completed, None, None),
            Err(TaskError::EvidenceRequired("task_1".to_string()))
        );
        assert_eq!(
            task.validate_transition(TaskState::Completed, Some("short"), None),
            Err(TaskError::EvidenceTooShort { len: 5, min: 10 })
        );
        assert!(task
            .validate_transition(TaskState::Completed, Some("ran the suite, all green"), None)
            .is_ok());
    }

    #[test]
    fn test_blocked_requires_reason() {
        let task = Task::new("task_1", "do the thing");
        assert_eq!(
            task.validate_transition(TaskState::Blocked, None, None),
            Err(TaskError::BlockReasonRequired("task_1".to_string()))
        );
        assert!(task
            .validate_transition(TaskState::Blocked, None, Some("upstream outage"))
            .is_ok());
    }

    #[test]
    fn test_completed_is_final() {
        let mut task = Task::new("task_1", "do the thing");
        task.state = TaskState::Completed;

        for target in [TaskState::Pending, TaskState::InProgress, TaskState::Blocked] {
            assert_eq!(
                task.validate_transition(target, None, Some("reason")),
                Err(TaskError::CompletedIsFinal("task_1".to_string()))
            );
        }
    }

    #[test]
    fn test_blocked_is_recoverable() {
        let mut task = Task::new("task_1", "do the thing");
        task.state = TaskState::Blocked;
        assert!(task
            .validate_transition(TaskState::InProgress, None, None)
            .is_ok());
    }

    #[test]
    fn test_task_json_round_trip() {
        let mut task = Task::new("task_3", "verify deployment");
        task.state = TaskState::Blocked;
        task.blocked_reason = Some("waiting on approval".to_string());
        task.notes.push("retried twice".to_string());

        let json = serde_json::to_string(&task).unwrap();
        let back: Task = serde_json::from_str(&json).unwrap();
        assert_eq!(task, back);
        assert_eq!(serde_json::to_string(&back).unwrap(), json);
    }
}
