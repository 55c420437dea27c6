//! Domain error types for the Conductor orchestration core
//!
//! This module defines all error types using thiserror for structured error
//! handling. Each error enum represents errors from a specific domain or
//! infrastructure component.

use thiserror::Error;
use uuid::Uuid;

/// Errors related to task-ledger operations and transition validation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TaskError {
    /// Task with the given ID was not found in the ledger
    #[error("Task not found: {0}")]
    NotFound(String),

    /// Invalid state transition attempted
    #[error("Invalid task transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    /// Completion requested without evidence
    #[error("Task {0} cannot be completed without evidence")]
    EvidenceRequired(String),

    /// Evidence shorter than the configured minimum
    #[error("Evidence too short: {len} chars, minimum {min}")]
    EvidenceTooShort { len: usize, min: usize },

    /// Blocking requested without a reason
    #[error("Task {0} cannot be blocked without a reason")]
    BlockReasonRequired(String),

    /// Completed tasks are final and admit no further transitions
    #[error("Task {0} is completed and cannot change state")]
    CompletedIsFinal(String),
}

/// Errors related to session lifecycle management
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// Session with the given ID was not found
    #[error("Session not found: {0}")]
    NotFound(String),

    /// Invalid lifecycle transition attempted
    #[error("Invalid session transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },
}

/// Errors related to the message store
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MessageError {
    /// Message with the given ID was not found
    #[error("Message not found: {0}")]
    NotFound(String),

    /// User messages must carry at least one linked task before processing
    #[error("Message {0} has no linked tasks")]
    NoLinkedTasks(String),

    /// A message can only complete once every linked task is completed
    #[error("Message {message_id} has {incomplete} incomplete linked tasks")]
    LinkedTasksIncomplete {
        message_id: String,
        incomplete: usize,
    },
}

/// Errors related to capability resolution and provider execution
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CapabilityError {
    /// No provider matched the requested capability
    #[error("No providers matched request: {0}")]
    NoCandidates(String),

    /// Every matched provider failed
    #[error("All {attempts} providers failed for request: {request}")]
    AllProvidersFailed { request: String, attempts: usize },

    /// Provider invocation timed out
    #[error("Capability invocation timed out after {0} seconds")]
    Timeout(u64),

    /// Auto-install requested but not permitted by configuration
    #[error("Auto-install disabled for provider: {0}")]
    InstallDisabled(String),

    /// Auto-install command failed
    #[error("Install failed for provider {0}")]
    InstallFailed(String),
}

impl CapabilityError {
    /// Returns true if this error is transient and could succeed on retry
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::AllProvidersFailed { .. })
    }

    /// Returns true if this error represents a permanent failure
    pub const fn is_permanent(&self) -> bool {
        !self.is_transient()
    }
}

/// Errors related to the remote-execution adapter
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    /// Endpoint with the given name was not registered
    #[error("Remote endpoint not found: {0}")]
    EndpointNotFound(String),

    /// HTTP request failed due to network error
    #[error("Remote request failed: {0}")]
    RequestFailed(String),

    /// Remote returned an error status code
    #[error("Remote error {status}: {message}")]
    HttpStatus { status: u16, message: String },

    /// Request timed out after the specified duration
    #[error("Remote call timed out after {0} seconds")]
    Timeout(u64),
}

impl RemoteError {
    /// Returns true if this error is transient and should be retried
    pub const fn is_transient(&self) -> bool {
        match self {
            Self::RequestFailed(_) | Self::Timeout(_) => true,
            Self::HttpStatus { status, .. } => *status >= 500,
            Self::EndpointNotFound(_) => false,
        }
    }
}

/// Errors related to scheduled-task management
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScheduleError {
    /// Scheduled task with the given ID was not found
    #[error("Scheduled task not found: {0}")]
    NotFound(Uuid),

    /// Cron expression could not be parsed
    #[error("Invalid cron expression: {0}")]
    InvalidCron(String),

    /// Interval schedules require a positive interval
    #[error("Invalid interval: {0} seconds")]
    InvalidInterval(u64),
}

/// Errors related to state-store persistence
#[derive(Error, Debug)]
pub enum StoreError {
    /// I/O error while reading or writing a store file
    #[error("Store I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("Store serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_error_display() {
        let err = TaskError::NotFound("task_1".to_string());
        assert_eq!(err.to_string(), "Task not found: task_1");

        let err = TaskError::InvalidTransition {
            from: "completed".to_string(),
            to: "pending".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Invalid task transition from completed to pending"
        );

        let err = TaskError::EvidenceTooShort { len: 3, min: 10 };
        assert_eq!(err.to_string(), "Evidence too short: 3 chars, minimum 10");
    }

    #[test]
    fn test_capability_error_is_transient() {
        assert!(CapabilityError::Timeout(60).is_transient());
        assert!(
            CapabilityError::AllProvidersFailed {
                request: "scrape".to_string(),
                attempts: 2
            }
            .is_transient()
        );
        assert!(!CapabilityError::NoCandidates("x".to_string()).is_transient());
        assert!(CapabilityError::InstallDisabled("firecrawl".to_string()).is_permanent());
    }

    #[test]
    fn test_remote_error_is_transient() {
        assert!(RemoteError::RequestFailed("reset".to_string()).is_transient());
        assert!(RemoteError::Timeout(60).is_transient());
        assert!(
            RemoteError::HttpStatus {
                status: 503,
                message: "unavailable".to_string()
            }
            .is_transient()
        );
        assert!(
            !RemoteError::HttpStatus {
                status: 404,
                message: "missing".to_string()
            }
            .is_transient()
        );
        assert!(!RemoteError::EndpointNotFound("ci".to_string()).is_transient());
    }

    #[test]
    fn test_message_error_display() {
        let err = MessageError::LinkedTasksIncomplete {
            message_id: "msg_1".to_string(),
            incomplete: 2,
        };
        assert_eq!(err.to_string(), "Message msg_1 has 2 incomplete linked tasks");
    }

    #[test]
    fn test_task_error_clone_eq() {
        let err1 = TaskError::CompletedIsFinal("task_2".to_string());
        let err2 = err1.clone();
        assert_eq!(err1, err2);
    }
}
