//! Property tests for the task ledger state machine.

use proptest::prelude::*;

use conductor::domain::models::task::{Task, TaskState, MIN_EVIDENCE_CHARS};

fn arb_state() -> impl Strategy<Value = TaskState> {
    prop_oneof![
        Just(TaskState::Pending),
        Just(TaskState::InProgress),
        Just(TaskState::Completed),
        Just(TaskState::Blocked),
    ]
}

proptest! {
    /// Completed is a sink: no transition out of it ever validates.
    #[test]
    fn completed_admits_no_transition(target in arb_state(), evidence in ".{0,40}", reason in ".{0,40}") {
        let mut task = Task::new("task_1", "anything");
        task.state = TaskState::Completed;

        let result = task.validate_transition(target, Some(&evidence), Some(&reason));
        prop_assert!(result.is_err());
    }

    /// Completion validates exactly when evidence is non-blank and long
    /// enough, regardless of its content.
    #[test]
    fn completion_requires_sufficient_evidence(evidence in ".{0,40}") {
        let mut task = Task::new("task_1", "anything");
        task.state = TaskState::InProgress;

        let result = task.validate_transition(TaskState::Completed, Some(&evidence), None);
        let acceptable = evidence.len() >= MIN_EVIDENCE_CHARS && !evidence.trim().is_empty();
        prop_assert_eq!(result.is_ok(), acceptable);
    }

    /// Blocking validates exactly when the reason is non-blank, from any
    /// non-completed state that allows it.
    #[test]
    fn blocking_requires_reason(reason in ".{0,40}") {
        let task = Task::new("task_1", "anything");
        let result = task.validate_transition(TaskState::Blocked, None, Some(&reason));
        prop_assert_eq!(result.is_ok(), !reason.trim().is_empty());
    }

    /// The transition relation is consistent: validate_transition never
    /// accepts a pair that can_transition_to rejects.
    #[test]
    fn validation_respects_transition_table(from in arb_state(), to in arb_state()) {
        let mut task = Task::new("task_1", "anything");
        task.state = from;

        let evidence = "evidence long enough to pass";
        let reason = "a concrete reason";
        let result = task.validate_transition(to, Some(evidence), Some(reason));

        if result.is_ok() {
            prop_assert!(from.can_transition_to(to));
        }
    }
}
