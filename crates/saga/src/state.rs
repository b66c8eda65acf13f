//! Saga state machine.

use serde::{Deserialize, Serialize};

/// The state of a saga run.
///
/// State transitions:
/// ```text
/// NotStarted ──► Running ──┬──► Completed
///                          └──► Compensating ──┬──► Failed
///                                              └──► CompensationIncomplete
/// ```
///
/// `Failed` means every compensable step was rolled back.
/// `CompensationIncomplete` means at least one compensation failed and the
/// affected stock needs manual reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SagaState {
    #[default]
    NotStarted,
    Running,
    Compensating,
    Completed,
    Failed,
    CompensationIncomplete,
}

impl SagaState {
    /// Returns true if the saga can begin running.
    pub fn can_run(&self) -> bool {
        matches!(self, SagaState::NotStarted)
    }

    /// Returns true if the saga can begin compensation.
    pub fn can_compensate(&self) -> bool {
        matches!(self, SagaState::Running)
    }

    /// Returns true if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SagaState::Completed | SagaState::Failed | SagaState::CompensationIncomplete
        )
    }

    /// Returns the state name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            SagaState::NotStarted => "not_started",
            SagaState::Running => "running",
            SagaState::Compensating => "compensating",
            SagaState::Completed => "completed",
            SagaState::Failed => "failed",
            SagaState::CompensationIncomplete => "compensation_incomplete",
        }
    }
}

impl std::fmt::Display for SagaState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
