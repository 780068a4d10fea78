use serde::{Deserialize, Serialize};
use std::fmt;

/// Status of a [`WorkflowInstance`](super::WorkflowInstance).
///
/// Transitions are restricted to the graph in §4.3: `running -> running`,
/// `running -> waiting`, `waiting -> running`, `running -> completed`,
/// `running -> failed`, `failed -> compensating`, `compensating ->
/// compensated`. All other transitions are forbidden.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Running,
    Waiting,
    Failed,
    Completed,
    Compensating,
    Compensated,
}

impl WorkflowStatus {
    /// A workflow in this status will never transition further.
    pub fn is_terminal(self) -> bool {
        matches!(self, WorkflowStatus::Completed | WorkflowStatus::Compensated)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            WorkflowStatus::Running => "running",
            WorkflowStatus::Waiting => "waiting",
            WorkflowStatus::Failed => "failed",
            WorkflowStatus::Completed => "completed",
            WorkflowStatus::Compensating => "compensating",
            WorkflowStatus::Compensated => "compensated",
        }
    }

    /// Whether moving from `self` to `next` is an allowed transition.
    pub fn can_transition_to(self, next: WorkflowStatus) -> bool {
        use WorkflowStatus::*;
        matches!(
            (self, next),
            (Running, Running)
                | (Running, Waiting)
                | (Waiting, Running)
                | (Running, Completed)
                | (Running, Failed)
                | (Failed, Compensating)
                | (Compensating, Compensated)
        )
    }
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of a [`StepExecution`](super::StepExecution).
///
/// `Completed`, `Failed`, `Skipped`, and `Compensated` are terminal: once a
/// step execution reaches one of these, it is never demoted or overwritten
/// (§3 invariant 1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
    Compensated,
}

impl StepStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            StepStatus::Completed
                | StepStatus::Failed
                | StepStatus::Skipped
                | StepStatus::Compensated
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StepStatus::Pending => "pending",
            StepStatus::Running => "running",
            StepStatus::Completed => "completed",
            StepStatus::Failed => "failed",
            StepStatus::Skipped => "skipped",
            StepStatus::Compensated => "compensated",
        }
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome recorded against a [`CompensationRecord`](super::CompensationRecord)
/// once it has been executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompensationResult {
    Success,
    Failed,
}

impl CompensationResult {
    pub fn as_str(self) -> &'static str {
        match self {
            CompensationResult::Success => "success",
            CompensationResult::Failed => "failed",
        }
    }
}
