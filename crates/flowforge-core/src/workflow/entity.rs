use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::context::Context;
use super::ids::WorkflowId;
use super::status::{CompensationResult, StepStatus, WorkflowStatus};

/// Structured error recorded against a failed Step Execution or the
/// workflow's top-level `error` field (§3).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepError {
    pub message: String,
    pub code: Option<String>,
    pub stack: Option<String>,
}

impl StepError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
            stack: None,
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }
}

/// A running or completed workflow instance (§3 "Workflow Instance").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowInstance {
    pub id: WorkflowId,
    pub workflow_type: String,
    pub status: WorkflowStatus,
    /// Step name or `None`. Null iff status is terminal (invariant 3).
    pub current_step: Option<String>,
    pub context: Context,
    pub failed_step: Option<String>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Optimistic-concurrency version, bumped on every persisted write
    /// (resolves §9's shared-resource-race open question).
    pub version: u64,
}

impl WorkflowInstance {
    pub fn new(
        id: WorkflowId,
        workflow_type: impl Into<String>,
        first_step: String,
        context: Context,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            workflow_type: workflow_type.into(),
            status: WorkflowStatus::Running,
            current_step: Some(first_step),
            context,
            failed_step: None,
            error: None,
            created_at: now,
            updated_at: now,
            version: 0,
        }
    }
}

/// The runtime record of a specific step on a specific workflow instance
/// (§3 "Step Execution"), keyed by `(workflow_id, step_name)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepExecution {
    pub workflow_id: WorkflowId,
    pub step_name: String,
    pub status: StepStatus,
    /// Context snapshot at dispatch time.
    pub input: Context,
    pub output: Option<serde_json::Value>,
    pub error: Option<StepError>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub attempt: u32,
    pub version: u64,
}

impl StepExecution {
    pub fn new(
        workflow_id: WorkflowId,
        step_name: impl Into<String>,
        input: Context,
        attempt: u32,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            workflow_id,
            step_name: step_name.into(),
            status: StepStatus::Running,
            input,
            output: None,
            error: None,
            started_at: now,
            completed_at: None,
            attempt: attempt.max(1),
            version: 0,
        }
    }
}

/// Runtime record that a compensable step has completed and is awaiting (or
/// has completed) rollback (§3 "Compensation Record"), keyed by
/// `(workflow_id, step_name)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompensationRecord {
    pub workflow_id: WorkflowId,
    pub step_name: String,
    pub compensation_name: String,
    pub registered_at: DateTime<Utc>,
    /// Position of `step_name` in the workflow definition; used as a
    /// deterministic tie-break when `registered_at` collides (§4.2).
    pub step_index: usize,
    pub executed: bool,
    pub executed_at: Option<DateTime<Utc>>,
    pub result: Option<CompensationResult>,
    pub error: Option<String>,
    pub version: u64,
}

impl CompensationRecord {
    pub fn new(
        workflow_id: WorkflowId,
        step_name: impl Into<String>,
        compensation_name: impl Into<String>,
        step_index: usize,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            workflow_id,
            step_name: step_name.into(),
            compensation_name: compensation_name.into(),
            registered_at: now,
            step_index,
            executed: false,
            executed_at: None,
            result: None,
            error: None,
            version: 0,
        }
    }
}
