use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use super::entity::StepError;
use super::ids::WorkflowId;

/// Named topics reserved by the Event Dispatch Contract (C5, §4.5). Must be
/// honored exactly.
pub mod topics {
    pub const EXECUTE_STEP: &str = "flowforge.execute-step";
    pub const STEP_COMPLETED: &str = "flowforge.step-completed";
    pub const STEP_FAILED: &str = "flowforge.step-failed";
    pub const COMPENSATE: &str = "flowforge.compensate";
    pub const WORKFLOW_COMPLETED: &str = "flowforge.workflow-completed";
    pub const WORKFLOW_FAILED: &str = "flowforge.workflow-failed";

    pub const EXECUTE_COMPENSATION: &str = "flowforge.execute-compensation";
    pub const COMPENSATION_COMPLETED: &str = "flowforge.compensation-completed";
    pub const COMPENSATION_FINISHED: &str = "flowforge.compensation-finished";

    /// The dynamic compensation dispatch topic for a given compensation
    /// handler key.
    pub fn compensation_topic(compensation_name: &str) -> String {
        format!("compensate.{compensation_name}")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteStepPayload {
    pub workflow_id: WorkflowId,
    pub step_name: String,
    pub context: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepCompletedPayload {
    pub workflow_id: WorkflowId,
    pub step_name: String,
    pub output: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepFailedPayload {
    pub workflow_id: WorkflowId,
    pub step_name: String,
    pub error: StepError,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompensatePayload {
    pub workflow_id: WorkflowId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowCompletedPayload {
    pub workflow_id: WorkflowId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowFailedPayload {
    pub workflow_id: WorkflowId,
    pub failed_step: String,
    pub error: String,
}

/// Payload for the `flowforge.execute-compensation` control topic: tells
/// the compensator which compensation record to dispatch next.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteCompensationPayload {
    pub workflow_id: WorkflowId,
    pub step_name: String,
    pub compensation_name: String,
}

/// Payload for the dynamic `compensate.<compensationName>` dispatch topic,
/// carrying everything a compensation handler needs to run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompensateDispatchPayload {
    pub workflow_id: WorkflowId,
    pub original_step: String,
    pub compensation_step: String,
    pub context: Value,
    pub original_output: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompensationCompletedPayload {
    pub workflow_id: WorkflowId,
    pub step_name: String,
    pub success: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompensationFinishedPayload {
    pub workflow_id: WorkflowId,
}

/// Error surface for an [`EventBus`] implementation.
#[derive(Error, Debug)]
pub enum BusError {
    #[error("backend error: {0}")]
    Backend(String),

    #[error("failed to serialize event payload: {0}")]
    Serialization(String),
}

/// Provider-agnostic event bus contract (§6). `emit` publishes a JSON-shaped
/// payload on a topic; delivery to subscribers is at-least-once and is the
/// event-bus runtime's responsibility, not this crate's (§1 out of scope).
#[async_trait]
pub trait EventBus: Send + Sync {
    async fn emit(&self, topic: &str, payload: Value) -> Result<(), BusError>;
}

/// Serialize a typed payload and emit it in one call.
pub async fn emit<B, T>(bus: &B, topic: &str, payload: &T) -> Result<(), BusError>
where
    B: EventBus + ?Sized,
    T: Serialize,
{
    let value = serde_json::to_value(payload)
        .map_err(|e| BusError::Serialization(e.to_string()))?;
    bus.emit(topic, value).await
}
