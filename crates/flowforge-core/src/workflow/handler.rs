use async_trait::async_trait;
use serde_json::Value;

use super::entity::StepError;

/// Obligation a forward step implementation must meet (C6, §4.6): for each
/// invocation, produce exactly one terminal outcome for its
/// `(workflow_id, step_name)`. A named trait rather than a closure type: the
/// dispatcher (in `flowforge-runtime`) performs the
/// `step-completed`/`step-failed` emit itself from the returned `Result`,
/// turning "exactly one terminal event" into a type-level guarantee rather
/// than a runtime convention.
#[async_trait]
pub trait StepHandler: Send + Sync {
    async fn handle(
        &self,
        workflow_id: &str,
        step_name: &str,
        context: &Value,
    ) -> Result<Value, StepError>;
}

/// Obligation a compensation implementation must meet (C6, §4.6): produce
/// exactly one `compensation-completed` outcome (`Ok` or reported failure)
/// for its `(workflow_id, step_name)`.
#[async_trait]
pub trait CompensationHandler: Send + Sync {
    async fn compensate(
        &self,
        workflow_id: &str,
        original_step: &str,
        context: &Value,
        original_output: Option<&Value>,
    ) -> Result<(), String>;
}
