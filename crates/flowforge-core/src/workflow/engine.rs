use std::sync::Arc;

use serde_json::Value;

use super::context::Context;
use super::entity::{StepError, WorkflowInstance};
use super::events::{
    self, topics, CompensatePayload, ExecuteStepPayload, StepCompletedPayload, StepFailedPayload,
    WorkflowCompletedPayload,
};
use super::events::EventBus;
use super::ids::WorkflowId;
use super::persistence::{Persistence, WorkflowStatusUpdate};
use super::registry::Registry;
use super::status::{StepStatus, WorkflowStatus};
use super::store::StateStore;
use crate::error::{FlowForgeError, Result};

/// Collaborators shared by the [`Engine`] and [`Compensator`](super::Compensator):
/// durable persistence, the read-only workflow catalog, and the event bus
/// used to advance both the forward and reverse paths. Neither holds any
/// other in-process state — every decision is derived from what's in
/// `persistence` plus the incoming event (§4.3 "pure function of persisted
/// state").
pub struct OrchestrationContext<S: StateStore, B: EventBus> {
    pub persistence: Arc<Persistence<S>>,
    pub registry: Arc<Registry>,
    pub bus: Arc<B>,
}

impl<S: StateStore, B: EventBus> Clone for OrchestrationContext<S, B> {
    fn clone(&self) -> Self {
        Self {
            persistence: self.persistence.clone(),
            registry: self.registry.clone(),
            bus: self.bus.clone(),
        }
    }
}

impl<S: StateStore, B: EventBus> OrchestrationContext<S, B> {
    pub fn new(persistence: Arc<Persistence<S>>, registry: Arc<Registry>, bus: Arc<B>) -> Self {
        Self {
            persistence,
            registry,
            bus,
        }
    }
}

/// Request to start a new workflow (`startWorkflow`, §4.3).
pub struct StartWorkflow {
    pub workflow_type: String,
    pub input: Value,
    pub workflow_id: Option<WorkflowId>,
}

/// Orchestrates forward progress: start, execute-step dispatch,
/// step-completed/failed handling, wait/resume (C3). A pure function of
/// persisted state plus the incoming event — it never holds in-process
/// state between events.
pub struct Engine<S: StateStore, B: EventBus> {
    ctx: OrchestrationContext<S, B>,
}

impl<S: StateStore, B: EventBus> Engine<S, B> {
    pub fn new(ctx: OrchestrationContext<S, B>) -> Self {
        Self { ctx }
    }

    /// Validates the type is registered and has at least one step. Uses the
    /// provided id or generates a fresh one. If an instance already exists
    /// at that id, returns the existing one without re-emitting
    /// `execute-step` (idempotent start).
    pub async fn start_workflow(&self, req: StartWorkflow) -> Result<WorkflowInstance> {
        let def = self
            .ctx
            .registry
            .get(&req.workflow_type)
            .ok_or_else(|| FlowForgeError::UnknownType(req.workflow_type.clone()))?;
        let first_step = def
            .first_step()
            .ok_or_else(|| FlowForgeError::EmptyWorkflow(req.workflow_type.clone()))?
            .name
            .clone();

        let id = req.workflow_id.unwrap_or_else(WorkflowId::generate);
        let context = Context::from_value(req.input)?;

        let already_existed = self.ctx.persistence.get_workflow(&id).await?.is_some();
        let instance = self
            .ctx
            .persistence
            .create_workflow(id.clone(), &req.workflow_type, &first_step, context)
            .await?;

        if !already_existed {
            events::emit(
                self.ctx.bus.as_ref(),
                topics::EXECUTE_STEP,
                &ExecuteStepPayload {
                    workflow_id: id,
                    step_name: first_step,
                    context: instance.context.as_value(),
                },
            )
            .await?;
        }

        Ok(instance)
    }

    /// Dispatches the named step. Tolerates missing instance/step
    /// definitions by logging and returning rather than propagating an
    /// error, per §7's persistence-miss policy.
    pub async fn execute_step(&self, workflow_id: &WorkflowId, step_name: &str) -> Result<()> {
        let Some(instance) = self.ctx.persistence.get_workflow(workflow_id).await? else {
            tracing::error!(workflow_id = %workflow_id, "executeStep: unknown workflow instance");
            return Ok(());
        };
        let Some(step_def) = self
            .ctx
            .registry
            .get_step(&instance.workflow_type, step_name)
            .cloned()
        else {
            tracing::error!(workflow_id = %workflow_id, step_name, "executeStep: unknown step definition");
            return Ok(());
        };

        let (execution, is_new) = self
            .ctx
            .persistence
            .record_step_start(workflow_id, step_name, instance.context.clone(), None)
            .await?;

        if !is_new {
            match execution.status {
                StepStatus::Completed => {
                    events::emit(
                        self.ctx.bus.as_ref(),
                        topics::STEP_COMPLETED,
                        &StepCompletedPayload {
                            workflow_id: workflow_id.clone(),
                            step_name: step_name.to_string(),
                            output: execution.output.unwrap_or(Value::Null),
                        },
                    )
                    .await?;
                    return Ok(());
                }
                StepStatus::Failed => {
                    events::emit(
                        self.ctx.bus.as_ref(),
                        topics::STEP_FAILED,
                        &StepFailedPayload {
                            workflow_id: workflow_id.clone(),
                            step_name: step_name.to_string(),
                            error: execution.error.unwrap_or_else(|| {
                                StepError::new("step failed with no recorded error")
                            }),
                        },
                    )
                    .await?;
                    return Ok(());
                }
                // `running`: an open policy question (§9) — we proceed to
                // re-emit on the step's topic, tolerating possible
                // duplicate invocation of the side-effecting handler.
                _ => {}
            }
        }

        events::emit(
            self.ctx.bus.as_ref(),
            &step_def.topic,
            &ExecuteStepPayload {
                workflow_id: workflow_id.clone(),
                step_name: step_name.to_string(),
                context: instance.context.as_value(),
            },
        )
        .await?;

        Ok(())
    }

    /// Records completion, registers a compensation if the step is
    /// compensable, merges `output` into context, then either completes the
    /// workflow (last step) or advances to the next one.
    pub async fn handle_step_completed(
        &self,
        workflow_id: &WorkflowId,
        step_name: &str,
        output: Value,
    ) -> Result<()> {
        let Some(instance) = self.ctx.persistence.get_workflow(workflow_id).await? else {
            tracing::error!(workflow_id = %workflow_id, "handleStepCompleted: unknown workflow instance");
            return Ok(());
        };
        let Some(def) = self.ctx.registry.get(&instance.workflow_type) else {
            tracing::error!(workflow_id = %workflow_id, "handleStepCompleted: unknown workflow type");
            return Ok(());
        };
        let Some(step_index) = def.step_index(step_name) else {
            tracing::error!(workflow_id = %workflow_id, step_name, "handleStepCompleted: unknown step");
            return Ok(());
        };
        let step_def = def.steps[step_index].clone();

        self.ctx
            .persistence
            .record_step_complete(workflow_id, step_name, output.clone())
            .await?;

        if let Some(compensation_name) = &step_def.compensation_name {
            self.ctx
                .persistence
                .register_compensation(workflow_id, step_name, compensation_name, step_index)
                .await?;
        }

        let delta = Context::from_value(output)?;
        self.ctx
            .persistence
            .update_workflow_context(workflow_id, &delta)
            .await?;

        if def.is_last_step(step_name) {
            self.ctx
                .persistence
                .update_workflow_status(
                    workflow_id,
                    WorkflowStatus::Completed,
                    WorkflowStatusUpdate::default(),
                )
                .await?;
            events::emit(
                self.ctx.bus.as_ref(),
                topics::WORKFLOW_COMPLETED,
                &WorkflowCompletedPayload {
                    workflow_id: workflow_id.clone(),
                },
            )
            .await?;
            return Ok(());
        }

        let next = def.next_step(step_name).cloned().ok_or_else(|| {
            FlowForgeError::UnknownStep {
                workflow_type: instance.workflow_type.clone(),
                step: step_name.to_string(),
            }
        })?;

        self.ctx
            .persistence
            .advance_to_step(workflow_id, &next.name, None)
            .await?;

        events::emit(
            self.ctx.bus.as_ref(),
            topics::EXECUTE_STEP,
            &ExecuteStepPayload {
                workflow_id: workflow_id.clone(),
                step_name: next.name,
                context: self
                    .ctx
                    .persistence
                    .get_workflow(workflow_id)
                    .await?
                    .map(|i| i.context.as_value())
                    .unwrap_or(Value::Null),
            },
        )
        .await?;

        Ok(())
    }

    /// Records the failure, transitions the workflow to `failed`, and
    /// emits `compensate` to start the rollback chain.
    pub async fn handle_step_failed(
        &self,
        workflow_id: &WorkflowId,
        step_name: &str,
        error: StepError,
    ) -> Result<()> {
        if self.ctx.persistence.get_workflow(workflow_id).await?.is_none() {
            tracing::error!(workflow_id = %workflow_id, "handleStepFailed: unknown workflow instance");
            return Ok(());
        }

        self.ctx
            .persistence
            .record_step_failure(workflow_id, step_name, error.clone())
            .await?;

        self.ctx
            .persistence
            .update_workflow_status(
                workflow_id,
                WorkflowStatus::Failed,
                WorkflowStatusUpdate {
                    failed_step: Some(step_name.to_string()),
                    error: Some(error.message.clone()),
                    ..Default::default()
                },
            )
            .await?;

        events::emit(
            self.ctx.bus.as_ref(),
            topics::COMPENSATE,
            &CompensatePayload {
                workflow_id: workflow_id.clone(),
            },
        )
        .await?;

        Ok(())
    }

    /// `running -> waiting`. No-op with a warning from any other status.
    pub async fn pause_workflow(&self, workflow_id: &WorkflowId) -> Result<()> {
        let result = self
            .ctx
            .persistence
            .update_workflow_status(workflow_id, WorkflowStatus::Waiting, WorkflowStatusUpdate::default())
            .await?;
        if result.is_none() {
            tracing::error!(workflow_id = %workflow_id, "pauseWorkflow: unknown workflow instance");
        }
        Ok(())
    }

    /// Allowed only from `waiting`; merges `signal`/`payload` into context
    /// and re-emits `execute-step` for `current_step`. No-op with a warning
    /// from any other status.
    pub async fn resume_workflow(
        &self,
        workflow_id: &WorkflowId,
        signal: &str,
        payload: Option<Value>,
    ) -> Result<()> {
        let Some(instance) = self.ctx.persistence.get_workflow(workflow_id).await? else {
            tracing::error!(workflow_id = %workflow_id, "resumeWorkflow: unknown workflow instance");
            return Ok(());
        };
        if instance.status != WorkflowStatus::Waiting {
            tracing::warn!(
                workflow_id = %workflow_id,
                status = %instance.status,
                "resumeWorkflow: ignored, workflow is not waiting"
            );
            return Ok(());
        }

        let mut delta = Context::new();
        delta.insert("signal", Value::String(signal.to_string()));
        if let Some(payload) = payload {
            delta.insert("payload", payload);
        }

        let updated = self
            .ctx
            .persistence
            .update_workflow_status(
                workflow_id,
                WorkflowStatus::Running,
                WorkflowStatusUpdate {
                    context_delta: Some(delta),
                    ..Default::default()
                },
            )
            .await?;

        let Some(current_step) = updated.and_then(|i| i.current_step) else {
            tracing::error!(workflow_id = %workflow_id, "resumeWorkflow: no current_step to resume");
            return Ok(());
        };

        events::emit(
            self.ctx.bus.as_ref(),
            topics::EXECUTE_STEP,
            &ExecuteStepPayload {
                workflow_id: workflow_id.clone(),
                step_name: current_step,
                context: self
                    .ctx
                    .persistence
                    .get_workflow(workflow_id)
                    .await?
                    .map(|i| i.context.as_value())
                    .unwrap_or(Value::Null),
            },
        )
        .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::definition::{StepDefinition, WorkflowDefinition};
    use crate::workflow::test_support::{MemStore, RecordingBus};

    fn order_registry() -> Registry {
        let mut registry = Registry::new();
        registry
            .register(WorkflowDefinition::new(
                "order",
                vec![
                    StepDefinition::new("ValidateOrder", "order.validate"),
                    StepDefinition::new("ChargePayment", "order.charge")
                        .with_compensation("RefundPayment"),
                    StepDefinition::new("NotifyUser", "order.notify"),
                ],
            ))
            .unwrap();
        registry
    }

    fn engine() -> (Engine<MemStore, RecordingBus>, Arc<RecordingBus>) {
        let persistence = Arc::new(Persistence::new(MemStore::new()));
        let registry = Arc::new(order_registry());
        let bus = Arc::new(RecordingBus::new());
        let ctx = OrchestrationContext::new(persistence, registry, bus.clone());
        (Engine::new(ctx), bus)
    }

    #[tokio::test]
    async fn start_workflow_emits_execute_step_for_first_step() {
        let (engine, bus) = engine();
        let instance = engine
            .start_workflow(StartWorkflow {
                workflow_type: "order".to_string(),
                input: serde_json::json!({}),
                workflow_id: Some(WorkflowId::from_string("wf-1")),
            })
            .await
            .unwrap();
        assert_eq!(instance.current_step, Some("ValidateOrder".to_string()));
        assert_eq!(bus.count(topics::EXECUTE_STEP), 1);
    }

    #[tokio::test]
    async fn start_workflow_is_idempotent_and_does_not_reemit() {
        let (engine, bus) = engine();
        let req = || StartWorkflow {
            workflow_type: "order".to_string(),
            input: serde_json::json!({}),
            workflow_id: Some(WorkflowId::from_string("wf-1")),
        };
        engine.start_workflow(req()).await.unwrap();
        engine.start_workflow(req()).await.unwrap();
        assert_eq!(bus.count(topics::EXECUTE_STEP), 1);
    }

    #[tokio::test]
    async fn start_workflow_rejects_unknown_type() {
        let (engine, _bus) = engine();
        let result = engine
            .start_workflow(StartWorkflow {
                workflow_type: "does-not-exist".to_string(),
                input: serde_json::json!({}),
                workflow_id: None,
            })
            .await;
        assert!(matches!(result, Err(FlowForgeError::UnknownType(_))));
    }

    #[tokio::test]
    async fn execute_step_replays_completed_without_rerunning() {
        let (engine, bus) = engine();
        let id = WorkflowId::from_string("wf-1");
        engine
            .start_workflow(StartWorkflow {
                workflow_type: "order".to_string(),
                input: serde_json::json!({}),
                workflow_id: Some(id.clone()),
            })
            .await
            .unwrap();
        engine
            .handle_step_completed(&id, "ValidateOrder", serde_json::json!({}))
            .await
            .unwrap();

        // Replaying execute-step for an already-completed step must
        // re-emit step-completed, not re-dispatch to the forward topic.
        engine.execute_step(&id, "ValidateOrder").await.unwrap();
        assert_eq!(bus.count(topics::STEP_COMPLETED), 1);
        assert_eq!(bus.count("order.validate"), 0);
    }

    #[tokio::test]
    async fn handle_step_completed_advances_to_next_step() {
        let (engine, bus) = engine();
        let id = WorkflowId::from_string("wf-1");
        engine
            .start_workflow(StartWorkflow {
                workflow_type: "order".to_string(),
                input: serde_json::json!({}),
                workflow_id: Some(id.clone()),
            })
            .await
            .unwrap();
        engine
            .handle_step_completed(&id, "ValidateOrder", serde_json::json!({"validated": true}))
            .await
            .unwrap();

        let instance = engine.ctx.persistence.get_workflow(&id).await.unwrap().unwrap();
        assert_eq!(instance.current_step, Some("ChargePayment".to_string()));
        assert_eq!(instance.status, WorkflowStatus::Running);
        assert_eq!(bus.count(topics::EXECUTE_STEP), 2);
    }

    #[tokio::test]
    async fn handle_step_completed_registers_compensation_when_compensable() {
        let (engine, _bus) = engine();
        let id = WorkflowId::from_string("wf-1");
        engine
            .start_workflow(StartWorkflow {
                workflow_type: "order".to_string(),
                input: serde_json::json!({}),
                workflow_id: Some(id.clone()),
            })
            .await
            .unwrap();
        engine
            .handle_step_completed(&id, "ValidateOrder", serde_json::json!({}))
            .await
            .unwrap();
        engine
            .handle_step_completed(&id, "ChargePayment", serde_json::json!({}))
            .await
            .unwrap();

        let compensation = engine
            .ctx
            .persistence
            .get_compensation(&id, "ChargePayment")
            .await
            .unwrap();
        assert!(compensation.is_some());
    }

    #[tokio::test]
    async fn handle_step_completed_on_last_step_completes_workflow() {
        let (engine, bus) = engine();
        let id = WorkflowId::from_string("wf-1");
        engine
            .start_workflow(StartWorkflow {
                workflow_type: "order".to_string(),
                input: serde_json::json!({}),
                workflow_id: Some(id.clone()),
            })
            .await
            .unwrap();
        engine
            .handle_step_completed(&id, "ValidateOrder", serde_json::json!({}))
            .await
            .unwrap();
        engine
            .handle_step_completed(&id, "ChargePayment", serde_json::json!({}))
            .await
            .unwrap();
        engine
            .handle_step_completed(&id, "NotifyUser", serde_json::json!({}))
            .await
            .unwrap();

        let instance = engine.ctx.persistence.get_workflow(&id).await.unwrap().unwrap();
        assert_eq!(instance.status, WorkflowStatus::Completed);
        assert_eq!(instance.current_step, None);
        assert_eq!(bus.count(topics::WORKFLOW_COMPLETED), 1);
    }

    #[tokio::test]
    async fn handle_step_failed_transitions_workflow_and_emits_compensate() {
        let (engine, bus) = engine();
        let id = WorkflowId::from_string("wf-1");
        engine
            .start_workflow(StartWorkflow {
                workflow_type: "order".to_string(),
                input: serde_json::json!({}),
                workflow_id: Some(id.clone()),
            })
            .await
            .unwrap();
        engine
            .handle_step_failed(&id, "ValidateOrder", StepError::new("boom"))
            .await
            .unwrap();

        let instance = engine.ctx.persistence.get_workflow(&id).await.unwrap().unwrap();
        assert_eq!(instance.status, WorkflowStatus::Failed);
        assert_eq!(instance.failed_step, Some("ValidateOrder".to_string()));
        assert_eq!(bus.count(topics::COMPENSATE), 1);
    }

    #[tokio::test]
    async fn pause_then_resume_reemits_execute_step_for_current_step() {
        let (engine, bus) = engine();
        let id = WorkflowId::from_string("wf-1");
        engine
            .start_workflow(StartWorkflow {
                workflow_type: "order".to_string(),
                input: serde_json::json!({}),
                workflow_id: Some(id.clone()),
            })
            .await
            .unwrap();
        engine.pause_workflow(&id).await.unwrap();
        let paused = engine.ctx.persistence.get_workflow(&id).await.unwrap().unwrap();
        assert_eq!(paused.status, WorkflowStatus::Waiting);

        engine
            .resume_workflow(&id, "continue", Some(serde_json::json!({"x": 1})))
            .await
            .unwrap();
        let resumed = engine.ctx.persistence.get_workflow(&id).await.unwrap().unwrap();
        assert_eq!(resumed.status, WorkflowStatus::Running);
        assert_eq!(resumed.context.get("signal"), Some(&serde_json::json!("continue")));
        assert_eq!(bus.count(topics::EXECUTE_STEP), 2);
    }

    #[tokio::test]
    async fn resume_workflow_is_noop_when_not_waiting() {
        let (engine, bus) = engine();
        let id = WorkflowId::from_string("wf-1");
        engine
            .start_workflow(StartWorkflow {
                workflow_type: "order".to_string(),
                input: serde_json::json!({}),
                workflow_id: Some(id.clone()),
            })
            .await
            .unwrap();
        // Running, not waiting: resume should be ignored.
        engine.resume_workflow(&id, "signal", None).await.unwrap();
        assert_eq!(bus.count(topics::EXECUTE_STEP), 1);
    }
}
