use super::engine::OrchestrationContext;
use super::events::{
    self, topics, CompensateDispatchPayload, CompensationFinishedPayload,
    ExecuteCompensationPayload,
};
use super::events::EventBus;
use super::ids::WorkflowId;
use super::persistence::WorkflowStatusUpdate;
use super::status::{CompensationResult, WorkflowStatus};
use super::store::StateStore;
use crate::error::Result;

/// Drives the reverse path by chaining one compensation at a time through
/// the event bus rather than iterating in-process, so each compensation is
/// durable and independently observable (C4).
pub struct Compensator<S: StateStore, B: EventBus> {
    ctx: OrchestrationContext<S, B>,
}

impl<S: StateStore, B: EventBus> Compensator<S, B> {
    pub fn new(ctx: OrchestrationContext<S, B>) -> Self {
        Self { ctx }
    }

    /// Transitions the instance to `compensating`; must already be
    /// `failed`, otherwise logs and returns. Dispatches the first
    /// (most-recently-registered) pending compensation, or finishes
    /// immediately if none are pending.
    pub async fn start_compensation(&self, workflow_id: &WorkflowId) -> Result<()> {
        let Some(instance) = self.ctx.persistence.get_workflow(workflow_id).await? else {
            tracing::error!(workflow_id = %workflow_id, "startCompensation: unknown workflow instance");
            return Ok(());
        };
        if instance.status != WorkflowStatus::Failed {
            tracing::warn!(
                workflow_id = %workflow_id,
                status = %instance.status,
                "startCompensation: ignored, workflow is not failed"
            );
            return Ok(());
        }

        self.ctx
            .persistence
            .update_workflow_status(
                workflow_id,
                WorkflowStatus::Compensating,
                WorkflowStatusUpdate::default(),
            )
            .await?;

        self.dispatch_next_or_finish(workflow_id).await
    }

    /// Emits `compensate.<compensationName>` with the original step's
    /// stored output, which many compensation handlers require.
    pub async fn execute_compensation(
        &self,
        workflow_id: &WorkflowId,
        step_name: &str,
        compensation_name: &str,
    ) -> Result<()> {
        let Some(instance) = self.ctx.persistence.get_workflow(workflow_id).await? else {
            tracing::error!(workflow_id = %workflow_id, "executeCompensation: unknown workflow instance");
            return Ok(());
        };
        let original_output = self
            .ctx
            .persistence
            .get_step(workflow_id, step_name)
            .await?
            .and_then(|s| s.output);

        events::emit(
            self.ctx.bus.as_ref(),
            &topics::compensation_topic(compensation_name),
            &CompensateDispatchPayload {
                workflow_id: workflow_id.clone(),
                original_step: step_name.to_string(),
                compensation_step: compensation_name.to_string(),
                context: instance.context.as_value(),
                original_output,
            },
        )
        .await?;

        Ok(())
    }

    /// Records the outcome (success doesn't stop the chain, failure
    /// doesn't either — §4.4 "Failure policy of the reverse path"), marks
    /// the step compensated, then re-reads pending compensations and
    /// dispatches the new head or finishes. No in-memory cursor: this
    /// function is loop-free and re-entrant, safe to call again after a
    /// crash (§9 "Iterator over pending compensations").
    pub async fn handle_compensation_completed(
        &self,
        workflow_id: &WorkflowId,
        step_name: &str,
        success: bool,
        error: Option<String>,
    ) -> Result<()> {
        let result = if success {
            CompensationResult::Success
        } else {
            CompensationResult::Failed
        };

        self.ctx
            .persistence
            .mark_compensation_executed(workflow_id, step_name, result, error)
            .await?;
        self.ctx
            .persistence
            .mark_step_compensated(workflow_id, step_name)
            .await?;

        self.dispatch_next_or_finish(workflow_id).await
    }

    /// Transitions the instance to `compensated` and emits
    /// `compensation-finished`.
    pub async fn finish_compensation(&self, workflow_id: &WorkflowId) -> Result<()> {
        self.ctx
            .persistence
            .update_workflow_status(
                workflow_id,
                WorkflowStatus::Compensated,
                WorkflowStatusUpdate::default(),
            )
            .await?;

        events::emit(
            self.ctx.bus.as_ref(),
            topics::COMPENSATION_FINISHED,
            &CompensationFinishedPayload {
                workflow_id: workflow_id.clone(),
            },
        )
        .await?;

        Ok(())
    }

    async fn dispatch_next_or_finish(&self, workflow_id: &WorkflowId) -> Result<()> {
        let pending = self
            .ctx
            .persistence
            .get_pending_compensations(workflow_id)
            .await?;

        match pending.first() {
            None => self.finish_compensation(workflow_id).await,
            Some(head) => {
                events::emit(
                    self.ctx.bus.as_ref(),
                    topics::EXECUTE_COMPENSATION,
                    &ExecuteCompensationPayload {
                        workflow_id: workflow_id.clone(),
                        step_name: head.step_name.clone(),
                        compensation_name: head.compensation_name.clone(),
                    },
                )
                .await?;
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::definition::{StepDefinition, WorkflowDefinition};
    use crate::workflow::engine::{Engine, StartWorkflow};
    use crate::workflow::entity::StepError;
    use crate::workflow::registry::Registry;
    use crate::workflow::test_support::{MemStore, RecordingBus};
    use std::sync::Arc;

    fn order_registry() -> Registry {
        let mut registry = Registry::new();
        registry
            .register(WorkflowDefinition::new(
                "order",
                vec![
                    StepDefinition::new("ValidateOrder", "order.validate"),
                    StepDefinition::new("ChargePayment", "order.charge")
                        .with_compensation("RefundPayment"),
                    StepDefinition::new("ReserveInventory", "order.reserve")
                        .with_compensation("ReleaseInventory"),
                    StepDefinition::new("NotifyUser", "order.notify"),
                ],
            ))
            .unwrap();
        registry
    }

    async fn failed_after_reserve_inventory(
    ) -> (Engine<MemStore, RecordingBus>, Compensator<MemStore, RecordingBus>, Arc<RecordingBus>, WorkflowId)
    {
        let persistence = Arc::new(crate::workflow::persistence::Persistence::new(MemStore::new()));
        let registry = Arc::new(order_registry());
        let bus = Arc::new(RecordingBus::new());
        let ctx = OrchestrationContext::new(persistence, registry, bus.clone());
        let engine = Engine::new(ctx.clone());
        let compensator = Compensator::new(ctx);

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
            .handle_step_failed(&id, "ReserveInventory", StepError::new("out of stock"))
            .await
            .unwrap();

        (engine, compensator, bus, id)
    }

    #[tokio::test]
    async fn start_compensation_dispatches_single_pending_compensation() {
        let (_engine, compensator, bus, id) = failed_after_reserve_inventory().await;
        compensator.start_compensation(&id).await.unwrap();

        let instance = compensator
            .ctx
            .persistence
            .get_workflow(&id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(instance.status, WorkflowStatus::Compensating);
        assert_eq!(bus.count(topics::EXECUTE_COMPENSATION), 1);
    }

    #[tokio::test]
    async fn compensation_chain_runs_strict_lifo() {
        let persistence = Arc::new(crate::workflow::persistence::Persistence::new(MemStore::new()));
        let registry = Arc::new(order_registry());
        let bus = Arc::new(RecordingBus::new());
        let ctx = OrchestrationContext::new(persistence, registry, bus.clone());
        let engine = Engine::new(ctx.clone());
        let compensator = Compensator::new(ctx);

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
            .handle_step_completed(&id, "ReserveInventory", serde_json::json!({}))
            .await
            .unwrap();
        engine
            .handle_step_failed(&id, "CreateShipment", StepError::new("carrier unavailable"))
            .await
            .unwrap();

        compensator.start_compensation(&id).await.unwrap();
        let first_pending = compensator
            .ctx
            .persistence
            .get_pending_compensations(&id)
            .await
            .unwrap();
        assert_eq!(first_pending[0].step_name, "ReserveInventory");

        compensator
            .handle_compensation_completed(&id, "ReserveInventory", true, None)
            .await
            .unwrap();
        let remaining = compensator
            .ctx
            .persistence
            .get_pending_compensations(&id)
            .await
            .unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].step_name, "ChargePayment");

        compensator
            .handle_compensation_completed(&id, "ChargePayment", true, None)
            .await
            .unwrap();
        let instance = compensator
            .ctx
            .persistence
            .get_workflow(&id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(instance.status, WorkflowStatus::Compensated);
        assert_eq!(bus.count(topics::COMPENSATION_FINISHED), 1);
    }

    #[tokio::test]
    async fn compensation_failure_does_not_stop_the_chain() {
        let persistence = Arc::new(crate::workflow::persistence::Persistence::new(MemStore::new()));
        let registry = Arc::new(order_registry());
        let bus = Arc::new(RecordingBus::new());
        let ctx = OrchestrationContext::new(persistence, registry, bus.clone());
        let engine = Engine::new(ctx.clone());
        let compensator = Compensator::new(ctx);

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
            .handle_step_completed(&id, "ReserveInventory", serde_json::json!({}))
            .await
            .unwrap();
        engine
            .handle_step_failed(&id, "CreateShipment", StepError::new("carrier unavailable"))
            .await
            .unwrap();

        compensator.start_compensation(&id).await.unwrap();
        compensator
            .handle_compensation_completed(&id, "ReserveInventory", true, None)
            .await
            .unwrap();
        // RefundPayment reports failure; the chain must still reach compensated.
        compensator
            .handle_compensation_completed(
                &id,
                "ChargePayment",
                false,
                Some("card network timeout".to_string()),
            )
            .await
            .unwrap();

        let instance = compensator
            .ctx
            .persistence
            .get_workflow(&id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(instance.status, WorkflowStatus::Compensated);

        let refund_record = compensator
            .ctx
            .persistence
            .get_compensation(&id, "ChargePayment")
            .await
            .unwrap()
            .unwrap();
        assert!(refund_record.executed);
        assert_eq!(refund_record.result, Some(CompensationResult::Failed));
    }

    #[tokio::test]
    async fn start_compensation_with_no_pending_finishes_immediately() {
        let persistence = Arc::new(crate::workflow::persistence::Persistence::new(MemStore::new()));
        let registry = Arc::new(order_registry());
        let bus = Arc::new(RecordingBus::new());
        let ctx = OrchestrationContext::new(persistence, registry, bus.clone());
        let engine = Engine::new(ctx.clone());
        let compensator = Compensator::new(ctx);

        let id = WorkflowId::from_string("wf-1");
        engine
            .start_workflow(StartWorkflow {
                workflow_type: "order".to_string(),
                input: serde_json::json!({}),
                workflow_id: Some(id.clone()),
            })
            .await
            .unwrap();
        // Payment fails before any compensation is registered.
        engine
            .handle_step_failed(&id, "ChargePayment", StepError::new("card declined"))
            .await
            .unwrap();

        compensator.start_compensation(&id).await.unwrap();
        let instance = compensator
            .ctx
            .persistence
            .get_workflow(&id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(instance.status, WorkflowStatus::Compensated);
        assert_eq!(bus.count(topics::EXECUTE_COMPENSATION), 0);
        assert_eq!(bus.count(topics::COMPENSATION_FINISHED), 1);
    }
}
