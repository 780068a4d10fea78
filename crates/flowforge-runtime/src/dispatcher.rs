use std::collections::HashMap;
use std::sync::Arc;

use flowforge_core::workflow::{
    topics, CompensateDispatchPayload, CompensatePayload, CompensationCompletedPayload,
    CompensationHandler, Compensator, EventBus, ExecuteCompensationPayload, ExecuteStepPayload,
    OrchestrationContext, StepCompletedPayload, StepFailedPayload, StepHandler,
};
use flowforge_core::{Engine, Result, StateStore};

use crate::bus::EventSource;

/// Routes events drained from an [`EventSource`] to the right `Engine`/
/// `Compensator` method, and performs the handler invocation the event
/// implies, turning "exactly one terminal event per step" into a
/// type-level guarantee instead of something each handler has to remember.
pub struct Dispatcher<S: StateStore, B: EventBus, Src: EventSource> {
    engine: Engine<S, B>,
    compensator: Compensator<S, B>,
    source: Src,
    step_handlers: HashMap<String, Arc<dyn StepHandler>>,
    compensation_handlers: HashMap<String, Arc<dyn CompensationHandler>>,
}

impl<S: StateStore, B: EventBus, Src: EventSource> Dispatcher<S, B, Src> {
    pub fn new(ctx: OrchestrationContext<S, B>, source: Src) -> Self {
        Self {
            engine: Engine::new(ctx.clone()),
            compensator: Compensator::new(ctx),
            source,
            step_handlers: HashMap::new(),
            compensation_handlers: HashMap::new(),
        }
    }

    /// Registers the handler invoked when `stepName` is dispatched on its
    /// step definition's topic.
    pub fn register_step_handler(&mut self, step_name: impl Into<String>, handler: Arc<dyn StepHandler>) {
        self.step_handlers.insert(step_name.into(), handler);
    }

    /// Registers the handler invoked on `compensate.<compensationName>`.
    pub fn register_compensation_handler(
        &mut self,
        compensation_name: impl Into<String>,
        handler: Arc<dyn CompensationHandler>,
    ) {
        self.compensation_handlers.insert(compensation_name.into(), handler);
    }

    /// Runs until the source is closed or `shutdown` fires.
    pub async fn run(&self, mut shutdown: tokio::sync::watch::Receiver<bool>) -> Result<()> {
        loop {
            tokio::select! {
                event = self.source.next_event() => {
                    match event? {
                        Some((topic, payload)) => self.dispatch_one(&topic, payload).await?,
                        None => return Ok(()),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Drains every event already queued without waiting for new ones.
    /// Deterministic test harnesses run this to quiescence instead of
    /// racing a background task.
    pub async fn drain(&self) -> Result<usize> {
        let mut processed = 0;
        while let Some((topic, payload)) = self.source.try_next_event().await? {
            self.dispatch_one(&topic, payload).await?;
            processed += 1;
        }
        Ok(processed)
    }

    async fn dispatch_one(&self, topic: &str, payload: serde_json::Value) -> Result<()> {
        match topic {
            topics::EXECUTE_STEP => {
                let payload: ExecuteStepPayload = serde_json::from_value(payload)?;
                self.engine.execute_step(&payload.workflow_id, &payload.step_name).await
            }
            topics::COMPENSATE => {
                let payload: CompensatePayload = serde_json::from_value(payload)?;
                self.compensator.start_compensation(&payload.workflow_id).await
            }
            topics::EXECUTE_COMPENSATION => {
                let payload: ExecuteCompensationPayload = serde_json::from_value(payload)?;
                self.compensator
                    .execute_compensation(&payload.workflow_id, &payload.step_name, &payload.compensation_name)
                    .await
            }
            topics::STEP_COMPLETED => {
                let payload: StepCompletedPayload = serde_json::from_value(payload)?;
                self.engine
                    .handle_step_completed(&payload.workflow_id, &payload.step_name, payload.output)
                    .await
            }
            topics::STEP_FAILED => {
                let payload: StepFailedPayload = serde_json::from_value(payload)?;
                self.engine
                    .handle_step_failed(&payload.workflow_id, &payload.step_name, payload.error)
                    .await
            }
            topics::COMPENSATION_COMPLETED => {
                let payload: CompensationCompletedPayload = serde_json::from_value(payload)?;
                self.compensator
                    .handle_compensation_completed(
                        &payload.workflow_id,
                        &payload.step_name,
                        payload.success,
                        payload.error,
                    )
                    .await
            }
            topics::WORKFLOW_COMPLETED | topics::WORKFLOW_FAILED | topics::COMPENSATION_FINISHED => {
                tracing::debug!(topic, "dispatcher: terminal topic, no further routing needed");
                Ok(())
            }
            other if other.starts_with("compensate.") => {
                self.dispatch_compensation(payload).await
            }
            _ => self.dispatch_step(payload).await,
        }
    }

    async fn dispatch_step(&self, payload: serde_json::Value) -> Result<()> {
        let payload: ExecuteStepPayload = serde_json::from_value(payload)?;
        let Some(handler) = self.step_handlers.get(&payload.step_name) else {
            tracing::error!(step_name = %payload.step_name, "dispatcher: no step handler registered");
            return Ok(());
        };

        match handler
            .handle(payload.workflow_id.as_str(), &payload.step_name, &payload.context)
            .await
        {
            Ok(output) => {
                self.engine
                    .handle_step_completed(&payload.workflow_id, &payload.step_name, output)
                    .await
            }
            Err(error) => {
                self.engine
                    .handle_step_failed(&payload.workflow_id, &payload.step_name, error)
                    .await
            }
        }
    }

    async fn dispatch_compensation(&self, payload: serde_json::Value) -> Result<()> {
        let payload: CompensateDispatchPayload = serde_json::from_value(payload)?;
        let Some(handler) = self.compensation_handlers.get(&payload.compensation_step) else {
            tracing::error!(
                compensation_name = %payload.compensation_step,
                "dispatcher: no compensation handler registered"
            );
            return Ok(());
        };

        let result = handler
            .compensate(
                payload.workflow_id.as_str(),
                &payload.original_step,
                &payload.context,
                payload.original_output.as_ref(),
            )
            .await;

        match result {
            Ok(()) => {
                self.compensator
                    .handle_compensation_completed(&payload.workflow_id, &payload.original_step, true, None)
                    .await
            }
            Err(error) => {
                self.compensator
                    .handle_compensation_completed(&payload.workflow_id, &payload.original_step, false, Some(error))
                    .await
            }
        }
    }
}
