use async_trait::async_trait;
use serde_json::Value;

use flowforge_core::workflow::{CompensationHandler, EventBus, StepDefinition, StepHandler};
use flowforge_core::{StateStore, StepError, WorkflowDefinition};

use crate::bus::EventSource;
use crate::dispatcher::Dispatcher;

/// The reference order workflow used by the end-to-end scenarios: six
/// steps, three of them compensable.
pub fn order_workflow_definition() -> WorkflowDefinition {
    WorkflowDefinition::new(
        "order",
        vec![
            StepDefinition::new("ValidateOrder", "order.validate"),
            StepDefinition::new("ChargePayment", "order.charge").with_compensation("RefundPayment"),
            StepDefinition::new("ReserveInventory", "order.reserve")
                .with_compensation("ReleaseInventory"),
            StepDefinition::new("CreateShipment", "order.ship").with_compensation("CancelShipment"),
            StepDefinition::new("NotifyUser", "order.notify"),
            StepDefinition::new("Complete", "order.complete"),
        ],
    )
}

fn number_field(context: &Value, field: &str) -> f64 {
    context.get(field).and_then(|v| v.as_f64()).unwrap_or(0.0)
}

pub struct ValidateOrderHandler;

#[async_trait]
impl StepHandler for ValidateOrderHandler {
    async fn handle(&self, _workflow_id: &str, _step_name: &str, _context: &Value) -> Result<Value, StepError> {
        Ok(serde_json::json!({ "validated": true }))
    }
}

/// Fails when `amount >= 500` (§8 scenario thresholds).
pub struct ChargePaymentHandler;

#[async_trait]
impl StepHandler for ChargePaymentHandler {
    async fn handle(&self, _workflow_id: &str, _step_name: &str, context: &Value) -> Result<Value, StepError> {
        let amount = number_field(context, "amount");
        if amount >= 500.0 {
            return Err(StepError::new("payment declined: amount too high"));
        }
        Ok(serde_json::json!({ "charged": amount }))
    }
}

/// Always succeeds unless constructed with `should_fail`, used by the §8
/// "compensation failure tolerance" scenario.
pub struct RefundPaymentHandler {
    should_fail: bool,
}

impl RefundPaymentHandler {
    pub fn new() -> Self {
        Self { should_fail: false }
    }

    pub fn failing() -> Self {
        Self { should_fail: true }
    }
}

impl Default for RefundPaymentHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CompensationHandler for RefundPaymentHandler {
    async fn compensate(
        &self,
        _workflow_id: &str,
        _original_step: &str,
        _context: &Value,
        _original_output: Option<&Value>,
    ) -> Result<(), String> {
        if self.should_fail {
            Err("card network timeout".to_string())
        } else {
            Ok(())
        }
    }
}

/// Fails when total `quantity >= 10`.
pub struct ReserveInventoryHandler;

#[async_trait]
impl StepHandler for ReserveInventoryHandler {
    async fn handle(&self, _workflow_id: &str, _step_name: &str, context: &Value) -> Result<Value, StepError> {
        let quantity = number_field(context, "quantity");
        if quantity >= 10.0 {
            return Err(StepError::new("insufficient inventory"));
        }
        Ok(serde_json::json!({ "reserved": quantity }))
    }
}

pub struct ReleaseInventoryHandler;

#[async_trait]
impl CompensationHandler for ReleaseInventoryHandler {
    async fn compensate(
        &self,
        _workflow_id: &str,
        _original_step: &str,
        _context: &Value,
        _original_output: Option<&Value>,
    ) -> Result<(), String> {
        Ok(())
    }
}

/// Fails when `weight >= 50`.
pub struct CreateShipmentHandler;

#[async_trait]
impl StepHandler for CreateShipmentHandler {
    async fn handle(&self, _workflow_id: &str, _step_name: &str, context: &Value) -> Result<Value, StepError> {
        let weight = number_field(context, "weight");
        if weight >= 50.0 {
            return Err(StepError::new("carrier rejected: weight exceeds limit"));
        }
        Ok(serde_json::json!({ "shipment_id": "ship-fake" }))
    }
}

pub struct CancelShipmentHandler;

#[async_trait]
impl CompensationHandler for CancelShipmentHandler {
    async fn compensate(
        &self,
        _workflow_id: &str,
        _original_step: &str,
        _context: &Value,
        _original_output: Option<&Value>,
    ) -> Result<(), String> {
        Ok(())
    }
}

pub struct NotifyUserHandler;

#[async_trait]
impl StepHandler for NotifyUserHandler {
    async fn handle(&self, _workflow_id: &str, _step_name: &str, _context: &Value) -> Result<Value, StepError> {
        Ok(serde_json::json!({ "notified": true }))
    }
}

pub struct CompleteHandler;

#[async_trait]
impl StepHandler for CompleteHandler {
    async fn handle(&self, _workflow_id: &str, _step_name: &str, _context: &Value) -> Result<Value, StepError> {
        Ok(serde_json::json!({ "completed": true }))
    }
}

/// Registers every reference handler on `dispatcher`, with `RefundPayment`
/// swappable so the compensation-failure-tolerance scenario can force it to
/// report failure.
pub fn register_order_handlers<S, B, Src>(
    dispatcher: &mut Dispatcher<S, B, Src>,
    refund_payment: RefundPaymentHandler,
) where
    S: StateStore,
    B: EventBus,
    Src: EventSource,
{
    dispatcher.register_step_handler("ValidateOrder", std::sync::Arc::new(ValidateOrderHandler));
    dispatcher.register_step_handler("ChargePayment", std::sync::Arc::new(ChargePaymentHandler));
    dispatcher.register_step_handler("ReserveInventory", std::sync::Arc::new(ReserveInventoryHandler));
    dispatcher.register_step_handler("CreateShipment", std::sync::Arc::new(CreateShipmentHandler));
    dispatcher.register_step_handler("NotifyUser", std::sync::Arc::new(NotifyUserHandler));
    dispatcher.register_step_handler("Complete", std::sync::Arc::new(CompleteHandler));

    dispatcher.register_compensation_handler("RefundPayment", std::sync::Arc::new(refund_payment));
    dispatcher.register_compensation_handler("ReleaseInventory", std::sync::Arc::new(ReleaseInventoryHandler));
    dispatcher.register_compensation_handler("CancelShipment", std::sync::Arc::new(CancelShipmentHandler));
}
