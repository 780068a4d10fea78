mod order_workflow;

pub use order_workflow::{
    order_workflow_definition, register_order_handlers, CancelShipmentHandler,
    ChargePaymentHandler, CompleteHandler, CreateShipmentHandler, NotifyUserHandler,
    RefundPaymentHandler, ReleaseInventoryHandler, ReserveInventoryHandler, ValidateOrderHandler,
};
