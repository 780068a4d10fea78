//! Domain types and the saga orchestration logic (C1-C6): registry,
//! persistence, engine, compensator, event dispatch contract, and the step
//! handler contract.

mod compensator;
mod context;
mod definition;
mod engine;
mod entity;
mod events;
mod handler;
mod ids;
mod persistence;
mod registry;
mod status;
mod store;

#[cfg(test)]
mod test_support;

pub use compensator::Compensator;
pub use context::Context;
pub use definition::{StepDefinition, WorkflowDefinition};
pub use engine::{Engine, OrchestrationContext, StartWorkflow};
pub use entity::{CompensationRecord, StepError, StepExecution, WorkflowInstance};
pub use events::{
    topics, BusError, CompensateDispatchPayload, CompensatePayload, CompensationCompletedPayload,
    CompensationFinishedPayload, EventBus, ExecuteCompensationPayload, ExecuteStepPayload,
    StepCompletedPayload, StepFailedPayload, WorkflowCompletedPayload, WorkflowFailedPayload,
};
pub use handler::{CompensationHandler, StepHandler};
pub use ids::WorkflowId;
pub use persistence::{Persistence, WorkflowHistory, WorkflowStatusUpdate};
pub use registry::Registry;
pub use status::{CompensationResult, StepStatus, WorkflowStatus};
pub use store::{StateStore, StoreError};
