//! Domain types, persistence contract, and the saga engine/compensator for
//! the FlowForge workflow orchestrator.
//!
//! This crate has no transport or database dependencies: it defines the
//! [`workflow::StateStore`] and [`workflow::EventBus`] traits that concrete
//! adapters (see `flowforge-runtime`) implement, and builds the orchestration
//! logic entirely against those traits.

pub mod config;
pub mod error;
pub mod workflow;

pub use config::FlowForgeConfig;
pub use error::{FlowForgeError, Result};
pub use workflow::{
    BusError, CompensationHandler, CompensationRecord, CompensationResult, Compensator, Context,
    Engine, EventBus, Persistence, Registry, StateStore, StepDefinition, StepError, StepExecution,
    StepHandler, StepStatus, StoreError, WorkflowDefinition, WorkflowId, WorkflowInstance,
    WorkflowStatus,
};
