use thiserror::Error;

use crate::workflow::{BusError, StoreError};

/// Core error type for FlowForge operations.
#[derive(Error, Debug)]
pub enum FlowForgeError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Event bus error: {0}")]
    Bus(#[from] BusError),

    #[error("Unknown workflow type: {0}")]
    UnknownType(String),

    #[error("Workflow type '{0}' is already registered")]
    DuplicateType(String),

    #[error("Workflow type '{0}' has no steps")]
    EmptyWorkflow(String),

    #[error("Unknown step '{step}' in workflow type '{workflow_type}'")]
    UnknownStep { workflow_type: String, step: String },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Step handler error: {0}")]
    Step(String),

    #[error("Compensation handler error: {0}")]
    Compensation(String),
}

impl From<serde_json::Error> for FlowForgeError {
    fn from(e: serde_json::Error) -> Self {
        FlowForgeError::Serialization(e.to_string())
    }
}

/// Result type alias using [`FlowForgeError`].
pub type Result<T> = std::result::Result<T, FlowForgeError>;
