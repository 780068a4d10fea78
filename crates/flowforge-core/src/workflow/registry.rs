use std::collections::HashMap;

use super::definition::{StepDefinition, WorkflowDefinition};
use crate::error::{FlowForgeError, Result};

/// Process-wide, immutable-after-init catalog of workflow types and their
/// ordered step definitions (C1).
///
/// Built explicitly at process start and passed to the engine/compensator
/// rather than reached through a global, which also simplifies testing
/// (§9 "Module-level registry").
#[derive(Debug, Clone, Default)]
pub struct Registry {
    definitions: HashMap<String, WorkflowDefinition>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a workflow type. Fails with [`FlowForgeError::DuplicateType`]
    /// if the type is already present; otherwise stores an immutable copy.
    /// Fails with [`FlowForgeError::EmptyWorkflow`] if `def` has no steps.
    pub fn register(&mut self, def: WorkflowDefinition) -> Result<()> {
        if self.definitions.contains_key(&def.workflow_type) {
            return Err(FlowForgeError::DuplicateType(def.workflow_type));
        }
        if def.steps.is_empty() {
            return Err(FlowForgeError::EmptyWorkflow(def.workflow_type));
        }
        self.definitions.insert(def.workflow_type.clone(), def);
        Ok(())
    }

    pub fn get(&self, workflow_type: &str) -> Option<&WorkflowDefinition> {
        self.definitions.get(workflow_type)
    }

    pub fn get_step(&self, workflow_type: &str, name: &str) -> Option<&StepDefinition> {
        self.get(workflow_type)?.step(name)
    }

    pub fn first_step(&self, workflow_type: &str) -> Option<&StepDefinition> {
        self.get(workflow_type)?.first_step()
    }

    pub fn next_step(&self, workflow_type: &str, name: &str) -> Option<&StepDefinition> {
        self.get(workflow_type)?.next_step(name)
    }

    pub fn is_last_step(&self, workflow_type: &str, name: &str) -> bool {
        self.get(workflow_type)
            .map(|def| def.is_last_step(name))
            .unwrap_or(false)
    }

    pub fn compensable_steps_up_to(
        &self,
        workflow_type: &str,
        name: &str,
    ) -> Vec<&StepDefinition> {
        self.get(workflow_type)
            .map(|def| def.compensable_steps_up_to(name))
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.definitions.keys().map(String::as_str).collect()
    }
}
