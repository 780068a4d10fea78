use serde::{Deserialize, Serialize};

/// Static description of one step within a [`WorkflowDefinition`]: its name,
/// its forward dispatch topic, and the optional compensation handler key.
/// Absence of `compensation_name` means the step has no side effect to undo
/// (§3).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepDefinition {
    pub name: String,
    pub topic: String,
    pub compensation_name: Option<String>,
}

impl StepDefinition {
    pub fn new(name: impl Into<String>, topic: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            topic: topic.into(),
            compensation_name: None,
        }
    }

    pub fn with_compensation(mut self, compensation_name: impl Into<String>) -> Self {
        self.compensation_name = Some(compensation_name.into());
        self
    }

    pub fn is_compensable(&self) -> bool {
        self.compensation_name.is_some()
    }
}

/// A registered workflow type: a unique name plus its ordered step
/// definitions (§3 "Workflow Type Definition").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub workflow_type: String,
    pub steps: Vec<StepDefinition>,
}

impl WorkflowDefinition {
    pub fn new(workflow_type: impl Into<String>, steps: Vec<StepDefinition>) -> Self {
        Self {
            workflow_type: workflow_type.into(),
            steps,
        }
    }

    pub fn step(&self, name: &str) -> Option<&StepDefinition> {
        self.steps.iter().find(|s| s.name == name)
    }

    pub fn step_index(&self, name: &str) -> Option<usize> {
        self.steps.iter().position(|s| s.name == name)
    }

    pub fn first_step(&self) -> Option<&StepDefinition> {
        self.steps.first()
    }

    pub fn next_step(&self, name: &str) -> Option<&StepDefinition> {
        let idx = self.step_index(name)?;
        self.steps.get(idx + 1)
    }

    pub fn is_last_step(&self, name: &str) -> bool {
        self.step_index(name)
            .map(|idx| idx + 1 == self.steps.len())
            .unwrap_or(false)
    }

    /// The prefix of steps up to and including `name` whose definitions have
    /// a `compensation_name`, in reverse order. Used for reasoning/debugging
    /// only; the compensator drives off persisted Compensation Records,
    /// which reflect what actually executed (§4.1).
    pub fn compensable_steps_up_to(&self, name: &str) -> Vec<&StepDefinition> {
        let Some(idx) = self.step_index(name) else {
            return Vec::new();
        };
        self.steps[..=idx]
            .iter()
            .filter(|s| s.is_compensable())
            .rev()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> WorkflowDefinition {
        WorkflowDefinition::new(
            "order",
            vec![
                StepDefinition::new("ValidateOrder", "order.validate"),
                StepDefinition::new("ChargePayment", "order.charge")
                    .with_compensation("RefundPayment"),
                StepDefinition::new("ReserveInventory", "order.reserve")
                    .with_compensation("ReleaseInventory"),
                StepDefinition::new("NotifyUser", "order.notify"),
            ],
        )
    }

    #[test]
    fn next_step_and_last_step() {
        let def = sample();
        assert_eq!(
            def.next_step("ValidateOrder").map(|s| s.name.as_str()),
            Some("ChargePayment")
        );
        assert!(!def.is_last_step("ChargePayment"));
        assert!(def.is_last_step("NotifyUser"));
        assert_eq!(def.next_step("NotifyUser"), None);
    }

    #[test]
    fn compensable_steps_up_to_is_reverse_order() {
        let def = sample();
        let names: Vec<&str> = def
            .compensable_steps_up_to("ReserveInventory")
            .iter()
            .map(|s| s.name.as_str())
            .collect();
        assert_eq!(names, vec!["ReleaseInventory", "RefundPayment"]);
    }

    #[test]
    fn compensable_steps_up_to_unknown_step_is_empty() {
        let def = sample();
        assert!(def.compensable_steps_up_to("DoesNotExist").is_empty());
    }
}
