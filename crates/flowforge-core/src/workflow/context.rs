use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{FlowForgeError, Result};

/// A workflow's string-keyed context bag (§3, §9 "Context as opaque bag").
///
/// Modeled as a restricted `serde_json::Value` rather than a typed struct:
/// the core has no business reasoning about what a step puts in context,
/// only merging and snapshotting it. Per-workflow typed views belong to step
/// handler code, not here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Context(Map<String, Value>);

impl Context {
    /// An empty context.
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Build a context from a JSON object. Returns a validation error if
    /// `value` is not a JSON object.
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            other => Err(FlowForgeError::Validation(format!(
                "context must be a JSON object, got {other}"
            ))),
        }
    }

    /// Merge `delta` into this context, overwriting any overlapping keys.
    /// Non-destructive to keys not present in `delta`.
    pub fn merge(&mut self, delta: &Context) {
        for (key, value) in &delta.0 {
            self.0.insert(key.clone(), value.clone());
        }
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.0.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Snapshot this context as a plain JSON value (used when recording a
    /// Step Execution's `input`).
    pub fn as_value(&self) -> Value {
        Value::Object(self.0.clone())
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Map<String, Value>> for Context {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}
