//! Dependency-free test doubles shared by the workflow module's unit tests:
//! explicit fakes over a mocking framework.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;

use super::events::{BusError, EventBus};
use super::store::{StateStore, StoreError};

pub struct MemStore {
    data: Mutex<HashMap<(String, String), Value>>,
}

impl MemStore {
    pub fn new() -> Self {
        Self {
            data: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl StateStore for MemStore {
    async fn get(&self, group: &str, key: &str) -> Result<Option<Value>, StoreError> {
        Ok(self
            .data
            .lock()
            .unwrap()
            .get(&(group.to_string(), key.to_string()))
            .cloned())
    }

    async fn set(
        &self,
        group: &str,
        key: &str,
        value: Value,
        expected_version: Option<u64>,
    ) -> Result<(), StoreError> {
        let mut data = self.data.lock().unwrap();
        if let Some(expected) = expected_version {
            if let Some(existing) = data.get(&(group.to_string(), key.to_string())) {
                let found = existing.get("version").and_then(|v| v.as_u64()).unwrap_or(0);
                if found != expected {
                    return Err(StoreError::VersionConflict {
                        group: group.to_string(),
                        key: key.to_string(),
                        expected,
                        found,
                    });
                }
            }
        }
        data.insert((group.to_string(), key.to_string()), value);
        Ok(())
    }

    async fn delete(&self, group: &str, key: &str) -> Result<(), StoreError> {
        self.data
            .lock()
            .unwrap()
            .remove(&(group.to_string(), key.to_string()));
        Ok(())
    }

    async fn get_group(&self, group: &str) -> Result<Vec<Value>, StoreError> {
        Ok(self
            .data
            .lock()
            .unwrap()
            .iter()
            .filter(|((g, _), _)| g == group)
            .map(|(_, v)| v.clone())
            .collect())
    }

    async fn clear(&self, group: &str) -> Result<(), StoreError> {
        self.data.lock().unwrap().retain(|(g, _), _| g != group);
        Ok(())
    }
}

/// Records every emitted `(topic, payload)` pair in order; never delivers
/// to subscribers itself (the unit tests below assert on emissions
/// directly rather than exercising a dispatcher).
pub struct RecordingBus {
    pub emitted: Mutex<Vec<(String, Value)>>,
}

impl RecordingBus {
    pub fn new() -> Self {
        Self {
            emitted: Mutex::new(Vec::new()),
        }
    }

    pub fn emitted_topics(&self) -> Vec<String> {
        self.emitted
            .lock()
            .unwrap()
            .iter()
            .map(|(t, _)| t.clone())
            .collect()
    }

    pub fn last_payload(&self, topic: &str) -> Option<Value> {
        self.emitted
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(t, _)| t == topic)
            .map(|(_, v)| v.clone())
    }

    pub fn count(&self, topic: &str) -> usize {
        self.emitted
            .lock()
            .unwrap()
            .iter()
            .filter(|(t, _)| t == topic)
            .count()
    }
}

#[async_trait]
impl EventBus for RecordingBus {
    async fn emit(&self, topic: &str, payload: Value) -> Result<(), BusError> {
        self.emitted
            .lock()
            .unwrap()
            .push((topic.to_string(), payload));
        Ok(())
    }
}
