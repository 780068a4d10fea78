use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use serde_json::Value;

use flowforge_core::{StateStore, StoreError};

/// Process-local `StateStore` backed by a locked hash map, keyed by
/// `(group, key)`. Suitable for the gateway's `--in-memory` mode and for
/// integration tests that would rather not stand up Postgres.
pub struct InMemoryStateStore {
    data: RwLock<HashMap<(String, String), Value>>,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self {
            data: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryStateStore {
    fn default() -> Self {
        Self::new()
    }
}

fn stored_version(value: &Value) -> u64 {
    value.get("version").and_then(|v| v.as_u64()).unwrap_or(0)
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    async fn get(&self, group: &str, key: &str) -> Result<Option<Value>, StoreError> {
        let data = self
            .data
            .read()
            .map_err(|_| StoreError::Backend("lock poisoned".to_string()))?;
        Ok(data.get(&(group.to_string(), key.to_string())).cloned())
    }

    async fn set(
        &self,
        group: &str,
        key: &str,
        value: Value,
        expected_version: Option<u64>,
    ) -> Result<(), StoreError> {
        let mut data = self
            .data
            .write()
            .map_err(|_| StoreError::Backend("lock poisoned".to_string()))?;
        let entry_key = (group.to_string(), key.to_string());

        if let Some(expected) = expected_version {
            if let Some(existing) = data.get(&entry_key) {
                let found = stored_version(existing);
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

        data.insert(entry_key, value);
        Ok(())
    }

    async fn delete(&self, group: &str, key: &str) -> Result<(), StoreError> {
        let mut data = self
            .data
            .write()
            .map_err(|_| StoreError::Backend("lock poisoned".to_string()))?;
        data.remove(&(group.to_string(), key.to_string()));
        Ok(())
    }

    async fn get_group(&self, group: &str) -> Result<Vec<Value>, StoreError> {
        let data = self
            .data
            .read()
            .map_err(|_| StoreError::Backend("lock poisoned".to_string()))?;
        Ok(data
            .iter()
            .filter(|((g, _), _)| g == group)
            .map(|(_, v)| v.clone())
            .collect())
    }

    async fn clear(&self, group: &str) -> Result<(), StoreError> {
        let mut data = self
            .data
            .write()
            .map_err(|_| StoreError::Backend("lock poisoned".to_string()))?;
        data.retain(|(g, _), _| g != group);
        Ok(())
    }
}
