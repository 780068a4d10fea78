use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

/// Error surface for a [`StateStore`] implementation.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("backend error: {0}")]
    Backend(String),

    #[error("version conflict on ({group}, {key}): expected {expected}, found {found}")]
    VersionConflict {
        group: String,
        key: String,
        expected: u64,
        found: u64,
    },
}

/// Provider-agnostic grouped key-value store (§6 "Persistence store
/// contract"). The core assumes at-least point-in-time read/write by
/// `(group, key)` and a group-scan; no multi-key transactions are required
/// (§5).
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn get(&self, group: &str, key: &str) -> Result<Option<Value>, StoreError>;

    /// Write `value` at `(group, key)`. When `expected_version` is `Some`,
    /// the write must fail with [`StoreError::VersionConflict`] if the
    /// stored value's `version` field does not match (optimistic-CAS guard,
    /// §9 "Shared-resource race").
    async fn set(
        &self,
        group: &str,
        key: &str,
        value: Value,
        expected_version: Option<u64>,
    ) -> Result<(), StoreError>;

    async fn delete(&self, group: &str, key: &str) -> Result<(), StoreError>;

    async fn get_group(&self, group: &str) -> Result<Vec<Value>, StoreError>;

    async fn clear(&self, group: &str) -> Result<(), StoreError>;
}
