use serde_json::Value;
use sqlx::PgPool;

use flowforge_core::{StateStore, StoreError};

fn backend_err(e: sqlx::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}

/// `StateStore` backed by a single JSONB table. The `version` column
/// mirrors the `version` field embedded in every stored JSON record and is
/// what the CAS guard in [`StateStore::set`] checks against, under a row
/// lock, so concurrent writers racing on the same `(group, key)` never both
/// succeed.
pub struct PostgresStateStore {
    pool: PgPool,
}

impl PostgresStateStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the backing table if it doesn't exist yet. Called once at
    /// startup; there is no migration history to track beyond this single
    /// table.
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS flowforge_store (
                group_id TEXT NOT NULL,
                key TEXT NOT NULL,
                value JSONB NOT NULL,
                version BIGINT NOT NULL DEFAULT 0,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                PRIMARY KEY (group_id, key)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(backend_err)?;

        Ok(())
    }
}

fn extract_version(value: &Value) -> i64 {
    value.get("version").and_then(|v| v.as_u64()).unwrap_or(0) as i64
}

#[async_trait::async_trait]
impl StateStore for PostgresStateStore {
    async fn get(&self, group: &str, key: &str) -> Result<Option<Value>, StoreError> {
        let row: Option<(Value,)> = sqlx::query_as(
            "SELECT value FROM flowforge_store WHERE group_id = $1 AND key = $2",
        )
        .bind(group)
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend_err)?;

        Ok(row.map(|(value,)| value))
    }

    async fn set(
        &self,
        group: &str,
        key: &str,
        value: Value,
        expected_version: Option<u64>,
    ) -> Result<(), StoreError> {
        let new_version = extract_version(&value);
        let mut tx = self.pool.begin().await.map_err(backend_err)?;

        let existing: Option<(i64,)> = sqlx::query_as(
            "SELECT version FROM flowforge_store WHERE group_id = $1 AND key = $2 FOR UPDATE",
        )
        .bind(group)
        .bind(key)
        .fetch_optional(&mut *tx)
        .await
        .map_err(backend_err)?;

        if let (Some(expected), Some((found,))) = (expected_version, existing) {
            if found as u64 != expected {
                return Err(StoreError::VersionConflict {
                    group: group.to_string(),
                    key: key.to_string(),
                    expected,
                    found: found as u64,
                });
            }
        }

        sqlx::query(
            r#"
            INSERT INTO flowforge_store (group_id, key, value, version, updated_at)
            VALUES ($1, $2, $3, $4, NOW())
            ON CONFLICT (group_id, key) DO UPDATE
            SET value = EXCLUDED.value, version = EXCLUDED.version, updated_at = NOW()
            "#,
        )
        .bind(group)
        .bind(key)
        .bind(&value)
        .bind(new_version)
        .execute(&mut *tx)
        .await
        .map_err(backend_err)?;

        tx.commit().await.map_err(backend_err)?;
        Ok(())
    }

    async fn delete(&self, group: &str, key: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM flowforge_store WHERE group_id = $1 AND key = $2")
            .bind(group)
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(backend_err)?;
        Ok(())
    }

    async fn get_group(&self, group: &str) -> Result<Vec<Value>, StoreError> {
        let rows: Vec<(Value,)> = sqlx::query_as(
            "SELECT value FROM flowforge_store WHERE group_id = $1 ORDER BY key ASC",
        )
        .bind(group)
        .fetch_all(&self.pool)
        .await
        .map_err(backend_err)?;

        Ok(rows.into_iter().map(|(value,)| value).collect())
    }

    async fn clear(&self, group: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM flowforge_store WHERE group_id = $1")
            .bind(group)
            .execute(&self.pool)
            .await
            .map_err(backend_err)?;
        Ok(())
    }
}
