use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::PgListener;
use sqlx::PgPool;
use tokio::sync::Mutex;
use uuid::Uuid;

use flowforge_core::{BusError, EventBus};

use super::EventSource;

fn backend_err(e: sqlx::Error) -> BusError {
    BusError::Backend(e.to_string())
}

/// `EventBus` backed by a durable outbox table plus `LISTEN`/`NOTIFY` for
/// low-latency wakeups: every emit is a durable insert, and consumption
/// claims up to `batch_size` rows at a time with `FOR UPDATE SKIP LOCKED` so
/// multiple dispatcher processes can share the queue without
/// double-delivery, handing them out one at a time from a local buffer.
pub struct PostgresEventBus {
    pool: PgPool,
    listener: Mutex<Option<PgListener>>,
    buffer: Mutex<VecDeque<(String, Value)>>,
    poll_interval: Duration,
    batch_size: i64,
}

impl PostgresEventBus {
    pub fn new(pool: PgPool) -> Self {
        Self::with_config(pool, Duration::from_secs(1), 20)
    }

    pub fn with_config(pool: PgPool, poll_interval: Duration, batch_size: u32) -> Self {
        Self {
            pool,
            listener: Mutex::new(None),
            buffer: Mutex::new(VecDeque::new()),
            poll_interval,
            batch_size: batch_size.max(1) as i64,
        }
    }

    pub async fn ensure_schema(&self) -> Result<(), BusError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS flowforge_events (
                id UUID PRIMARY KEY,
                topic TEXT NOT NULL,
                payload JSONB NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                consumed_at TIMESTAMPTZ
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(backend_err)?;

        Ok(())
    }

    async fn try_dequeue(&self) -> Result<Option<(String, Value)>, BusError> {
        let mut buffer = self.buffer.lock().await;
        if let Some(event) = buffer.pop_front() {
            return Ok(Some(event));
        }

        let rows: Vec<(String, Value)> = sqlx::query_as(
            r#"
            UPDATE flowforge_events
            SET consumed_at = NOW()
            WHERE id IN (
                SELECT id FROM flowforge_events
                WHERE consumed_at IS NULL
                ORDER BY created_at ASC LIMIT $1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING topic, payload
            "#,
        )
        .bind(self.batch_size)
        .fetch_all(&self.pool)
        .await
        .map_err(backend_err)?;

        buffer.extend(rows);
        Ok(buffer.pop_front())
    }
}

#[async_trait]
impl EventBus for PostgresEventBus {
    async fn emit(&self, topic: &str, payload: Value) -> Result<(), BusError> {
        let id = Uuid::new_v4();

        sqlx::query("INSERT INTO flowforge_events (id, topic, payload) VALUES ($1, $2, $3)")
            .bind(id)
            .bind(topic)
            .bind(&payload)
            .execute(&self.pool)
            .await
            .map_err(backend_err)?;

        sqlx::query("SELECT pg_notify('flowforge_events', $1)")
            .bind(topic)
            .execute(&self.pool)
            .await
            .map_err(backend_err)?;

        Ok(())
    }
}

#[async_trait]
impl EventSource for PostgresEventBus {
    async fn next_event(&self) -> Result<Option<(String, Value)>, BusError> {
        if let Some(event) = self.try_dequeue().await? {
            return Ok(Some(event));
        }

        let mut guard = self.listener.lock().await;
        if guard.is_none() {
            let mut listener = PgListener::connect_with(&self.pool).await.map_err(backend_err)?;
            listener.listen("flowforge_events").await.map_err(backend_err)?;
            *guard = Some(listener);
        }
        let listener = guard.as_mut().expect("listener just initialized");

        tokio::select! {
            notification = listener.recv() => {
                notification.map_err(backend_err)?;
            }
            _ = tokio::time::sleep(self.poll_interval) => {}
        }
        drop(guard);

        self.try_dequeue().await
    }

    async fn try_next_event(&self) -> Result<Option<(String, Value)>, BusError> {
        self.try_dequeue().await
    }
}
