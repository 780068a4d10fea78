mod memory;
mod postgres;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use flowforge_core::BusError;

pub use memory::{InMemoryEventBus, InMemoryEventSubscription};
pub use postgres::PostgresEventBus;

/// Consumption side of an event bus. This is deliberately not part of
/// `flowforge_core::EventBus`: subscribing and draining is a runtime-adapter
/// concern, while `emit` alone is the stable contract core code is built
/// against.
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Blocks until an event is available, or returns `Ok(None)` once the
    /// source is closed for good.
    async fn next_event(&self) -> Result<Option<(String, Value)>, BusError>;

    /// Returns immediately with `Ok(None)` if nothing is queued right now.
    async fn try_next_event(&self) -> Result<Option<(String, Value)>, BusError>;
}

/// Lets the same `Arc<PostgresEventBus>` serve both as the `Engine`/
/// `Compensator`'s emit side and the dispatcher's consumption side, rather
/// than opening a second pool-backed instance just to satisfy the trait.
#[async_trait]
impl<T: EventSource + ?Sized> EventSource for Arc<T> {
    async fn next_event(&self) -> Result<Option<(String, Value)>, BusError> {
        (**self).next_event().await
    }

    async fn try_next_event(&self) -> Result<Option<(String, Value)>, BusError> {
        (**self).try_next_event().await
    }
}
