use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{broadcast, Mutex};

use flowforge_core::{BusError, EventBus};

use super::EventSource;

/// `EventBus` backed by a `tokio::sync::broadcast` channel. Every
/// [`InMemoryEventSubscription`] created via [`InMemoryEventBus::subscribe`]
/// sees every event emitted after it was created, matching the at-least-once
/// semantics of the Postgres outbox for a single-process test harness.
pub struct InMemoryEventBus {
    sender: broadcast::Sender<(String, Value)>,
}

impl InMemoryEventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(4096);
        Self { sender }
    }

    pub fn subscribe(&self) -> InMemoryEventSubscription {
        InMemoryEventSubscription {
            receiver: Mutex::new(self.sender.subscribe()),
        }
    }
}

impl Default for InMemoryEventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventBus for InMemoryEventBus {
    async fn emit(&self, topic: &str, payload: Value) -> Result<(), BusError> {
        // No subscribers yet isn't an error, mirroring NOTIFY's fire-and-forget
        // semantics for listeners that haven't started LISTENing yet.
        let _ = self.sender.send((topic.to_string(), payload));
        Ok(())
    }
}

/// A dispatcher's private view of an [`InMemoryEventBus`].
pub struct InMemoryEventSubscription {
    receiver: Mutex<broadcast::Receiver<(String, Value)>>,
}

impl InMemoryEventSubscription {
    fn next_event_boxed(
        &self,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<Option<(String, Value)>, BusError>> + Send + '_>>
    {
        Box::pin(self.next_event())
    }
}

#[async_trait]
impl EventSource for InMemoryEventSubscription {
    async fn next_event(&self) -> Result<Option<(String, Value)>, BusError> {
        let mut receiver = self.receiver.lock().await;
        match receiver.recv().await {
            Ok(event) => Ok(Some(event)),
            Err(broadcast::error::RecvError::Closed) => Ok(None),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "dispatcher lagged behind the in-memory event bus");
                drop(receiver);
                self.next_event_boxed().await
            }
        }
    }

    async fn try_next_event(&self) -> Result<Option<(String, Value)>, BusError> {
        let mut receiver = self.receiver.lock().await;
        match receiver.try_recv() {
            Ok(event) => Ok(Some(event)),
            Err(broadcast::error::TryRecvError::Empty) => Ok(None),
            Err(broadcast::error::TryRecvError::Closed) => Ok(None),
            Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "dispatcher lagged behind the in-memory event bus");
                drop(receiver);
                Box::pin(self.try_next_event()).await
            }
        }
    }
}
