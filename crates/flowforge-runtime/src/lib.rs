//! Concrete `StateStore`/`EventBus` adapters, the event dispatcher that
//! drives step and compensation handlers from them, and the HTTP gateway,
//! for the FlowForge workflow orchestrator.

pub mod bus;
pub mod dispatcher;
pub mod fakes;
pub mod gateway;
pub mod store;

pub use bus::{EventSource, InMemoryEventBus, InMemoryEventSubscription, PostgresEventBus};
pub use dispatcher::Dispatcher;
pub use gateway::{router, GatewayState, RpcError, RpcResponse};
pub use store::{InMemoryStateStore, PostgresStateStore};
