use serde::{Deserialize, Serialize};

/// Polling configuration for the process that drains ready work from the
/// state store and dispatches it onto the event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatcherConfig {
    /// How often to poll for ready workflows, in seconds.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Maximum number of workflows to claim per poll.
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            batch_size: default_batch_size(),
        }
    }
}

fn default_poll_interval() -> u64 {
    1
}

fn default_batch_size() -> u32 {
    20
}
