use serde::{Deserialize, Serialize};

/// Connection configuration for the backing state store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Connection URL for the state store.
    #[serde(default)]
    pub url: String,

    /// Maximum number of pooled connections.
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            pool_size: default_pool_size(),
        }
    }
}

fn default_pool_size() -> u32 {
    10
}
