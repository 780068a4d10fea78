use serde::{Deserialize, Serialize};

/// Structured logging configuration, consumed at process startup to
/// configure `tracing-subscriber`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter, e.g. "info", "debug", "flowforge_core=debug,warn".
    #[serde(default = "default_level")]
    pub level: String,

    /// Emit logs as JSON lines instead of human-readable text.
    #[serde(default)]
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            json_format: false,
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}
