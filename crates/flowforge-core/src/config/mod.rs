mod database;
mod dispatcher;
mod logging;

pub use database::DatabaseConfig;
pub use dispatcher::DispatcherConfig;
pub use logging::LoggingConfig;

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{FlowForgeError, Result};

/// Root configuration for the orchestrator process.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FlowForgeConfig {
    /// Database configuration (backs the [`StateStore`](crate::workflow::StateStore)
    /// and [`EventBus`](crate::workflow::EventBus) implementations).
    #[serde(default)]
    pub database: DatabaseConfig,

    /// HTTP gateway bind configuration.
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Dispatcher/scheduler polling configuration.
    #[serde(default)]
    pub dispatcher: DispatcherConfig,

    /// Structured logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl FlowForgeConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| FlowForgeError::Config(format!("failed to read config file: {e}")))?;
        Self::parse_toml(&content)
    }

    /// Parse configuration from a TOML string, substituting `${VAR}`
    /// environment variable references before parsing.
    pub fn parse_toml(content: &str) -> Result<Self> {
        let content = substitute_env_vars(content);
        toml::from_str(&content)
            .map_err(|e| FlowForgeError::Config(format!("failed to parse config: {e}")))
    }

    /// Build a config with just a database URL set, everything else
    /// defaulted — convenient for tests and quick starts.
    pub fn default_with_database_url(url: &str) -> Self {
        Self {
            database: DatabaseConfig {
                url: url.to_string(),
                ..Default::default()
            },
            ..Default::default()
        }
    }
}

/// HTTP gateway bind configuration (§6 "HTTP surface").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Port to bind the HTTP surface to.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Request timeout in seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

fn default_port() -> u16 {
    8080
}

fn default_request_timeout() -> u64 {
    30
}

/// Substitute `${VAR}` references with the corresponding environment
/// variable's value, leaving unresolved references untouched.
fn substitute_env_vars(content: &str) -> String {
    let mut result = content.to_string();
    let mut search_from = 0;

    while let Some(start) = result[search_from..].find("${") {
        let start = search_from + start;
        let Some(end) = result[start..].find('}') else {
            break;
        };
        let end = start + end;
        let var_name = &result[start + 2..end];
        let is_valid_ident = !var_name.is_empty()
            && var_name
                .chars()
                .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_');

        if is_valid_ident {
            if let Ok(value) = std::env::var(var_name) {
                result.replace_range(start..=end, &value);
                search_from = start + value.len();
                continue;
            }
        }
        search_from = end + 1;
    }

    result
}
