//! Service configuration.
//!
//! Every field carries a default so an empty (or absent) file yields a
//! working single-node server.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::result::Result;

/// Top-level configuration for the redfishd process.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// HTTP listener settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Event bus and waiter sizing.
    #[serde(default)]
    pub events: EventsConfig,

    /// Command dispatch settings.
    #[serde(default)]
    pub commands: CommandsConfig,

    /// Log filter defaults.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Static accounts accepted by the HTTP Basic authenticator.
    #[serde(default)]
    pub accounts: Vec<AccountConfig>,
}

/// HTTP listener settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Socket address to bind, e.g. `0.0.0.0:8443`.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Versioned API root every resource lives under.
    #[serde(default = "default_api_root")]
    pub api_root: String,

    /// Value of the `Server` response header.
    #[serde(default = "default_server_name")]
    pub server_name: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            api_root: default_api_root(),
            server_name: default_server_name(),
        }
    }
}

/// Event bus and waiter sizing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventsConfig {
    /// Bounded inbox length for every waiter listener.
    #[serde(default = "default_waiter_inbox_capacity")]
    pub waiter_inbox_capacity: usize,

    /// Capacity of the bus broadcast channels.
    #[serde(default = "default_bus_capacity")]
    pub bus_capacity: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            waiter_inbox_capacity: default_waiter_inbox_capacity(),
            bus_capacity: default_bus_capacity(),
        }
    }
}

/// Command dispatch settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandsConfig {
    /// How long an HTTP request waits for its completion event.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Reload-and-retry attempts after an optimistic version conflict.
    #[serde(default = "default_max_version_retries")]
    pub max_version_retries: u32,
}

impl Default for CommandsConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: default_request_timeout_ms(),
            max_version_retries: default_max_version_retries(),
        }
    }
}

impl CommandsConfig {
    /// Request timeout as a `Duration`.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Log filter defaults; `RUST_LOG` takes precedence when set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
        }
    }
}

/// A statically configured account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountConfig {
    pub user_name: String,
    pub password: String,
    #[serde(default)]
    pub privileges: Vec<String>,
}

impl Config {
    /// Parse configuration from a TOML document.
    ///
    /// # Errors
    ///
    /// Returns `TomlParseFailed` for malformed documents and `InvalidConfig`
    /// when a value is out of range.
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(source).map_err(|e| Error::toml_parse_failed(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns `FileReadFailed` if the file cannot be read, plus any error
    /// from [`Config::from_toml_str`].
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)
            .map_err(|e| Error::file_read_failed(path, e.to_string()))?;
        let config = Self::from_toml_str(&source)?;
        tracing::debug!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if a value is out of range.
    pub fn validate(&self) -> Result<()> {
        if self.events.waiter_inbox_capacity == 0 {
            return Err(Error::invalid_config(
                "events.waiter_inbox_capacity must be greater than 0",
            ));
        }

        if self.events.bus_capacity == 0 {
            return Err(Error::invalid_config(
                "events.bus_capacity must be greater than 0",
            ));
        }

        if self.commands.request_timeout_ms == 0 {
            return Err(Error::invalid_config(
                "commands.request_timeout_ms must be greater than 0",
            ));
        }

        if !self.server.api_root.starts_with('/') {
            return Err(Error::invalid_config(format!(
                "server.api_root '{}' must start with '/'",
                self.server.api_root
            )));
        }

        Ok(())
    }
}

fn default_bind_address() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_api_root() -> String {
    "/redfish/v1".to_string()
}

fn default_server_name() -> String {
    "redfishd".to_string()
}

const fn default_waiter_inbox_capacity() -> usize {
    20
}

const fn default_bus_capacity() -> usize {
    1000
}

const fn default_request_timeout_ms() -> u64 {
    30_000
}

const fn default_max_version_retries() -> u32 {
    3
}

fn default_log_filter() -> String {
    "redfishd=info,redfishd_domain=info,redfishd_web=info,redfishd_events=warn,tower_http=info".to_string()
}
