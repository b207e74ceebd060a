//! Configuration types and builder

use serde::{Deserialize, Serialize};

use crate::Error;
use crate::executor::RowProtocol;

/// Resolved configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub database: DatabaseConfig,
    pub telemetry: TelemetryConfig,
}

impl Config {
    #[must_use]
    pub const fn builder() -> ConfigBuilder {
        ConfigBuilder::new()
    }
}

/// Which database to open and how rows are delivered
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub name: String,
    #[serde(default)]
    pub protocol: RowProtocol,
}

/// Logging configuration
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TelemetryConfig {
    pub log_level: String,
    pub json_logs: bool,
}

/// Configuration builder with fluent API
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    name: Option<String>,
    protocol: RowProtocol,
    telemetry: TelemetryConfig,
}

impl ConfigBuilder {
    const DEFAULT_LOG_LEVEL: &'static str = "info";

    #[must_use]
    pub const fn new() -> Self {
        Self {
            name: None,
            protocol: RowProtocol::Cursor,
            telemetry: TelemetryConfig {
                log_level: String::new(),
                json_logs: false,
            },
        }
    }

    /// Database file name, or `:memory:`.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    #[must_use]
    pub const fn protocol(mut self, protocol: RowProtocol) -> Self {
        self.protocol = protocol;
        self
    }

    #[must_use]
    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.telemetry.log_level = level.into();
        self
    }

    #[must_use]
    pub const fn json_logs(mut self, enabled: bool) -> Self {
        self.telemetry.json_logs = enabled;
        self
    }

    /// Build the configuration.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if no database name was set.
    pub fn build(self) -> crate::Result<Config> {
        let name = self
            .name
            .filter(|n| !n.trim().is_empty())
            .ok_or_else(|| Error::Config("database name is required".into()))?;

        let log_level = if self.telemetry.log_level.is_empty() {
            Self::DEFAULT_LOG_LEVEL.to_string()
        } else {
            self.telemetry.log_level
        };

        Ok(Config {
            database: DatabaseConfig {
                name,
                protocol: self.protocol,
            },
            telemetry: TelemetryConfig {
                log_level,
                json_logs: self.telemetry.json_logs,
            },
        })
    }
}
