//! Logging setup

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::config::TelemetryConfig;
use crate::{Error, Result};

/// Install a global `tracing` subscriber.
///
/// `RUST_LOG` wins over the configured level. With `json_logs` set, events are
/// written as JSON lines.
///
/// # Errors
///
/// Returns `Error::Logging` if the filter is invalid or a global subscriber
/// is already installed.
pub fn init_logging(config: &TelemetryConfig) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(level_or_default(&config.log_level))
            .map_err(|e| Error::Logging(format!("invalid log level: {e}")))?,
    };

    let fmt_layer = if config.json_logs {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer().with_target(true).boxed()
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init()
        .map_err(|e| Error::Logging(e.to_string()))
}

fn level_or_default(level: &str) -> &str {
    if level.trim().is_empty() { "info" } else { level }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_or_default() {
        assert_eq!(level_or_default(""), "info");
        assert_eq!(level_or_default("  "), "info");
        assert_eq!(level_or_default("debug"), "debug");
    }

    #[test]
    fn test_second_init_is_an_error() {
        let config = TelemetryConfig {
            log_level: "warn".to_string(),
            json_logs: false,
        };
        // The first call may lose to another test's subscriber; the second
        // always finds one installed.
        let _ = init_logging(&config);
        let err = init_logging(&config).unwrap_err();
        assert!(err.is_logging());
    }
}
