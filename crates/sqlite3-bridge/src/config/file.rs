//! TOML configuration file loading

use std::path::{Path, PathBuf};

use serde::Deserialize;

use super::builder::ConfigBuilder;
use crate::Result;
use crate::executor::RowProtocol;

/// Configuration file locations checked in order
const CONFIG_PATHS: &[&str] = &[
    "./sqlite3-bridge.toml",
    "~/.config/sqlite3-bridge/config.toml",
    "/etc/sqlite3-bridge/config.toml",
];

/// Find the first existing configuration file
pub fn find_config_file() -> Option<PathBuf> {
    for path_str in CONFIG_PATHS {
        let path = if path_str.starts_with('~') {
            if let Ok(home) = std::env::var("HOME") {
                PathBuf::from(path_str.replacen('~', &home, 1))
            } else {
                continue;
            }
        } else {
            PathBuf::from(path_str)
        };

        if path.exists() {
            return Some(path);
        }
    }
    None
}

/// Load configuration from a TOML file
pub fn load_from_file(path: &Path, builder: ConfigBuilder) -> Result<ConfigBuilder> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        crate::Error::Config(format!(
            "Failed to read config file {}: {}",
            path.display(),
            e
        ))
    })?;

    let file_config: FileConfig = toml::from_str(&content).map_err(|e| {
        crate::Error::Config(format!(
            "Failed to parse config file {}: {}",
            path.display(),
            e
        ))
    })?;

    apply_file_config(builder, file_config)
}

fn apply_file_config(mut builder: ConfigBuilder, config: FileConfig) -> Result<ConfigBuilder> {
    if let Some(db) = config.database {
        if let Some(name) = db.name {
            builder = builder.name(name);
        }

        if let Some(protocol_str) = db.protocol {
            let protocol: RowProtocol = protocol_str
                .parse()
                .map_err(|e| crate::Error::Config(format!("Invalid database.protocol: {e}")))?;
            builder = builder.protocol(protocol);
        }
    }

    if let Some(telemetry) = config.telemetry {
        if let Some(level) = telemetry.log_level {
            builder = builder.log_level(level);
        }

        if let Some(json) = telemetry.json_logs {
            builder = builder.json_logs(json);
        }
    }

    Ok(builder)
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    database: Option<FileDatabaseConfig>,
    telemetry: Option<FileTelemetryConfig>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileDatabaseConfig {
    name: Option<String>,
    protocol: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileTelemetryConfig {
    log_level: Option<String>,
    json_logs: Option<bool>,
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::NamedTempFile;

    use super::*;

    fn write_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_full_file() {
        let file = write_config(
            r#"
[database]
name = "app.sqlite"
protocol = "events"

[telemetry]
log_level = "debug"
json_logs = true
"#,
        );

        let config = load_from_file(file.path(), ConfigBuilder::new())
            .unwrap()
            .build()
            .unwrap();
        assert_eq!(config.database.name, "app.sqlite");
        assert_eq!(config.database.protocol, RowProtocol::Channel);
        assert_eq!(config.telemetry.log_level, "debug");
        assert!(config.telemetry.json_logs);
    }

    #[test]
    fn test_load_partial_file_keeps_builder_values() {
        let file = write_config("[telemetry]\nlog_level = \"warn\"\n");
        let builder = ConfigBuilder::new().name(":memory:");
        let config = load_from_file(file.path(), builder)
            .unwrap()
            .build()
            .unwrap();
        assert_eq!(config.database.name, ":memory:");
        assert_eq!(config.telemetry.log_level, "warn");
    }

    #[test]
    fn test_invalid_protocol() {
        let file = write_config("[database]\nprotocol = \"carrier-pigeon\"\n");
        let err = load_from_file(file.path(), ConfigBuilder::new()).unwrap_err();
        assert!(err.is_config());
        assert!(err.to_string().contains("carrier-pigeon"));
    }

    #[test]
    fn test_unknown_field_rejected() {
        let file = write_config("[database]\npool_size = 4\n");
        let err = load_from_file(file.path(), ConfigBuilder::new()).unwrap_err();
        assert!(err.to_string().contains("Failed to parse"));
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        let err = load_from_file(&path, ConfigBuilder::new()).unwrap_err();
        assert!(err.to_string().contains("Failed to read"));
    }
}
