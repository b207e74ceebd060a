//! Environment variable loading for configuration

use std::env;

use super::builder::ConfigBuilder;
use crate::Result;
use crate::executor::RowProtocol;

/// Environment variable names
mod vars {
    pub const SQLITE3_DATABASE: &str = "SQLITE3_DATABASE";
    pub const SQLITE3_ROW_PROTOCOL: &str = "SQLITE3_ROW_PROTOCOL";
    pub const RUST_LOG: &str = "RUST_LOG";
    pub const SQLITE3_JSON_LOGS: &str = "SQLITE3_JSON_LOGS";
}

/// Load configuration from environment variables
pub fn load_from_env(mut builder: ConfigBuilder) -> Result<ConfigBuilder> {
    if let Ok(name) = env::var(vars::SQLITE3_DATABASE) {
        builder = builder.name(name);
    }

    if let Ok(protocol_str) = env::var(vars::SQLITE3_ROW_PROTOCOL) {
        let protocol: RowProtocol = protocol_str.parse().map_err(|e| {
            crate::Error::Config(format!("Invalid {}: {}", vars::SQLITE3_ROW_PROTOCOL, e))
        })?;
        builder = builder.protocol(protocol);
    }

    if let Ok(level) = env::var(vars::RUST_LOG) {
        builder = builder.log_level(level);
    }

    if let Ok(val) = env::var(vars::SQLITE3_JSON_LOGS) {
        builder = builder.json_logs(parse_bool(&val));
    }

    Ok(builder)
}

fn parse_bool(s: &str) -> bool {
    matches!(s.to_lowercase().as_str(), "true" | "1" | "yes" | "on")
}
