mod schema;

pub use schema::*;

use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),
    #[error("Unknown connection: {0}")]
    UnknownConnection(String),
}

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let config: Config = toml::from_str(&content)?;
    Ok(config)
}

/// Resolve a profile by label, failing with `UnknownConnection`
pub fn find_connection<'a>(
    config: &'a Config,
    label: &str,
) -> Result<&'a ConnectionProfile, ConfigError> {
    config
        .connection(label)
        .ok_or_else(|| ConfigError::UnknownConnection(label.to_string()))
}
