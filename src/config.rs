// Configuration file handling, the structures in config_json are read from a JSON file.
use std::fs;
use std::io;
use std::path::Path;

use thiserror::Error;

pub mod config_json;

pub use config_json::{PortParameters, ReadParameters, ResetParameters, ScaleConfig};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read configuration: {0}")]
    Io(#[from] io::Error),

    #[error("cannot parse configuration: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid value {value:?} for {field}")]
    InvalidValue { field: &'static str, value: String },
}

/// Reads and validates the configuration file.
pub fn read_configuration(config_path: &Path) -> Result<ScaleConfig, ConfigError> {
    let config_str = fs::read_to_string(config_path)?;
    let config: ScaleConfig = serde_json::from_str(&config_str)?;
    config.validate()?;
    Ok(config)
}
