//! Platform directories for config and world data.

use std::path::PathBuf;

use crate::error::ConfigError;

pub const APP_NAME: &str = "voxlink";

/// `<platform config dir>/voxlink`, where `config.ron` lives.
pub fn default_config_dir() -> Result<PathBuf, ConfigError> {
    dirs::config_dir()
        .map(|base| base.join(APP_NAME))
        .ok_or(ConfigError::NoConfigDir)
}

/// `<platform data dir>/voxlink`, falling back to the config directory.
pub fn default_data_dir() -> Result<PathBuf, ConfigError> {
    match dirs::data_dir() {
        Some(base) => Ok(base.join(APP_NAME)),
        None => default_config_dir(),
    }
}
