pub mod doctor;
pub mod models;
pub mod run;
pub mod serve;
pub mod status;

use pulseloop_config::{AppConfig, ConfigError};
use std::path::{Path, PathBuf};

/// Load the config from `path`, or the default location.
pub fn load_config(path: Option<&Path>) -> Result<AppConfig, ConfigError> {
    match path {
        Some(path) => AppConfig::load_with_overrides(path),
        None => AppConfig::load(),
    }
}

pub fn config_path(path: Option<&Path>) -> PathBuf {
    path.map(Path::to_path_buf)
        .unwrap_or_else(|| AppConfig::config_dir().join("config.toml"))
}
