//! Configuration loading, validation, and management for PulseLoop.
//!
//! Loads configuration from `~/.pulseloop/config.toml` with environment
//! variable overrides. Validates all settings at startup.
//!
//! Nothing here is written back: edits made through the control surface
//! live in the in-memory store for the lifetime of the process.

use pulseloop_core::{LoopConfig, MIN_INTERVAL_MS, ModelSelector};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.pulseloop/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// HTTP control surface
    #[serde(default)]
    pub server: ServerConfig,

    /// Agent runtime connection
    #[serde(default)]
    pub runtime: RuntimeConfig,

    /// Initial loop configuration
    #[serde(default, rename = "loop")]
    pub loop_defaults: LoopDefaults,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Allowed CORS origins. Empty = permissive.
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

fn default_host() -> String {
    "127.0.0.1".into()
}
fn default_port() -> u16 {
    4680
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origins: vec![],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Base URL of the agent runtime server
    #[serde(default = "default_runtime_url")]
    pub url: String,

    /// Timeout for a single runtime request, in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Working directory the runtime should operate in
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directory: Option<String>,
}

fn default_runtime_url() -> String {
    "http://127.0.0.1:4096".into()
}
fn default_timeout_secs() -> u64 {
    600
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            url: default_runtime_url(),
            timeout_secs: default_timeout_secs(),
            directory: None,
        }
    }
}

/// The `[loop]` table: what the store starts with.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopDefaults {
    #[serde(default)]
    pub model: ModelSelector,

    #[serde(default)]
    pub system_prompt: Option<String>,

    #[serde(default)]
    pub task: String,

    #[serde(default)]
    pub persistent_memory: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub monitor_command: Option<String>,

    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,

    #[serde(default)]
    pub max_iterations: u64,
}

fn default_interval_ms() -> u64 {
    LoopConfig::default().interval_ms
}

impl Default for LoopDefaults {
    fn default() -> Self {
        Self {
            model: ModelSelector::default(),
            system_prompt: None,
            task: String::new(),
            persistent_memory: String::new(),
            monitor_command: None,
            interval_ms: default_interval_ms(),
            max_iterations: 0,
        }
    }
}

impl LoopDefaults {
    /// Build the initial loop configuration. Working memory starts empty.
    pub fn to_loop_config(&self) -> LoopConfig {
        let base = LoopConfig::default();
        LoopConfig {
            model: self.model.clone(),
            system_prompt: self.system_prompt.clone().unwrap_or(base.system_prompt),
            task: self.task.clone(),
            working_memory: String::new(),
            persistent_memory: self.persistent_memory.clone(),
            monitor_command: self.monitor_command.clone(),
            interval_ms: self.interval_ms,
            max_iterations: self.max_iterations,
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.pulseloop/config.toml).
    ///
    /// Environment variable overrides (highest priority):
    /// - `PULSELOOP_RUNTIME_URL`
    /// - `PULSELOOP_PORT`
    /// - `PULSELOOP_MODEL` (`provider/model`)
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_with_overrides(&Self::config_dir().join("config.toml"))
    }

    /// Load from `path`, then apply environment overrides and validate.
    pub fn load_with_overrides(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load_from(path)?;

        if let Ok(url) = std::env::var("PULSELOOP_RUNTIME_URL") {
            config.runtime.url = url;
        }

        if let Ok(port) = std::env::var("PULSELOOP_PORT") {
            config.server.port = port.parse().map_err(|_| {
                ConfigError::ValidationError(format!("PULSELOOP_PORT is not a port: {port}"))
            })?;
        }

        if let Ok(model) = std::env::var("PULSELOOP_MODEL") {
            config.loop_defaults.model = ModelSelector::parse(&model).ok_or_else(|| {
                ConfigError::ValidationError(format!(
                    "PULSELOOP_MODEL must look like provider/model, got {model}"
                ))
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".pulseloop")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.runtime.url.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "runtime.url must not be empty".into(),
            ));
        }

        if self.runtime.timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "runtime.timeout_secs must be > 0".into(),
            ));
        }

        if self.loop_defaults.interval_ms < MIN_INTERVAL_MS {
            return Err(ConfigError::ValidationError(format!(
                "loop.interval_ms must be at least {MIN_INTERVAL_MS}"
            )));
        }

        self.loop_defaults
            .to_loop_config()
            .validate()
            .map_err(|e| ConfigError::ValidationError(e.to_string()))
    }

    /// Bind address for the HTTP server.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
