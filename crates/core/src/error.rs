//! Error types for the PulseLoop domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each external collaborator has its own error enum.

use thiserror::Error;

/// The top-level error type for all PulseLoop operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Agent runtime errors ---
    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    // --- Shell errors ---
    #[error("Shell error: {0}")]
    Shell(#[from] ShellError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Failures reported by the agent runtime gateway.
#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    #[error("Agent runtime unreachable: {0}")]
    Unreachable(String),

    #[error("Runtime request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid runtime response: {0}")]
    InvalidResponse(String),

    #[error("Gateway not configured: {0}")]
    NotConfigured(String),
}

/// Failures launching or running a shell command.
#[derive(Debug, Clone, Error)]
pub enum ShellError {
    #[error("Failed to launch `{command}`: {reason}")]
    LaunchFailed { command: String, reason: String },

    #[error("Empty command")]
    EmptyCommand,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gateway_error_displays_correctly() {
        let err = Error::Gateway(GatewayError::ApiError {
            status_code: 502,
            message: "bad gateway".into(),
        });
        assert!(err.to_string().contains("502"));
        assert!(err.to_string().contains("bad gateway"));
    }

    #[test]
    fn shell_error_displays_correctly() {
        let err = Error::Shell(ShellError::LaunchFailed {
            command: "df -h".into(),
            reason: "No such file or directory".into(),
        });
        assert!(err.to_string().contains("df -h"));
        assert!(err.to_string().contains("No such file"));
    }

    #[test]
    fn config_helper_builds_variant() {
        let err = Error::config("interval too small");
        assert!(matches!(err, Error::Config { .. }));
        assert_eq!(err.to_string(), "Configuration error: interval too small");
    }
}
