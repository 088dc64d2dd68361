//! ShellExecutor trait - runs an external command to completion.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ShellError;

/// Captured output of one command, streams kept separate.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShellOutput {
    pub stdout: String,
    pub stderr: String,
    /// Exit code, `None` when the process was killed by a signal
    #[serde(default)]
    pub exit_code: Option<i32>,
}

impl ShellOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

#[async_trait]
pub trait ShellExecutor: Send + Sync {
    /// Run `command` through the platform shell and wait for it to exit.
    async fn run(&self, command: &str) -> Result<ShellOutput, ShellError>;
}
