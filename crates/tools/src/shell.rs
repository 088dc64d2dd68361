//! System shell: run a command string through `sh -c` (`cmd /C` on Windows).

use async_trait::async_trait;
use pulseloop_core::error::ShellError;
use pulseloop_core::shell::{ShellExecutor, ShellOutput};
use tokio::process::Command;
use tracing::debug;

/// Runs commands through the platform shell with no timeout.
#[derive(Debug, Clone, Default)]
pub struct SystemShell {
    working_dir: Option<std::path::PathBuf>,
}

impl SystemShell {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run every command from `dir` instead of the process working directory.
    pub fn in_dir(dir: impl Into<std::path::PathBuf>) -> Self {
        Self {
            working_dir: Some(dir.into()),
        }
    }
}

#[async_trait]
impl ShellExecutor for SystemShell {
    async fn run(&self, command: &str) -> Result<ShellOutput, ShellError> {
        if command.trim().is_empty() {
            return Err(ShellError::EmptyCommand);
        }

        debug!(command = %command, "Executing shell command");

        let mut cmd = if cfg!(target_os = "windows") {
            let mut c = Command::new("cmd");
            c.args(["/C", command]);
            c
        } else {
            let mut c = Command::new("sh");
            c.args(["-c", command]);
            c
        };
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }

        let output = cmd.output().await.map_err(|e| ShellError::LaunchFailed {
            command: command.to_string(),
            reason: e.to_string(),
        })?;

        Ok(ShellOutput {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            exit_code: output.status.code(),
        })
    }
}
