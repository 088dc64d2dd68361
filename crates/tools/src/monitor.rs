//! Monitor runner: samples an external command once per iteration.
//!
//! The result is always text. A launch failure or a non-zero exit becomes
//! an error line that the loop feeds into the next prompt like any other
//! output.

use pulseloop_core::shell::ShellExecutor;
use std::sync::Arc;
use tracing::{debug, warn};

/// Prefix of the text produced when the command cannot run or fails.
pub const MONITOR_ERROR_PREFIX: &str = "Error: failed to run monitor command";

#[derive(Clone)]
pub struct MonitorRunner {
    shell: Arc<dyn ShellExecutor>,
}

impl MonitorRunner {
    pub fn new(shell: Arc<dyn ShellExecutor>) -> Self {
        Self { shell }
    }

    /// Run `command` to completion and return its combined output.
    ///
    /// stdout comes first; a `[stderr]` block follows only when stderr is
    /// non-empty. A non-zero exit puts an error line in front of both.
    pub async fn run(&self, command: &str) -> String {
        match self.shell.run(command).await {
            Ok(output) => {
                let mut blocks: Vec<String> = Vec::with_capacity(3);
                if !output.success() {
                    warn!(command = %command, exit_code = ?output.exit_code, "Monitor command exited non-zero");
                    let status = match output.exit_code {
                        Some(code) => format!("exited with code {code}"),
                        None => "terminated by signal".to_string(),
                    };
                    blocks.push(format!("{MONITOR_ERROR_PREFIX}: {status}"));
                }
                if !output.stdout.is_empty() {
                    blocks.push(output.stdout);
                }
                if !output.stderr.is_empty() {
                    blocks.push(format!("[stderr]\n{}", output.stderr));
                }
                let text = blocks.join("\n\n");
                debug!(command = %command, bytes = text.len(), "Monitor sampled");
                text
            }
            Err(e) => {
                warn!(command = %command, error = %e, "Monitor command failed");
                format!("{MONITOR_ERROR_PREFIX}: {e}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use pulseloop_core::error::ShellError;
    use pulseloop_core::shell::ShellOutput;

    struct FixedShell(Result<ShellOutput, ShellError>);

    #[async_trait]
    impl ShellExecutor for FixedShell {
        async fn run(&self, _command: &str) -> Result<ShellOutput, ShellError> {
            self.0.clone()
        }
    }

    fn runner(result: Result<ShellOutput, ShellError>) -> MonitorRunner {
        MonitorRunner::new(Arc::new(FixedShell(result)))
    }

    #[tokio::test]
    async fn stdout_only() {
        let monitor = runner(Ok(ShellOutput {
            stdout: "load average: 0.1".into(),
            stderr: String::new(),
            exit_code: Some(0),
        }));
        assert_eq!(monitor.run("uptime").await, "load average: 0.1");
    }

    #[tokio::test]
    async fn stderr_block_appended() {
        let monitor = runner(Ok(ShellOutput {
            stdout: "partial".into(),
            stderr: "warning: disk".into(),
            exit_code: Some(0),
        }));
        assert_eq!(
            monitor.run("df").await,
            "partial\n\n[stderr]\nwarning: disk"
        );
    }

    #[tokio::test]
    async fn stderr_only_has_no_leading_blank_line() {
        let monitor = runner(Ok(ShellOutput {
            stdout: String::new(),
            stderr: "deprecated flag".into(),
            exit_code: Some(0),
        }));
        assert_eq!(monitor.run("tool").await, "[stderr]\ndeprecated flag");
    }

    #[tokio::test]
    async fn non_zero_exit_leads_with_error_line() {
        let monitor = runner(Ok(ShellOutput {
            stdout: "partial".into(),
            stderr: "warning: disk".into(),
            exit_code: Some(1),
        }));
        assert_eq!(
            monitor.run("df").await,
            format!("{MONITOR_ERROR_PREFIX}: exited with code 1\n\npartial\n\n[stderr]\nwarning: disk")
        );
    }

    #[tokio::test]
    async fn killed_by_signal_is_an_error() {
        let monitor = runner(Ok(ShellOutput {
            stdout: String::new(),
            stderr: String::new(),
            exit_code: None,
        }));
        let text = monitor.run("sleep 100").await;
        assert!(text.starts_with(MONITOR_ERROR_PREFIX));
        assert!(text.contains("signal"));
    }

    #[tokio::test]
    async fn launch_failure_becomes_text() {
        let monitor = runner(Err(ShellError::LaunchFailed {
            command: "nope".into(),
            reason: "not found".into(),
        }));
        let text = monitor.run("nope").await;
        assert!(text.starts_with(MONITOR_ERROR_PREFIX));
        assert!(text.contains("not found"));
    }

    #[tokio::test]
    async fn real_shell_end_to_end() {
        let monitor = MonitorRunner::new(Arc::new(crate::SystemShell::new()));
        assert!(monitor.run("echo sampled").await.contains("sampled"));
    }

    #[tokio::test]
    async fn real_shell_exit_code_reported() {
        let monitor = MonitorRunner::new(Arc::new(crate::SystemShell::new()));
        let text = monitor.run("exit 7").await;
        assert!(text.starts_with(MONITOR_ERROR_PREFIX));
        assert!(text.contains("exited with code 7"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn real_shell_missing_binary_reported() {
        let monitor = MonitorRunner::new(Arc::new(crate::SystemShell::new()));
        let text = monitor.run("pulseloop_no_such_binary_xyz").await;
        assert!(text.starts_with(MONITOR_ERROR_PREFIX));
        assert!(text.contains("[stderr]\n"));
        assert!(text.contains("pulseloop_no_such_binary_xyz"));
    }
}
