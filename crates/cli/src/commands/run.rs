//! `pulseloop run` - Run the loop in the foreground.
//!
//! Every loop event is printed to stdout as one JSON line. The command
//! returns once the loop publishes `stopped`; Ctrl+C requests a stop.

use clap::Args;
use pulseloop_config::{AppConfig, ConfigError};
use pulseloop_agent::LoopController;
use pulseloop_core::{LoopEvent, MIN_INTERVAL_MS, Subscription};
use pulseloop_gateway::ApiState;
use std::future::Future;
use std::io::Write;
use std::path::Path;
use tracing::{info, warn};

#[derive(Args, Debug, Default)]
pub struct RunArgs {
    /// Task text for every iteration
    #[arg(short, long)]
    pub task: Option<String>,

    /// Stop after this many iterations (0 = run until stopped)
    #[arg(short = 'n', long)]
    pub max_iterations: Option<u64>,

    /// Pause between iterations, in milliseconds
    #[arg(short, long)]
    pub interval_ms: Option<u64>,

    /// Shell command sampled before each prompt
    #[arg(short, long)]
    pub monitor: Option<String>,
}

impl RunArgs {
    /// Fold the flags into the `[loop]` table and re-validate.
    pub fn apply(&self, config: &mut AppConfig) -> Result<(), ConfigError> {
        if let Some(task) = &self.task {
            config.loop_defaults.task = task.clone();
        }
        if let Some(max) = self.max_iterations {
            config.loop_defaults.max_iterations = max;
        }
        if let Some(interval) = self.interval_ms {
            if interval < MIN_INTERVAL_MS {
                return Err(ConfigError::ValidationError(format!(
                    "--interval-ms must be at least {MIN_INTERVAL_MS}"
                )));
            }
            config.loop_defaults.interval_ms = interval;
        }
        if let Some(monitor) = &self.monitor {
            config.loop_defaults.monitor_command = Some(monitor.clone());
        }
        config.validate()
    }
}

pub async fn run(
    config_path: Option<&Path>,
    args: RunArgs,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut config =
        super::load_config(config_path).map_err(|e| format!("Failed to load config: {e}"))?;
    args.apply(&mut config)?;

    let state = ApiState::from_config(&config)?;
    let controller = state.controller;
    let mut subscription = state.hub.subscribe().await;

    let outcome = controller.start().await;
    if let pulseloop_agent::StartOutcome::Aborted(reason) = outcome {
        return Err(format!("Loop did not start: {reason}").into());
    }
    info!(
        runtime = %config.runtime.url,
        max_iterations = config.loop_defaults.max_iterations,
        "Running headless"
    );

    follow(
        &controller,
        &mut subscription,
        &mut std::io::stdout(),
        tokio::signal::ctrl_c(),
    )
    .await
}

/// Print events as JSON lines until the loop publishes `stopped`.
///
/// `interrupt` resolving requests a stop. If the hub drops this subscriber
/// the loop is stopped too, since nothing would be left to report on it.
async fn follow<W, F, T>(
    controller: &LoopController,
    subscription: &mut Subscription,
    out: &mut W,
    interrupt: F,
) -> Result<(), Box<dyn std::error::Error>>
where
    W: Write,
    F: Future<Output = T>,
{
    tokio::pin!(interrupt);
    let mut interrupted = false;

    loop {
        tokio::select! {
            event = subscription.recv_event() => {
                let Some(event) = event else {
                    warn!("Event stream dropped, stopping the loop");
                    controller.stop().await;
                    break;
                };
                writeln!(out, "{}", serde_json::to_string(&event)?)?;
                if event == LoopEvent::Stopped {
                    break;
                }
            }
            _ = &mut interrupt, if !interrupted => {
                interrupted = true;
                info!("Interrupted, stopping after the current step");
                controller.stop().await;
            }
        }
    }

    controller.join().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use pulseloop_core::error::{GatewayError, ShellError};
    use pulseloop_core::{
        AgentGateway, BroadcastHub, LoopConfig, PromptRequest, PromptResponse, ResponsePart,
        SessionInfo, ShellExecutor, ShellOutput, Store,
    };
    use std::sync::Arc;

    struct AlwaysUp;

    #[async_trait]
    impl AgentGateway for AlwaysUp {
        fn name(&self) -> &str {
            "always-up"
        }

        async fn create_session(&self) -> Result<SessionInfo, GatewayError> {
            Ok(SessionInfo { id: "ses".into() })
        }

        async fn prompt(&self, _request: PromptRequest) -> Result<PromptResponse, GatewayError> {
            Ok(PromptResponse {
                parts: vec![ResponsePart::text("ok")],
            })
        }

        async fn health_check(&self) -> Result<bool, GatewayError> {
            Ok(true)
        }
    }

    struct Quiet;

    #[async_trait]
    impl ShellExecutor for Quiet {
        async fn run(&self, _command: &str) -> Result<ShellOutput, ShellError> {
            Ok(ShellOutput {
                stdout: String::new(),
                stderr: String::new(),
                exit_code: Some(0),
            })
        }
    }

    fn unbounded_controller() -> Arc<LoopController> {
        let store = Arc::new(Store::new(LoopConfig {
            task: "watch".into(),
            interval_ms: 1_000,
            max_iterations: 0,
            ..LoopConfig::default()
        }));
        let hub = Arc::new(BroadcastHub::new(Arc::clone(&store)));
        Arc::new(LoopController::new(
            store,
            hub,
            Arc::new(AlwaysUp),
            Arc::new(Quiet),
        ))
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_stream_stops_an_unbounded_run() {
        let controller = unbounded_controller();
        let mut subscription = controller.hub().subscribe().await;
        assert!(controller.start().await.started());

        // Simulate the hub discarding a lagging observer.
        controller.hub().unsubscribe(subscription.id());

        let mut out = Vec::new();
        follow(
            &controller,
            &mut subscription,
            &mut out,
            std::future::pending::<()>(),
        )
        .await
        .unwrap();

        assert!(!controller.store().is_running().await);
        assert_eq!(controller.phase(), pulseloop_agent::LoopPhase::Idle);
        let printed = String::from_utf8(out).unwrap();
        assert!(printed.starts_with(r#"{"type":"connected""#));
    }

    #[tokio::test(start_paused = true)]
    async fn interrupt_stops_and_prints_stopped_last() {
        let controller = unbounded_controller();
        let mut subscription = controller.hub().subscribe().await;
        assert!(controller.start().await.started());

        let mut out = Vec::new();
        follow(
            &controller,
            &mut subscription,
            &mut out,
            tokio::time::sleep(std::time::Duration::from_millis(2_500)),
        )
        .await
        .unwrap();

        let printed = String::from_utf8(out).unwrap();
        let last = printed.lines().last().unwrap();
        assert_eq!(last, r#"{"type":"stopped"}"#);
        assert!(!controller.store().is_running().await);
    }

    #[test]
    fn flags_override_loop_table() {
        let mut config = AppConfig::default();
        let args = RunArgs {
            task: Some("summarize the logs".into()),
            max_iterations: Some(5),
            interval_ms: Some(2_000),
            monitor: Some("tail -n 20 app.log".into()),
        };
        args.apply(&mut config).unwrap();

        assert_eq!(config.loop_defaults.task, "summarize the logs");
        assert_eq!(config.loop_defaults.max_iterations, 5);
        assert_eq!(config.loop_defaults.interval_ms, 2_000);
        assert_eq!(
            config.loop_defaults.monitor_command.as_deref(),
            Some("tail -n 20 app.log")
        );
    }

    #[test]
    fn sub_second_interval_flag_rejected() {
        let mut config = AppConfig::default();
        let args = RunArgs {
            interval_ms: Some(10),
            ..RunArgs::default()
        };
        assert!(args.apply(&mut config).is_err());
        assert_eq!(config.loop_defaults.interval_ms, 5_000);
    }
}
