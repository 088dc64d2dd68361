//! The loop controller: drives one iteration after another against the
//! agent runtime until stopped or the iteration ceiling is reached.
//!
//! Lifecycle: `Idle -> Starting -> Running -> Stopping -> Idle`. `Starting`
//! covers the runtime health check; if it fails the controller goes straight
//! back to `Idle` and publishes an error instead of running. A stop that
//! lands during the health check is held and honoured once it returns.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use pulseloop_core::{
    AgentGateway, BroadcastHub, IterationRecord, LoopEvent, PromptRequest, ShellExecutor, Store,
};
use pulseloop_tools::MonitorRunner;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::prompt::build_prompt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopPhase {
    Idle,
    Starting,
    Running,
    Stopping,
}

/// Result of a start request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    /// A run is already active (or starting/stopping); nothing changed.
    AlreadyRunning,
    /// The runtime could not be reached; the loop never entered `Running`.
    Aborted(String),
    /// A stop arrived while the runtime health check was pending.
    Cancelled,
}

impl StartOutcome {
    pub fn started(&self) -> bool {
        matches!(self, Self::Started)
    }
}

pub struct LoopController {
    store: Arc<Store>,
    hub: Arc<BroadcastHub>,
    gateway: Arc<dyn AgentGateway>,
    monitor: MonitorRunner,
    phase: Mutex<LoopPhase>,
    cancel: Mutex<CancellationToken>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl LoopController {
    pub fn new(
        store: Arc<Store>,
        hub: Arc<BroadcastHub>,
        gateway: Arc<dyn AgentGateway>,
        shell: Arc<dyn ShellExecutor>,
    ) -> Self {
        Self {
            store,
            hub,
            gateway,
            monitor: MonitorRunner::new(shell),
            phase: Mutex::new(LoopPhase::Idle),
            cancel: Mutex::new(CancellationToken::new()),
            task: Mutex::new(None),
        }
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub fn hub(&self) -> &Arc<BroadcastHub> {
        &self.hub
    }

    pub fn phase(&self) -> LoopPhase {
        *lock(&self.phase)
    }

    /// Start a run in the background. Returns once the loop task is spawned.
    pub async fn start(self: &Arc<Self>) -> StartOutcome {
        {
            let mut phase = lock(&self.phase);
            if *phase != LoopPhase::Idle {
                debug!(phase = ?*phase, "Start ignored, loop not idle");
                return StartOutcome::AlreadyRunning;
            }
            *phase = LoopPhase::Starting;
        }

        let reachable = match self.gateway.health_check().await {
            Ok(true) => Ok(()),
            Ok(false) => Err(format!(
                "Agent runtime '{}' is not healthy",
                self.gateway.name()
            )),
            Err(e) => Err(e.to_string()),
        };
        if let Err(message) = reachable {
            warn!(error = %message, "Loop start aborted");
            *lock(&self.phase) = LoopPhase::Idle;
            self.hub.publish(&LoopEvent::error(message.clone(), None));
            return StartOutcome::Aborted(message);
        }

        let token = CancellationToken::new();
        *lock(&self.cancel) = token.clone();

        {
            let mut phase = lock(&self.phase);
            if *phase == LoopPhase::Stopping {
                *phase = LoopPhase::Idle;
                drop(phase);
                info!("Loop start cancelled by stop request");
                self.hub.publish(&LoopEvent::Stopped);
                return StartOutcome::Cancelled;
            }
            *phase = LoopPhase::Running;
        }

        let state = self.store.begin_run().await;
        self.hub.publish(&LoopEvent::State { state });

        let controller = Arc::clone(self);
        let handle = tokio::spawn(async move { controller.run(token).await });
        *lock(&self.task) = Some(handle);

        info!(runtime = self.gateway.name(), "Loop started");
        StartOutcome::Started
    }

    /// Signal the active run to stop. Does not wait for it; see [`join`](Self::join).
    ///
    /// Takes effect at the next iteration boundary or during the pacing
    /// sleep. An in-flight agent call or monitor command is not interrupted.
    /// During `Starting` the request is held until the health check returns.
    pub async fn stop(&self) -> bool {
        {
            let mut phase = lock(&self.phase);
            match *phase {
                LoopPhase::Running => *phase = LoopPhase::Stopping,
                LoopPhase::Starting => {
                    *phase = LoopPhase::Stopping;
                    info!("Loop stop requested during start");
                    return true;
                }
                LoopPhase::Idle | LoopPhase::Stopping => return false,
            }
        }
        self.store.set_running(false).await;
        lock(&self.cancel).cancel();
        info!("Loop stop requested");
        true
    }

    /// Wait for the background task, if any, to finish.
    pub async fn join(&self) {
        let handle = lock(&self.task).take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "Loop task ended abnormally");
            }
        }
    }

    async fn run(self: Arc<Self>, token: CancellationToken) {
        loop {
            if token.is_cancelled() || !self.store.is_running().await {
                break;
            }

            let config = self.store.config().await;
            let done = self.store.state().await.iteration;
            if config.max_iterations > 0 && done >= config.max_iterations {
                info!(iterations = done, "Iteration ceiling reached");
                break;
            }

            self.iterate().await;

            if token.is_cancelled() {
                break;
            }
            let interval = Duration::from_millis(self.store.config().await.interval_ms);
            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
        }

        self.finish().await;
    }

    async fn finish(&self) {
        self.store.set_running(false).await;
        *lock(&self.phase) = LoopPhase::Idle;
        self.hub.publish(&LoopEvent::Stopped);
        info!("Loop stopped");
    }

    /// One full iteration: monitor, session, prompt, record, clear.
    async fn iterate(&self) {
        let iteration = self.store.next_iteration().await;
        self.hub.publish(&LoopEvent::Iteration { iteration });
        debug!(iteration, "Iteration started");

        let config = self.store.config().await;
        if let Some(command) = config.monitor() {
            let output = self.monitor.run(command).await;
            self.store.set_monitor_output(output.clone()).await;
            self.hub.publish(&LoopEvent::Monitor { output });
        }

        match self.gateway.create_session().await {
            Ok(session) => {
                debug!(iteration, session_id = %session.id, "Session opened");
                self.store.set_session(Some(session.id.clone())).await;
                self.dispatch(iteration, session.id).await;
            }
            Err(e) => {
                warn!(iteration, error = %e, "Session creation failed");
                self.hub.publish(&LoopEvent::error(
                    format!("Failed to create session: {e}"),
                    Some(iteration),
                ));
            }
        }

        let config = self.store.clear_working_memory().await;
        self.hub.publish(&LoopEvent::Config { config });
        let state = self.store.state().await;
        self.hub.publish(&LoopEvent::State { state });
    }

    async fn dispatch(&self, iteration: u64, session_id: String) {
        let config = self.store.config().await;
        let state = self.store.state().await;
        let prompt = build_prompt(&config, &state);
        self.hub.publish(&LoopEvent::Prompt {
            prompt: prompt.clone(),
            iteration,
        });

        let request = PromptRequest {
            session_id,
            model: config.model,
            system: config.system_prompt,
            text: prompt.clone(),
        };

        match self.gateway.prompt(request).await {
            Ok(reply) => {
                let response = reply.text();
                debug!(iteration, chars = response.len(), "Response received");
                self.store
                    .record_success(IterationRecord::new(iteration, prompt, response.clone()))
                    .await;
                self.hub.publish(&LoopEvent::Response {
                    response,
                    iteration,
                });
            }
            Err(e) => {
                warn!(iteration, error = %e, "Prompt dispatch failed");
                self.hub
                    .publish(&LoopEvent::error(format!("Prompt failed: {e}"), Some(iteration)));
            }
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use pulseloop_core::error::{GatewayError, ShellError};
    use pulseloop_core::{
        HISTORY_LIMIT, LoopConfig, PromptResponse, ResponsePart, SessionInfo, ShellOutput,
        Subscription,
    };
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Scripted runtime that counts calls and can be told to fail.
    #[derive(Default)]
    struct ScriptedGateway {
        unhealthy: bool,
        fail_session: bool,
        fail_prompt: bool,
        health_delay: Option<Duration>,
        sessions: AtomicUsize,
        prompts: Mutex<Vec<PromptRequest>>,
    }

    #[async_trait]
    impl AgentGateway for ScriptedGateway {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn create_session(&self) -> Result<SessionInfo, GatewayError> {
            if self.fail_session {
                return Err(GatewayError::Network("connection reset".into()));
            }
            let n = self.sessions.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(SessionInfo {
                id: format!("ses_{n}"),
            })
        }

        async fn prompt(&self, request: PromptRequest) -> Result<PromptResponse, GatewayError> {
            let n = {
                let mut prompts = self.prompts.lock().unwrap();
                prompts.push(request);
                prompts.len()
            };
            if self.fail_prompt {
                return Err(GatewayError::ApiError {
                    status_code: 500,
                    message: "model overloaded".into(),
                });
            }
            Ok(PromptResponse {
                parts: vec![
                    ResponsePart::text(format!("reply {n}")),
                    ResponsePart::other("tool"),
                ],
            })
        }

        async fn health_check(&self) -> Result<bool, GatewayError> {
            if let Some(delay) = self.health_delay {
                tokio::time::sleep(delay).await;
            }
            Ok(!self.unhealthy)
        }
    }

    struct EchoShell;

    #[async_trait]
    impl ShellExecutor for EchoShell {
        async fn run(&self, command: &str) -> Result<ShellOutput, ShellError> {
            Ok(ShellOutput {
                stdout: format!("ran {command}"),
                stderr: String::new(),
                exit_code: Some(0),
            })
        }
    }

    fn controller(config: LoopConfig, gateway: Arc<ScriptedGateway>) -> Arc<LoopController> {
        let store = Arc::new(Store::new(config));
        let hub = Arc::new(BroadcastHub::new(Arc::clone(&store)));
        Arc::new(LoopController::new(store, hub, gateway, Arc::new(EchoShell)))
    }

    fn bounded(max_iterations: u64) -> LoopConfig {
        LoopConfig {
            task: "watch".into(),
            interval_ms: 1_000,
            max_iterations,
            ..LoopConfig::default()
        }
    }

    /// Close the subscription and collect everything queued on it.
    async fn drain(hub: &BroadcastHub, mut sub: Subscription) -> Vec<LoopEvent> {
        hub.unsubscribe(sub.id());
        let mut events = Vec::new();
        while let Some(event) = sub.recv_event().await {
            events.push(event);
        }
        events
    }

    async fn wait_for(sub: &mut Subscription, pred: impl Fn(&LoopEvent) -> bool) -> LoopEvent {
        loop {
            let event = sub.recv_event().await.expect("stream closed");
            if pred(&event) {
                return event;
            }
        }
    }

    fn count(events: &[LoopEvent], kind: &str) -> usize {
        events.iter().filter(|e| e.event_type() == kind).count()
    }

    #[tokio::test(start_paused = true)]
    async fn bounded_run_completes_exactly_n_iterations() {
        let gateway = Arc::new(ScriptedGateway::default());
        let ctl = controller(bounded(3), Arc::clone(&gateway));
        let sub = ctl.hub().subscribe().await;

        assert_eq!(ctl.start().await, StartOutcome::Started);
        ctl.join().await;

        let events = drain(ctl.hub(), sub).await;
        assert_eq!(count(&events, "iteration"), 3);
        assert_eq!(count(&events, "response"), 3);
        assert_eq!(count(&events, "stopped"), 1);
        assert_eq!(events.last(), Some(&LoopEvent::Stopped));

        assert_eq!(ctl.phase(), LoopPhase::Idle);
        assert!(!ctl.store().is_running().await);
        assert_eq!(ctl.store().history_len().await, 3);
        assert_eq!(gateway.sessions.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn event_order_within_an_iteration() {
        let config = LoopConfig {
            monitor_command: Some("uptime".into()),
            ..bounded(1)
        };
        let ctl = controller(config, Arc::new(ScriptedGateway::default()));
        let sub = ctl.hub().subscribe().await;

        ctl.start().await;
        ctl.join().await;

        let kinds: Vec<&str> = drain(ctl.hub(), sub)
            .await
            .iter()
            .map(|e| e.event_type())
            .collect();
        assert_eq!(
            kinds,
            vec![
                "connected",
                "state",
                "iteration",
                "monitor",
                "prompt",
                "response",
                "config",
                "state",
                "stopped"
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn unbounded_run_keeps_going_until_stopped() {
        let ctl = controller(bounded(0), Arc::new(ScriptedGateway::default()));
        let mut sub = ctl.hub().subscribe().await;

        ctl.start().await;
        wait_for(&mut sub, |e| matches!(e, LoopEvent::Response { iteration: 3, .. })).await;
        assert!(ctl.store().is_running().await);

        assert!(ctl.stop().await);
        ctl.join().await;

        let rest = drain(ctl.hub(), sub).await;
        assert_eq!(count(&rest, "stopped"), 1);
        assert!(!ctl.store().is_running().await);
    }

    #[tokio::test(start_paused = true)]
    async fn history_keeps_the_latest_hundred() {
        let ctl = controller(
            bounded(HISTORY_LIMIT as u64 + 1),
            Arc::new(ScriptedGateway::default()),
        );
        ctl.start().await;
        ctl.join().await;

        let history = ctl.store().history().await;
        assert_eq!(history.len(), HISTORY_LIMIT);
        assert!(history.iter().all(|r| r.iteration != 1));
        assert_eq!(history.last().unwrap().iteration, HISTORY_LIMIT as u64 + 1);
        assert_eq!(history.last().unwrap().response, "reply 101");
    }

    #[tokio::test(start_paused = true)]
    async fn stop_during_sleep_prevents_next_iteration() {
        let config = LoopConfig {
            interval_ms: 60_000,
            ..bounded(0)
        };
        let ctl = controller(config, Arc::new(ScriptedGateway::default()));
        let mut sub = ctl.hub().subscribe().await;

        ctl.start().await;
        wait_for(&mut sub, |e| matches!(e, LoopEvent::State { state } if state.iteration == 1))
            .await;
        ctl.stop().await;
        ctl.join().await;

        let rest = drain(ctl.hub(), sub).await;
        assert_eq!(count(&rest, "iteration"), 0);
        assert_eq!(rest.last(), Some(&LoopEvent::Stopped));
        assert_eq!(ctl.store().state().await.iteration, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn second_start_is_a_no_op() {
        let gateway = Arc::new(ScriptedGateway::default());
        let ctl = controller(bounded(2), Arc::clone(&gateway));

        assert!(ctl.start().await.started());
        assert_eq!(ctl.start().await, StartOutcome::AlreadyRunning);
        ctl.join().await;

        assert_eq!(gateway.sessions.load(Ordering::SeqCst), 2);
        assert_eq!(ctl.store().state().await.iteration, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn prompt_failure_still_clears_working_memory() {
        let gateway = Arc::new(ScriptedGateway {
            fail_prompt: true,
            ..ScriptedGateway::default()
        });
        let ctl = controller(bounded(1), gateway);
        ctl.store().set_working_memory("look at the flaky test").await;
        let sub = ctl.hub().subscribe().await;

        ctl.start().await;
        ctl.join().await;

        assert!(ctl.store().config().await.working_memory.is_empty());
        assert_eq!(ctl.store().history_len().await, 0);

        let events = drain(ctl.hub(), sub).await;
        assert!(events.iter().any(|e| matches!(
            e,
            LoopEvent::Error { iteration: Some(1), message } if message.contains("overloaded")
        )));
    }

    #[tokio::test(start_paused = true)]
    async fn session_failure_skips_iteration() {
        let gateway = Arc::new(ScriptedGateway {
            fail_session: true,
            ..ScriptedGateway::default()
        });
        let ctl = controller(bounded(2), Arc::clone(&gateway));
        ctl.store().set_working_memory("one-shot note").await;
        let sub = ctl.hub().subscribe().await;

        ctl.start().await;
        ctl.join().await;

        let events = drain(ctl.hub(), sub).await;
        assert_eq!(count(&events, "error"), 2);
        assert_eq!(count(&events, "prompt"), 0);
        assert!(gateway.prompts.lock().unwrap().is_empty());
        assert_eq!(ctl.store().history_len().await, 0);
        assert!(ctl.store().config().await.working_memory.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn unreachable_runtime_aborts_start() {
        let gateway = Arc::new(ScriptedGateway {
            unhealthy: true,
            ..ScriptedGateway::default()
        });
        let ctl = controller(bounded(1), gateway);
        let sub = ctl.hub().subscribe().await;

        assert!(matches!(ctl.start().await, StartOutcome::Aborted(_)));
        assert_eq!(ctl.phase(), LoopPhase::Idle);
        assert!(!ctl.store().is_running().await);
        assert!(!ctl.stop().await);

        let events = drain(ctl.hub(), sub).await;
        assert_eq!(count(&events, "error"), 1);
        assert_eq!(count(&events, "stopped"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_during_slow_health_check_prevents_the_run() {
        let gateway = Arc::new(ScriptedGateway {
            health_delay: Some(Duration::from_secs(5)),
            ..ScriptedGateway::default()
        });
        let ctl = controller(bounded(1), Arc::clone(&gateway));
        let sub = ctl.hub().subscribe().await;

        let starter = Arc::clone(&ctl);
        let pending = tokio::spawn(async move { starter.start().await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(ctl.phase(), LoopPhase::Starting);

        assert!(ctl.stop().await);
        assert_eq!(pending.await.unwrap(), StartOutcome::Cancelled);
        ctl.join().await;

        assert_eq!(ctl.phase(), LoopPhase::Idle);
        assert!(!ctl.store().is_running().await);
        assert_eq!(ctl.store().state().await.iteration, 0);
        assert_eq!(gateway.sessions.load(Ordering::SeqCst), 0);

        let events = drain(ctl.hub(), sub).await;
        assert_eq!(count(&events, "iteration"), 0);
        assert_eq!(count(&events, "stopped"), 1);

        // The held stop is consumed; the next start runs normally.
        assert!(ctl.start().await.started());
        ctl.join().await;
        assert_eq!(ctl.store().history_len().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn prompt_carries_memory_monitor_and_previous_response() {
        let gateway = Arc::new(ScriptedGateway::default());
        let config = LoopConfig {
            persistent_memory: "repo is a monorepo".into(),
            monitor_command: Some("git status".into()),
            ..bounded(2)
        };
        let ctl = controller(config, Arc::clone(&gateway));
        ctl.store().set_working_memory("first pass only").await;

        ctl.start().await;
        ctl.join().await;

        let prompts = gateway.prompts.lock().unwrap();
        assert_eq!(prompts[0].session_id, "ses_1");
        assert_eq!(prompts[1].session_id, "ses_2");
        assert!(prompts[0].text.contains("first pass only"));
        assert!(prompts[0].text.contains("ran git status"));
        assert!(!prompts[0].text.contains("Previous Response"));

        assert!(!prompts[1].text.contains("first pass only"));
        assert!(prompts[1].text.contains("repo is a monorepo"));
        assert!(prompts[1].text.contains("## Previous Response\nreply 1"));
        assert!(prompts[1].text.ends_with("[Iteration 2]"));
        assert_eq!(prompts[1].system, LoopConfig::default().system_prompt);
    }

    #[tokio::test(start_paused = true)]
    async fn restart_after_stop_resets_counter() {
        let ctl = controller(bounded(1), Arc::new(ScriptedGateway::default()));
        ctl.start().await;
        ctl.join().await;
        assert_eq!(ctl.store().state().await.iteration, 1);

        assert!(ctl.start().await.started());
        ctl.join().await;
        assert_eq!(ctl.store().state().await.iteration, 1);
        assert_eq!(ctl.store().history_len().await, 2);
    }
}
