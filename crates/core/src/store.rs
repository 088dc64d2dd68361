//! The shared configuration/state store.
//!
//! One `Store` is created at process start and handed out through `Arc`
//! to the loop controller and the request layer. Writes are last-writer-wins;
//! nothing here serializes an external memory update against the loop's
//! prompt build.

use tokio::sync::RwLock;

use crate::error::{Error, Result};
use crate::state::{History, IterationRecord, LoopConfig, RunState, Snapshot};

#[derive(Debug, Default)]
pub struct Store {
    config: RwLock<LoopConfig>,
    state: RwLock<RunState>,
    history: RwLock<History>,
}

impl Store {
    pub fn new(config: LoopConfig) -> Self {
        Self {
            config: RwLock::new(config),
            state: RwLock::new(RunState::default()),
            history: RwLock::new(History::new()),
        }
    }

    pub async fn config(&self) -> LoopConfig {
        self.config.read().await.clone()
    }

    pub async fn state(&self) -> RunState {
        self.state.read().await.clone()
    }

    pub async fn snapshot(&self) -> Snapshot {
        Snapshot {
            config: self.config().await,
            state: self.state().await,
        }
    }

    /// Iteration records, oldest first.
    pub async fn history(&self) -> Vec<IterationRecord> {
        self.history.read().await.to_vec()
    }

    pub async fn history_len(&self) -> usize {
        self.history.read().await.len()
    }

    pub async fn is_running(&self) -> bool {
        self.state.read().await.running
    }

    // ── Configuration writes ──

    /// Deep-merge a JSON object into the current configuration.
    ///
    /// The merged result must deserialize and pass validation, otherwise
    /// the stored configuration is left untouched.
    pub async fn merge_config(&self, patch: &serde_json::Value) -> Result<LoopConfig> {
        if !patch.is_object() {
            return Err(Error::config("config update must be a JSON object"));
        }

        let mut config = self.config.write().await;
        let mut current = serde_json::to_value(&*config)?;
        merge_json(&mut current, patch);

        let updated: LoopConfig = serde_json::from_value(current)
            .map_err(|e| Error::config(format!("invalid config update: {e}")))?;
        updated.validate()?;

        *config = updated.clone();
        Ok(updated)
    }

    pub async fn set_working_memory(&self, content: impl Into<String>) -> LoopConfig {
        let mut config = self.config.write().await;
        config.working_memory = content.into();
        config.clone()
    }

    pub async fn set_persistent_memory(&self, content: impl Into<String>) -> LoopConfig {
        let mut config = self.config.write().await;
        config.persistent_memory = content.into();
        config.clone()
    }

    pub async fn clear_working_memory(&self) -> LoopConfig {
        let mut config = self.config.write().await;
        config.working_memory.clear();
        config.clone()
    }

    // ── Run state writes (loop controller only) ──

    /// Mark a run as started: running, counter at zero, no session.
    pub async fn begin_run(&self) -> RunState {
        let mut state = self.state.write().await;
        state.running = true;
        state.iteration = 0;
        state.session_id = None;
        state.clone()
    }

    pub async fn set_running(&self, running: bool) -> RunState {
        let mut state = self.state.write().await;
        state.running = running;
        state.clone()
    }

    /// Increment the iteration counter and return the new value.
    pub async fn next_iteration(&self) -> u64 {
        let mut state = self.state.write().await;
        state.iteration += 1;
        state.iteration
    }

    pub async fn set_session(&self, session_id: Option<String>) {
        self.state.write().await.session_id = session_id;
    }

    pub async fn set_monitor_output(&self, output: impl Into<String>) {
        self.state.write().await.last_monitor_output = output.into();
    }

    /// Append a successful iteration and make its response the last output.
    pub async fn record_success(&self, record: IterationRecord) {
        self.state.write().await.last_output = record.response.clone();
        self.history.write().await.push(record);
    }
}

/// Recursively merge `patch` into `base`. Objects merge key by key,
/// anything else (including `null`) replaces.
fn merge_json(base: &mut serde_json::Value, patch: &serde_json::Value) {
    if let (serde_json::Value::Object(base_map), serde_json::Value::Object(patch_map)) =
        (base, patch)
    {
        for (key, value) in patch_map {
            if value.is_object() && base_map.get(key).is_some_and(|v| v.is_object()) {
                if let Some(existing) = base_map.get_mut(key) {
                    merge_json(existing, value);
                }
            } else {
                base_map.insert(key.clone(), value.clone());
            }
        }
    }
}
