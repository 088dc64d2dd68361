//! Loop configuration, run state, and iteration history types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::error::{Error, Result};

/// Smallest pacing interval accepted at the configuration boundary.
pub const MIN_INTERVAL_MS: u64 = 1_000;

/// Maximum number of iteration records kept in memory.
pub const HISTORY_LIMIT: usize = 100;

/// Which model the agent runtime should use. Both identifiers are opaque.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSelector {
    pub provider_id: String,
    pub model_id: String,
}

impl ModelSelector {
    pub fn new(provider_id: impl Into<String>, model_id: impl Into<String>) -> Self {
        Self {
            provider_id: provider_id.into(),
            model_id: model_id.into(),
        }
    }

    /// Parse a `provider/model` string. The model part may itself contain `/`.
    pub fn parse(value: &str) -> Option<Self> {
        let (provider, model) = value.split_once('/')?;
        if provider.is_empty() || model.is_empty() {
            return None;
        }
        Some(Self::new(provider, model))
    }
}

impl Default for ModelSelector {
    fn default() -> Self {
        Self::new("anthropic", "claude-sonnet-4-20250514")
    }
}

impl std::fmt::Display for ModelSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.provider_id, self.model_id)
    }
}

/// The mutable loop configuration, replaced or merged by external requests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoopConfig {
    #[serde(default)]
    pub model: ModelSelector,

    /// System instructions sent with every prompt
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,

    /// Fixed per-iteration task text
    #[serde(default)]
    pub task: String,

    /// Notes for the next iteration only; cleared after every iteration
    #[serde(default)]
    pub working_memory: String,

    /// Notes kept across iterations until explicitly replaced
    #[serde(default)]
    pub persistent_memory: String,

    /// Shell command sampled before every prompt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub monitor_command: Option<String>,

    /// Pause between iterations, in milliseconds
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,

    /// Iteration ceiling; 0 = unbounded
    #[serde(default)]
    pub max_iterations: u64,
}

fn default_system_prompt() -> String {
    "You are an autonomous agent running in a continuous loop. \
     Each message gives you your memory, fresh monitor output, and your previous response. \
     Make steady progress on the task."
        .into()
}

fn default_interval_ms() -> u64 {
    5_000
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            model: ModelSelector::default(),
            system_prompt: default_system_prompt(),
            task: String::new(),
            working_memory: String::new(),
            persistent_memory: String::new(),
            monitor_command: None,
            interval_ms: default_interval_ms(),
            max_iterations: 0,
        }
    }
}

impl LoopConfig {
    /// Boundary validation. The loop itself never clamps these values.
    pub fn validate(&self) -> Result<()> {
        if self.interval_ms < MIN_INTERVAL_MS {
            return Err(Error::config(format!(
                "interval_ms must be at least {MIN_INTERVAL_MS} (got {})",
                self.interval_ms
            )));
        }
        if self.model.provider_id.trim().is_empty() || self.model.model_id.trim().is_empty() {
            return Err(Error::config("model provider_id and model_id must be non-empty"));
        }
        Ok(())
    }

    /// The monitor command, if one is set and not blank.
    pub fn monitor(&self) -> Option<&str> {
        self.monitor_command
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
    }
}

/// Run-time state of the loop.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunState {
    pub running: bool,

    /// Iteration counter, reset to 0 at run start
    pub iteration: u64,

    /// Session opened for the current iteration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,

    /// Text of the last successful agent response
    pub last_output: String,

    /// Output (or failure text) of the last monitor execution
    pub last_monitor_output: String,
}

/// One completed iteration. Immutable once recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationRecord {
    pub iteration: u64,
    pub prompt: String,
    pub response: String,
    pub timestamp: DateTime<Utc>,
}

impl IterationRecord {
    pub fn new(iteration: u64, prompt: impl Into<String>, response: impl Into<String>) -> Self {
        Self {
            iteration,
            prompt: prompt.into(),
            response: response.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Insertion-ordered history capped at [`HISTORY_LIMIT`], oldest evicted first.
#[derive(Debug, Clone, Default)]
pub struct History {
    records: VecDeque<IterationRecord>,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, record: IterationRecord) {
        while self.records.len() >= HISTORY_LIMIT {
            self.records.pop_front();
        }
        self.records.push_back(record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &IterationRecord> {
        self.records.iter()
    }

    /// Copy of the records, oldest first.
    pub fn to_vec(&self) -> Vec<IterationRecord> {
        self.records.iter().cloned().collect()
    }
}

/// Configuration and run state captured together.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub config: LoopConfig,
    pub state: RunState,
}
