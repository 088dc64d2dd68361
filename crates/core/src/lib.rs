//! # PulseLoop Core
//!
//! Domain types, the shared store, the event hub, and the collaborator
//! traits for the PulseLoop agent loop.
//!
//! ## Design Philosophy
//!
//! External collaborators (the agent runtime, the shell) are traits here.
//! Implementations live in their own crates. This enables:
//! - Swapping the agent runtime via configuration
//! - Testing the loop with scripted gateways and shells
//! - A clean dependency graph (all crates depend inward on core)

pub mod error;
pub mod event;
pub mod gateway;
pub mod shell;
pub mod state;
pub mod store;

// Re-export key types at crate root for ergonomics
pub use error::{Error, GatewayError, Result, ShellError};
pub use event::{BroadcastHub, EventFrame, LoopEvent, Subscription};
pub use gateway::{AgentGateway, ModelInfo, PromptRequest, PromptResponse, ResponsePart, SessionInfo};
pub use shell::{ShellExecutor, ShellOutput};
pub use state::{
    HISTORY_LIMIT, History, IterationRecord, LoopConfig, MIN_INTERVAL_MS, ModelSelector, RunState,
    Snapshot,
};
pub use store::Store;
