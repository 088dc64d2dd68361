//! The PulseLoop agent loop.
//!
//! Each iteration runs the same cycle:
//!
//! 1. **Sample** the monitor command (if any)
//! 2. **Open** a fresh session with the agent runtime
//! 3. **Build** the prompt from memory, monitor output, and the last response
//! 4. **Send** it and record the reply in the bounded history
//! 5. **Clear** working memory, then sleep for the configured interval
//!
//! The loop continues until stopped or the iteration ceiling is reached.

pub mod loop_runner;
pub mod prompt;

pub use loop_runner::{LoopController, LoopPhase, StartOutcome};
pub use prompt::build_prompt;
