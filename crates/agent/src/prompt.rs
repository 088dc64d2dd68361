//! Prompt assembly for one loop iteration.
//!
//! Sections, in this order, each omitted when its source is empty:
//!
//! 1. **Persistent Memory**
//! 2. **Working Memory**
//! 3. **Monitor Output** (fenced)
//! 4. **Previous Response**
//! 5. **Task** (always present)
//!
//! followed by an `[Iteration N]` marker. Sections are separated by a blank
//! line. Assembly is deterministic: the same config and state always yield
//! the same text.

use pulseloop_core::{LoopConfig, RunState};

/// Build the prompt text from the current configuration and run state.
pub fn build_prompt(config: &LoopConfig, state: &RunState) -> String {
    let mut sections: Vec<String> = Vec::with_capacity(6);

    if !config.persistent_memory.is_empty() {
        sections.push(format!("## Persistent Memory\n{}", config.persistent_memory));
    }

    if !config.working_memory.is_empty() {
        sections.push(format!("## Working Memory\n{}", config.working_memory));
    }

    if !state.last_monitor_output.is_empty() {
        sections.push(format!(
            "## Monitor Output\n```\n{}\n```",
            state.last_monitor_output.trim_end()
        ));
    }

    if !state.last_output.is_empty() {
        sections.push(format!("## Previous Response\n{}", state.last_output));
    }

    sections.push(format!("## Task\n{}", config.task));
    sections.push(format!("[Iteration {}]", state.iteration));

    sections.join("\n\n")
}
