//! Shell execution and monitoring for PulseLoop.
//!
//! [`SystemShell`] implements `pulseloop_core::ShellExecutor` on top of
//! `tokio::process`; [`MonitorRunner`] turns any executor into the
//! never-failing text sampler the loop needs.

pub mod monitor;
pub mod shell;

pub use monitor::{MONITOR_ERROR_PREFIX, MonitorRunner};
pub use shell::SystemShell;
