//! Agent runtime gateways for PulseLoop.
//!
//! All gateways implement the `pulseloop_core::AgentGateway` trait.
//! [`build_from_config`] wires the configured runtime.

pub mod opencode;

pub use opencode::OpenCodeGateway;

use pulseloop_core::AgentGateway;
use pulseloop_core::error::GatewayError;
use std::sync::Arc;
use std::time::Duration;

/// Build the runtime gateway described by `[runtime]`.
pub fn build_from_config(
    config: &pulseloop_config::AppConfig,
) -> Result<Arc<dyn AgentGateway>, GatewayError> {
    let runtime = &config.runtime;
    if runtime.url.trim().is_empty() {
        return Err(GatewayError::NotConfigured("runtime.url is empty".into()));
    }

    let mut gateway =
        OpenCodeGateway::new(&runtime.url, Duration::from_secs(runtime.timeout_secs))?;
    if let Some(dir) = &runtime.directory {
        gateway = gateway.with_directory(dir);
    }

    tracing::debug!(url = %gateway.base_url(), "Runtime gateway configured");
    Ok(Arc::new(gateway))
}
