//! `pulseloop serve` - Start the HTTP control surface.

use std::path::Path;

pub async fn run(
    config_path: Option<&Path>,
    host_override: Option<String>,
    port_override: Option<u16>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut config =
        super::load_config(config_path).map_err(|e| format!("Failed to load config: {e}"))?;

    if let Some(host) = host_override {
        config.server.host = host;
    }
    if let Some(port) = port_override {
        config.server.port = port;
    }

    println!("PulseLoop");
    println!("   Listening: {}", config.bind_addr());
    println!("   Runtime:   {}", config.runtime.url);
    println!("   Model:     {}", config.loop_defaults.model);

    pulseloop_gateway::start(config).await?;

    Ok(())
}
