//! `pulseloop status` - Show the effective configuration.

use pulseloop_config::AppConfig;
use std::path::Path;

pub async fn run(config_path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let config =
        super::load_config(config_path).map_err(|e| format!("Failed to load config: {e}"))?;
    let path = super::config_path(config_path);

    let loop_cfg = &config.loop_defaults;
    println!("PulseLoop Status");
    println!("================");
    println!("  Config file:  {}", path.display());
    println!("  Server:       {}", config.bind_addr());
    println!("  Runtime:      {}", config.runtime.url);
    if let Some(dir) = &config.runtime.directory {
        println!("  Directory:    {dir}");
    }
    println!("  Timeout:      {}s", config.runtime.timeout_secs);
    println!("  Model:        {}", loop_cfg.model);
    println!("  Interval:     {}ms", loop_cfg.interval_ms);
    println!(
        "  Iterations:   {}",
        if loop_cfg.max_iterations == 0 {
            "unbounded".to_string()
        } else {
            loop_cfg.max_iterations.to_string()
        }
    );
    println!(
        "  Monitor:      {}",
        loop_cfg.monitor_command.as_deref().unwrap_or("(none)")
    );

    if path.exists() {
        println!("\n  ✅ Config file found");
        println!("\n{}", toml::to_string_pretty(&config)?);
    } else {
        println!("\n  ⚠️  No config file, using defaults. Save this as a starting point:\n");
        println!("{}", AppConfig::default_toml());
    }

    Ok(())
}
