//! `pulseloop doctor` - Diagnose configuration and runtime reachability.

use std::path::Path;

pub async fn run(config_path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    println!("PulseLoop Doctor");
    println!("================\n");

    let mut issues = 0;

    let path = super::config_path(config_path);
    if path.exists() {
        println!("  ✅ Config file found at {}", path.display());
    } else {
        println!("  ⚠️  No config file at {}, using defaults", path.display());
    }

    let config = match super::load_config(config_path) {
        Ok(config) => {
            println!("  ✅ Config valid");
            config
        }
        Err(e) => {
            println!("  ❌ Config invalid: {e}");
            println!("\n  ⚠️  1 issue(s) found. See above for details.");
            return Ok(());
        }
    };

    let gateway = match pulseloop_providers::build_from_config(&config) {
        Ok(gateway) => gateway,
        Err(e) => {
            println!("  ❌ Runtime gateway: {e}");
            return Ok(());
        }
    };

    match gateway.health_check().await {
        Ok(true) => println!("  ✅ Runtime reachable at {}", config.runtime.url),
        Ok(false) => {
            println!("  ❌ Runtime at {} answered with an error", config.runtime.url);
            issues += 1;
        }
        Err(e) => {
            println!("  ❌ Runtime unreachable: {e}");
            issues += 1;
        }
    }

    if issues == 0 {
        match gateway.list_models().await {
            Ok(models) if models.is_empty() => {
                println!("  ⚠️  Runtime reports no models");
                issues += 1;
            }
            Ok(models) => {
                println!("  ✅ {} model(s) available", models.len());
                let selected = &config.loop_defaults.model;
                if models
                    .iter()
                    .any(|m| m.provider_id == selected.provider_id && m.model_id == selected.model_id)
                {
                    println!("  ✅ Selected model {selected} is offered");
                } else {
                    println!("  ⚠️  Selected model {selected} is not in the runtime's list");
                    issues += 1;
                }
            }
            Err(e) => {
                println!("  ⚠️  Could not list models: {e}");
                issues += 1;
            }
        }
    }

    println!();
    if issues == 0 {
        println!("  🎉 All checks passed!");
    } else {
        println!("  ⚠️  {issues} issue(s) found. See above for details.");
    }

    Ok(())
}
