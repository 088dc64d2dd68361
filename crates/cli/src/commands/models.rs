//! `pulseloop models` - List models offered by the agent runtime.

use std::path::Path;

pub async fn run(config_path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let config =
        super::load_config(config_path).map_err(|e| format!("Failed to load config: {e}"))?;
    let gateway = pulseloop_providers::build_from_config(&config)?;

    let models = match gateway.list_models().await {
        Ok(models) => models,
        Err(e) => {
            tracing::warn!(error = %e, "Listing models failed");
            Vec::new()
        }
    };

    if models.is_empty() {
        println!("No models reported by {}", config.runtime.url);
        return Ok(());
    }

    let width = models
        .iter()
        .map(|m| m.provider_id.len() + m.model_id.len() + 1)
        .max()
        .unwrap_or(0);
    for model in &models {
        let id = format!("{}/{}", model.provider_id, model.model_id);
        println!("  {id:<width$}  {}", model.name);
    }
    println!("\n  {} model(s)", models.len());

    Ok(())
}
