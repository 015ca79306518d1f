//! CLI command implementations.

pub mod list;
pub mod synth;

use anyhow::{Context, Result};
use pipestack_config::{AppConfig, VariableContext, parse_app_config};
use pipestack_stacks::App;
use std::path::Path;
use tracing::debug;

/// Read the application configuration, interpolating process environment
/// variables.
pub async fn load_config(path: &Path) -> Result<AppConfig> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;
    let vars = VariableContext::from_process_env();
    let config = parse_app_config(&content, &vars)
        .with_context(|| format!("invalid configuration in {}", path.display()))?;
    debug!(app = %config.name, services = config.services.len(), "Loaded configuration");
    Ok(config)
}

pub async fn validate(path: &Path) -> Result<()> {
    let config = load_config(path).await?;
    let assembly = App::from_config(&config)?.synth()?;
    println!(
        "Configuration is valid: {} stacks for {}",
        assembly.stacks.len(),
        config.environment()
    );
    Ok(())
}
