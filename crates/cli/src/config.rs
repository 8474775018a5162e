//! Configuration for the CLI
//!
//! Starts from the `QSW_` environment and applies command-line overrides.

use anyhow::{Context, Result};
use switch_lib::QswConfig;

pub fn load(model: Option<String>, endpoint: Option<String>) -> Result<QswConfig> {
    let mut config = QswConfig::load().context("Failed to load QSW_ configuration")?;
    apply_overrides(&mut config, model, endpoint);
    Ok(config)
}

fn apply_overrides(config: &mut QswConfig, model: Option<String>, endpoint: Option<String>) {
    if let Some(model) = model {
        config.model_location = Some(model);
    }
    if let Some(endpoint) = endpoint {
        config.telemetry_endpoint = Some(endpoint);
    }
}
