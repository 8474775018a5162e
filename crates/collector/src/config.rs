//! Collector configuration

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::PathBuf;

/// Read from `COLLECTOR_`-prefixed environment variables
#[derive(Debug, Clone, Deserialize)]
pub struct CollectorConfig {
    /// Port for the ingest, health and metrics API
    #[serde(default = "default_port")]
    pub port: u16,

    /// JSON-lines file receiving one line per switch record
    #[serde(default = "default_data_file")]
    pub data_file: PathBuf,

    /// Upper bound on a request body in bytes
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

fn default_port() -> u16 {
    8080
}

fn default_data_file() -> PathBuf {
    PathBuf::from("telemetry.jsonl")
}

fn default_max_body_bytes() -> usize {
    4 * 1024 * 1024
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            data_file: default_data_file(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

impl CollectorConfig {
    pub fn load() -> Result<Self> {
        Self::from_env(config::Environment::with_prefix("COLLECTOR"))
    }

    fn from_env(env: config::Environment) -> Result<Self> {
        config::Config::builder()
            .add_source(env.try_parsing(true))
            .build()
            .context("Failed to read COLLECTOR_ environment")?
            .try_deserialize()
            .context("Invalid COLLECTOR_ configuration")
    }
}
