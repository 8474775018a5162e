//! Engine configuration
//!
//! Read from `QSW_`-prefixed environment variables, e.g.
//! `QSW_MODEL_LOCATION=https://cdn.example.com/models/v3`.

use crate::predictor::{PredictorConfig, DEFAULT_CONFIDENCE_THRESHOLD};
use crate::telemetry::{TelemetryConfig, DEFAULT_MAX_BATCH_SIZE, USER_PREFERENCE_KEY};
use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct QswConfig {
    /// Model directory or http(s) base URL; heuristic only when unset
    #[serde(default)]
    pub model_location: Option<String>,

    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f64,

    #[serde(default = "default_max_model_size")]
    pub max_model_size: usize,

    /// Expected hex SHA-256 of `model.onnx`
    #[serde(default)]
    pub model_checksum: Option<String>,

    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_secs: u64,

    #[serde(default)]
    pub telemetry_endpoint: Option<String>,

    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,

    /// 0 disables periodic uploads
    #[serde(default = "default_upload_interval")]
    pub upload_interval_secs: u64,

    #[serde(default = "default_true")]
    pub upload_on_complete: bool,

    #[serde(default)]
    pub spill_path: Option<PathBuf>,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    #[serde(default)]
    pub preferences_path: Option<PathBuf>,
}

fn default_confidence_threshold() -> f64 {
    DEFAULT_CONFIDENCE_THRESHOLD
}

fn default_max_model_size() -> usize {
    10 * 1024 * 1024
}

fn default_fetch_timeout() -> u64 {
    10
}

fn default_max_batch_size() -> usize {
    DEFAULT_MAX_BATCH_SIZE
}

fn default_upload_interval() -> u64 {
    60
}

fn default_true() -> bool {
    true
}

fn default_request_timeout() -> u64 {
    10
}

impl Default for QswConfig {
    fn default() -> Self {
        Self {
            model_location: None,
            confidence_threshold: default_confidence_threshold(),
            max_model_size: default_max_model_size(),
            model_checksum: None,
            fetch_timeout_secs: default_fetch_timeout(),
            telemetry_endpoint: None,
            max_batch_size: default_max_batch_size(),
            upload_interval_secs: default_upload_interval(),
            upload_on_complete: true,
            spill_path: None,
            request_timeout_secs: default_request_timeout(),
            preferences_path: None,
        }
    }
}

impl QswConfig {
    /// Load configuration from the environment
    pub fn load() -> Result<Self> {
        Self::from_env(config::Environment::with_prefix("QSW"))
    }

    fn from_env(env: config::Environment) -> Result<Self> {
        let config = config::Config::builder()
            .add_source(env.try_parsing(true))
            .build()
            .context("Failed to read QSW_ environment")?;

        let parsed: Self = config
            .try_deserialize()
            .context("Invalid QSW_ configuration")?;
        parsed.validate()?;
        Ok(parsed)
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            anyhow::bail!(
                "confidence_threshold must be within [0, 1], got {}",
                self.confidence_threshold
            );
        }
        if self.max_batch_size == 0 {
            anyhow::bail!("max_batch_size must be at least 1");
        }
        Ok(())
    }

    pub fn predictor_config(&self) -> PredictorConfig {
        PredictorConfig {
            model_location: self.model_location.clone(),
            confidence_threshold: self.confidence_threshold,
            max_model_size: self.max_model_size,
            expected_checksum: self.model_checksum.clone(),
            fetch_timeout: Duration::from_secs(self.fetch_timeout_secs),
            ..Default::default()
        }
    }

    pub fn telemetry_config(&self) -> TelemetryConfig {
        TelemetryConfig {
            endpoint: self.telemetry_endpoint.clone(),
            max_batch_size: self.max_batch_size,
            upload_interval: Some(Duration::from_secs(self.upload_interval_secs))
                .filter(|d| !d.is_zero()),
            upload_on_complete: self.upload_on_complete,
            spill_path: self.spill_path.clone(),
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            preferences_path: self.preferences_path.clone(),
            preference_key: USER_PREFERENCE_KEY.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(vars: &[(&str, &str)]) -> config::Environment {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        config::Environment::with_prefix("QSW").source(Some(map))
    }

    #[test]
    fn test_defaults() {
        let config = QswConfig::from_env(env(&[])).unwrap();
        assert_eq!(config.model_location, None);
        assert_eq!(config.confidence_threshold, 0.70);
        assert_eq!(config.max_batch_size, 50);
        assert_eq!(config.upload_interval_secs, 60);
        assert!(config.upload_on_complete);

        let telemetry = config.telemetry_config();
        assert_eq!(telemetry.upload_interval, Some(Duration::from_secs(60)));
        assert_eq!(telemetry.preference_key, "customURL");
    }

    #[test]
    fn test_env_overrides() {
        let config = QswConfig::from_env(env(&[
            ("QSW_MODEL_LOCATION", "/var/lib/qsw/model"),
            ("QSW_CONFIDENCE_THRESHOLD", "0.8"),
            ("QSW_MAX_BATCH_SIZE", "10"),
            ("QSW_UPLOAD_INTERVAL_SECS", "0"),
            ("QSW_UPLOAD_ON_COMPLETE", "false"),
            ("QSW_TELEMETRY_ENDPOINT", "http://collector:8080/api/telemetry"),
        ]))
        .unwrap();

        let predictor = config.predictor_config();
        assert_eq!(predictor.model_location.as_deref(), Some("/var/lib/qsw/model"));
        assert_eq!(predictor.confidence_threshold, 0.8);

        let telemetry = config.telemetry_config();
        assert_eq!(telemetry.max_batch_size, 10);
        assert_eq!(telemetry.upload_interval, None);
        assert!(!telemetry.upload_on_complete);
        assert_eq!(
            telemetry.endpoint.as_deref(),
            Some("http://collector:8080/api/telemetry")
        );
    }

    #[test]
    fn test_rejects_bad_threshold() {
        assert!(QswConfig::from_env(env(&[("QSW_CONFIDENCE_THRESHOLD", "1.5")])).is_err());
        assert!(QswConfig::from_env(env(&[("QSW_MAX_BATCH_SIZE", "0")])).is_err());
    }
}
