//! Transport for telemetry batches

use crate::models::SwitchRecord;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Wire format version sent with every batch
pub const PAYLOAD_VERSION: &str = "1.0";

/// Body POSTed to the collector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryPayload {
    pub user: String,
    pub batch: Vec<SwitchRecord>,
    pub version: String,
}

impl TelemetryPayload {
    pub fn new(user: impl Into<String>, batch: Vec<SwitchRecord>) -> Self {
        Self {
            user: user.into(),
            batch,
            version: PAYLOAD_VERSION.to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("invalid telemetry endpoint {endpoint}: {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },

    #[error("telemetry request failed: {0}")]
    Transport(String),

    #[error("collector responded with status {0}")]
    Status(u16),
}

/// Destination for telemetry batches
#[async_trait]
pub trait TelemetrySink: Send + Sync {
    /// Deliver one batch. Only success or failure matters to the caller.
    async fn send(&self, payload: &TelemetryPayload) -> Result<(), UploadError>;
}

/// POSTs batches as JSON to a collector endpoint
pub struct HttpTelemetrySink {
    client: reqwest::Client,
    endpoint: Url,
}

impl HttpTelemetrySink {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self, UploadError> {
        let invalid = |reason: String| UploadError::InvalidEndpoint {
            endpoint: endpoint.to_string(),
            reason,
        };

        let endpoint = Url::parse(endpoint).map_err(|e| invalid(e.to_string()))?;
        if !matches!(endpoint.scheme(), "http" | "https") {
            return Err(invalid(format!("unsupported scheme {}", endpoint.scheme())));
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| invalid(e.to_string()))?;

        Ok(Self { client, endpoint })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl TelemetrySink for HttpTelemetrySink {
    async fn send(&self, payload: &TelemetryPayload) -> Result<(), UploadError> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .json(payload)
            .send()
            .await
            .map_err(|e| UploadError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(UploadError::Status(status.as_u16()));
        }
        Ok(())
    }
}
