//! ONNX inference using tract
//!
//! Loads the quality-switch model exported by the training pipeline and
//! runs it on normalized schema v1 feature vectors. The model produces
//! `[success_probability, expected_switch_time]`; the second output is
//! optional.

use super::features::{FeatureVector, NUM_FEATURES};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use thiserror::Error;
use tract_onnx::prelude::*;

type TractModel = SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

/// Errors raised while loading or validating model artifacts
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("failed to fetch {artifact}: {reason}")]
    Fetch { artifact: String, reason: String },

    #[error("model is {size} bytes, limit is {max}")]
    TooLarge { size: usize, max: usize },

    #[error("checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("invalid normalization parameters: {0}")]
    InvalidScaler(String),

    #[error("feature schema mismatch: model expects {expected} inputs, got {actual}")]
    SchemaMismatch { expected: usize, actual: usize },

    #[error("failed to decode model: {0:#}")]
    Decode(anyhow::Error),
}

/// Raw model output for one feature vector
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelOutput {
    pub success_probability: f32,
    pub expected_switch_time: Option<f32>,
}

/// Inference backend for the switch predictor
pub trait SwitchModel: Send + Sync {
    /// Run inference on an already normalized input row
    fn infer(&self, input: &[f32]) -> Result<ModelOutput>;

    /// Number of inputs the model was built for
    fn input_len(&self) -> usize {
        NUM_FEATURES
    }
}

/// Element-wise standardization applied before inference
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizationParams {
    pub mean: Vec<f32>,
    pub scale: Vec<f32>,
}

impl NormalizationParams {
    /// Identity transform for schema v1
    pub fn identity() -> Self {
        Self {
            mean: vec![0.0; NUM_FEATURES],
            scale: vec![1.0; NUM_FEATURES],
        }
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self, ModelError> {
        let params: Self = serde_json::from_slice(bytes)
            .map_err(|e| ModelError::InvalidScaler(e.to_string()))?;
        params.validate()?;
        Ok(params)
    }

    pub fn validate(&self) -> Result<(), ModelError> {
        if self.mean.len() != NUM_FEATURES || self.scale.len() != NUM_FEATURES {
            return Err(ModelError::SchemaMismatch {
                expected: NUM_FEATURES,
                actual: self.mean.len().max(self.scale.len()),
            });
        }
        if self.mean.iter().any(|m| !m.is_finite()) {
            return Err(ModelError::InvalidScaler("non-finite mean".to_string()));
        }
        if self.scale.iter().any(|s| !s.is_finite() || *s == 0.0) {
            return Err(ModelError::InvalidScaler(
                "scale entries must be finite and non-zero".to_string(),
            ));
        }
        Ok(())
    }

    /// `(x - mean) / scale`, element-wise
    pub fn normalize(&self, features: &FeatureVector) -> Result<Vec<f32>, ModelError> {
        let values = features.as_slice();
        if values.len() != self.mean.len() || values.len() != self.scale.len() {
            return Err(ModelError::SchemaMismatch {
                expected: self.mean.len(),
                actual: values.len(),
            });
        }
        Ok(values
            .iter()
            .zip(self.mean.iter().zip(&self.scale))
            .map(|(x, (m, s))| (x - m) / s)
            .collect())
    }
}

/// ONNX model compiled into a tract plan with a fixed `[1, 21]` input
pub struct OnnxSwitchModel {
    plan: TractModel,
}

impl OnnxSwitchModel {
    pub fn from_bytes(model_bytes: &[u8]) -> Result<Self, ModelError> {
        let plan = Self::load_plan(model_bytes).map_err(ModelError::Decode)?;
        Ok(Self { plan })
    }

    fn load_plan(model_bytes: &[u8]) -> Result<TractModel> {
        let plan = tract_onnx::onnx()
            .model_for_read(&mut std::io::Cursor::new(model_bytes))
            .context("Failed to parse ONNX model")?
            .with_input_fact(0, f32::fact([1, NUM_FEATURES]).into())
            .context("Failed to set input shape")?
            .into_optimized()
            .context("Failed to optimize model")?
            .into_runnable()
            .context("Failed to create runnable model")?;
        Ok(plan)
    }
}

impl SwitchModel for OnnxSwitchModel {
    fn infer(&self, input: &[f32]) -> Result<ModelOutput> {
        if input.len() != NUM_FEATURES {
            anyhow::bail!(
                "Input has {} values, model expects {}",
                input.len(),
                NUM_FEATURES
            );
        }
        let tensor: Tensor =
            tract_ndarray::Array2::from_shape_vec((1, NUM_FEATURES), input.to_vec())
                .context("Failed to shape input tensor")?
                .into();

        let result = self.plan.run(tvec!(tensor.into()))?;
        let output = result.first().context("No output from model")?;
        let values: Vec<f32> = output.to_array_view::<f32>()?.iter().copied().collect();

        let success_probability = *values.first().context("Model output is empty")?;
        Ok(ModelOutput {
            success_probability,
            expected_switch_time: values.get(1).copied(),
        })
    }
}

/// A model ready to serve, paired with its normalization parameters
///
/// Immutable once built; the predictor swaps whole `Arc<LoadedModel>`s.
pub struct LoadedModel {
    model: Arc<dyn SwitchModel>,
    params: NormalizationParams,
    version: String,
    loaded_at: i64,
}

impl LoadedModel {
    pub fn new(
        model: Arc<dyn SwitchModel>,
        params: NormalizationParams,
        version: impl Into<String>,
    ) -> Result<Self, ModelError> {
        params.validate()?;
        if model.input_len() != params.mean.len() {
            return Err(ModelError::SchemaMismatch {
                expected: model.input_len(),
                actual: params.mean.len(),
            });
        }
        Ok(Self {
            model,
            params,
            version: version.into(),
            loaded_at: chrono::Utc::now().timestamp(),
        })
    }

    pub fn model(&self) -> &dyn SwitchModel {
        self.model.as_ref()
    }

    pub fn params(&self) -> &NormalizationParams {
        &self.params
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn loaded_at(&self) -> i64 {
        self.loaded_at
    }
}

pub fn compute_checksum(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Short version tag derived from the model checksum
pub fn version_from_checksum(checksum: &str) -> String {
    checksum.chars().take(12).collect()
}
