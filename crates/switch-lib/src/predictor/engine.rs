//! Switch predictor
//!
//! Owns the optional learned model, routes every prediction through either
//! the model or the heuristic rule chain, and ranks candidate renditions.

use super::features::{build_feature_vector, FeatureVector};
use super::heuristic::{HeuristicConfig, HeuristicPredictor};
use super::inference::{
    compute_checksum, version_from_checksum, LoadedModel, ModelError, NormalizationParams,
    OnnxSwitchModel, SwitchModel,
};
use crate::models::{SwitchCandidate, SwitchPrediction, SwitchProbe};
use crate::observability::{StructuredLogger, SwitchMetrics};
use anyhow::{Context, Result};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use url::Url;

/// File name of the ONNX graph inside a model location
pub const MODEL_FILE: &str = "model.onnx";

/// File name of the normalization parameters inside a model location
pub const SCALER_FILE: &str = "scaler_params.json";

/// Default probability a model score must exceed to approve a switch
pub const DEFAULT_CONFIDENCE_THRESHOLD: f64 = 0.70;

/// Inference latency before warning
const MAX_INFERENCE_MS: u128 = 5;

#[derive(Debug, Clone)]
pub struct PredictorConfig {
    /// Directory path or http(s) base URL holding the model artifacts
    pub model_location: Option<String>,
    pub confidence_threshold: f64,
    /// Maximum model size in bytes
    pub max_model_size: usize,
    /// Hex SHA-256 the model file must match, when set
    pub expected_checksum: Option<String>,
    pub fetch_timeout: Duration,
    pub heuristic: HeuristicConfig,
}

impl Default for PredictorConfig {
    fn default() -> Self {
        Self {
            model_location: None,
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            max_model_size: 10 * 1024 * 1024,
            expected_checksum: None,
            fetch_timeout: Duration::from_secs(10),
            heuristic: HeuristicConfig::default(),
        }
    }
}

/// Where model artifacts are fetched from
#[derive(Debug, Clone, PartialEq)]
pub enum ModelSource {
    Dir(PathBuf),
    Url(Url),
}

impl ModelSource {
    pub fn parse(location: &str) -> Result<Self, ModelError> {
        if location.starts_with("http://") || location.starts_with("https://") {
            let mut base = Url::parse(location).map_err(|e| ModelError::Fetch {
                artifact: location.to_string(),
                reason: e.to_string(),
            })?;
            if !base.path().ends_with('/') {
                let path = format!("{}/", base.path());
                base.set_path(&path);
            }
            Ok(ModelSource::Url(base))
        } else {
            Ok(ModelSource::Dir(PathBuf::from(location)))
        }
    }

    fn describe(&self, artifact: &str) -> String {
        match self {
            ModelSource::Dir(dir) => dir.join(artifact).display().to_string(),
            ModelSource::Url(base) => format!("{}{}", base, artifact),
        }
    }
}

/// Why the ML path did not produce a prediction
#[derive(Debug, Clone, PartialEq)]
pub enum DegradeReason {
    NoModel,
    SchemaMismatch { expected: usize, actual: usize },
    NonFiniteInput(&'static str),
    Inference(String),
    InvalidOutput(f32),
}

impl DegradeReason {
    pub fn label(&self) -> &'static str {
        match self {
            DegradeReason::NoModel => "no_model",
            DegradeReason::SchemaMismatch { .. } => "schema_mismatch",
            DegradeReason::NonFiniteInput(_) => "non_finite_input",
            DegradeReason::Inference(_) => "inference",
            DegradeReason::InvalidOutput(_) => "invalid_output",
        }
    }
}

impl std::fmt::Display for DegradeReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DegradeReason::NoModel => write!(f, "no model loaded"),
            DegradeReason::SchemaMismatch { expected, actual } => {
                write!(f, "model expects {} features, got {}", expected, actual)
            }
            DegradeReason::NonFiniteInput(name) => write!(f, "feature `{}` is not finite", name),
            DegradeReason::Inference(e) => write!(f, "inference failed: {}", e),
            DegradeReason::InvalidOutput(p) => write!(f, "model returned probability {}", p),
        }
    }
}

/// Result of attempting the ML path
#[derive(Debug, Clone, PartialEq)]
pub enum ModelOutcome {
    Scored(SwitchPrediction),
    Degraded(DegradeReason),
}

/// A scored candidate, as returned by [`SwitchPredictor::rank`]
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RankedCandidate {
    pub target_quality_index: i32,
    pub prediction: SwitchPrediction,
}

#[derive(Debug, Default)]
struct PredictorCounters {
    predictions: AtomicU64,
    ml_predictions: AtomicU64,
    degraded: AtomicU64,
    slow_inferences: AtomicU64,
    model_loads: AtomicU64,
    failed_model_loads: AtomicU64,
}

/// Prediction statistics
#[derive(Debug, Clone, PartialEq)]
pub struct PredictorStats {
    pub total_predictions: u64,
    pub ml_predictions: u64,
    pub heuristic_predictions: u64,
    pub degraded_predictions: u64,
    pub slow_inferences: u64,
    pub model_loads: u64,
    pub failed_model_loads: u64,
    pub model_version: Option<String>,
    pub using_fallback: bool,
}

/// Decides whether a quality switch is advisable
///
/// Cheap to share behind an `Arc`. Every call captures its own reference to
/// the loaded model, so a concurrent reload never affects a call in progress.
pub struct SwitchPredictor {
    config: PredictorConfig,
    heuristic: HeuristicPredictor,
    model: RwLock<Option<Arc<LoadedModel>>>,
    using_fallback: AtomicBool,
    http: reqwest::Client,
    counters: PredictorCounters,
    metrics: SwitchMetrics,
    logger: StructuredLogger,
}

impl SwitchPredictor {
    pub fn new(config: PredictorConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.fetch_timeout)
            .build()
            .context("Failed to build model fetch client")?;

        let metrics = SwitchMetrics::new();
        metrics.set_model_loaded(None);

        Ok(Self {
            heuristic: HeuristicPredictor::with_config(config.heuristic.clone()),
            config,
            model: RwLock::new(None),
            using_fallback: AtomicBool::new(true),
            http,
            counters: PredictorCounters::default(),
            metrics,
            logger: StructuredLogger::new("predictor"),
        })
    }

    pub fn config(&self) -> &PredictorConfig {
        &self.config
    }

    pub fn using_fallback(&self) -> bool {
        self.using_fallback.load(Ordering::Relaxed)
    }

    pub fn model_version(&self) -> Option<String> {
        self.current_model().map(|m| m.version().to_string())
    }

    /// Fetch and install the model from the configured location.
    ///
    /// Never fails: any problem leaves the predictor in heuristic mode and
    /// resolves to `false`.
    pub async fn load_model(&self) -> bool {
        let Some(location) = self.config.model_location.clone() else {
            debug!("No model location configured, staying on heuristic");
            self.clear_model();
            return false;
        };

        match self.fetch_model(&location).await {
            Ok(loaded) => {
                self.logger
                    .log_model_loaded(&location, loaded.version(), true, None);
                self.counters.model_loads.fetch_add(1, Ordering::Relaxed);
                self.metrics.inc_model_load(true);
                self.swap_in(loaded);
                true
            }
            Err(e) => {
                self.logger
                    .log_model_loaded(&location, "", false, Some(&e.to_string()));
                self.counters
                    .failed_model_loads
                    .fetch_add(1, Ordering::Relaxed);
                self.metrics.inc_model_load(false);
                self.clear_model();
                false
            }
        }
    }

    /// Install an already built model, replacing the current one
    pub fn install_model(
        &self,
        model: Arc<dyn SwitchModel>,
        params: NormalizationParams,
        version: impl Into<String>,
    ) -> Result<(), ModelError> {
        let loaded = LoadedModel::new(model, params, version)?;
        self.logger
            .log_model_loaded("<installed>", loaded.version(), true, None);
        self.counters.model_loads.fetch_add(1, Ordering::Relaxed);
        self.metrics.inc_model_load(true);
        self.swap_in(loaded);
        Ok(())
    }

    async fn fetch_model(&self, location: &str) -> Result<LoadedModel, ModelError> {
        let source = ModelSource::parse(location)?;

        let model_bytes = self.fetch_artifact(&source, MODEL_FILE).await?;
        if model_bytes.len() > self.config.max_model_size {
            return Err(ModelError::TooLarge {
                size: model_bytes.len(),
                max: self.config.max_model_size,
            });
        }

        let checksum = compute_checksum(&model_bytes);
        if let Some(expected) = &self.config.expected_checksum {
            if !expected.eq_ignore_ascii_case(&checksum) {
                return Err(ModelError::ChecksumMismatch {
                    expected: expected.clone(),
                    actual: checksum,
                });
            }
        }

        let scaler_bytes = self.fetch_artifact(&source, SCALER_FILE).await?;
        let params = NormalizationParams::from_json(&scaler_bytes)?;

        // Graph optimization is CPU-bound
        let model = tokio::task::spawn_blocking(move || OnnxSwitchModel::from_bytes(&model_bytes))
            .await
            .map_err(|e| ModelError::Decode(anyhow::anyhow!("model build task failed: {}", e)))??;

        debug!(
            checksum = %checksum,
            "Model artifacts validated"
        );
        LoadedModel::new(Arc::new(model), params, version_from_checksum(&checksum))
    }

    async fn fetch_artifact(&self, source: &ModelSource, name: &str) -> Result<Vec<u8>, ModelError> {
        let fetch_err = |reason: String| ModelError::Fetch {
            artifact: source.describe(name),
            reason,
        };

        match source {
            ModelSource::Dir(dir) => tokio::fs::read(dir.join(name))
                .await
                .map_err(|e| fetch_err(e.to_string())),
            ModelSource::Url(base) => {
                let url = base.join(name).map_err(|e| fetch_err(e.to_string()))?;
                let response = self
                    .http
                    .get(url)
                    .send()
                    .await
                    .and_then(|r| r.error_for_status())
                    .map_err(|e| fetch_err(e.to_string()))?;
                let bytes = response
                    .bytes()
                    .await
                    .map_err(|e| fetch_err(e.to_string()))?;
                Ok(bytes.to_vec())
            }
        }
    }

    fn swap_in(&self, loaded: LoadedModel) {
        let version = loaded.version().to_string();
        let mut slot = match self.model.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *slot = Some(Arc::new(loaded));
        drop(slot);

        self.using_fallback.store(false, Ordering::Relaxed);
        self.metrics.set_model_loaded(Some(&version));
    }

    fn clear_model(&self) {
        let mut slot = match self.model.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *slot = None;
        drop(slot);

        self.using_fallback.store(true, Ordering::Relaxed);
        self.metrics.set_model_loaded(None);
    }

    fn current_model(&self) -> Option<Arc<LoadedModel>> {
        match self.model.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Attempt the ML path only
    pub fn try_model(&self, features: &FeatureVector) -> ModelOutcome {
        let Some(loaded) = self.current_model() else {
            return ModelOutcome::Degraded(DegradeReason::NoModel);
        };

        if let Some(feature) = features.first_non_finite() {
            return ModelOutcome::Degraded(DegradeReason::NonFiniteInput(feature.name()));
        }

        let input = match loaded.params().normalize(features) {
            Ok(input) => input,
            Err(ModelError::SchemaMismatch { expected, actual }) => {
                return ModelOutcome::Degraded(DegradeReason::SchemaMismatch { expected, actual })
            }
            Err(e) => return ModelOutcome::Degraded(DegradeReason::Inference(e.to_string())),
        };
        if input.len() != loaded.model().input_len() {
            return ModelOutcome::Degraded(DegradeReason::SchemaMismatch {
                expected: loaded.model().input_len(),
                actual: input.len(),
            });
        }

        let start = Instant::now();
        let output = match loaded.model().infer(&input) {
            Ok(output) => output,
            Err(e) => return ModelOutcome::Degraded(DegradeReason::Inference(format!("{:#}", e))),
        };

        let elapsed = start.elapsed();
        if elapsed.as_millis() > MAX_INFERENCE_MS {
            self.counters.slow_inferences.fetch_add(1, Ordering::Relaxed);
            warn!(
                elapsed_ms = elapsed.as_millis() as u64,
                model_version = %loaded.version(),
                "Inference exceeded {}ms target",
                MAX_INFERENCE_MS
            );
        } else {
            debug!(elapsed_us = elapsed.as_micros() as u64, "Inference completed");
        }

        let p = output.success_probability;
        if !p.is_finite() || !(0.0..=1.0).contains(&p) {
            return ModelOutcome::Degraded(DegradeReason::InvalidOutput(p));
        }
        let confidence = p as f64;

        ModelOutcome::Scored(SwitchPrediction {
            should_switch: confidence > self.config.confidence_threshold,
            confidence,
            expected_switch_time: output
                .expected_switch_time
                .filter(|t| t.is_finite() && *t >= 0.0)
                .map(f64::from),
            used_ml: true,
            reason: None,
        })
    }

    /// Predict one switch; never fails
    pub fn predict(&self, features: &FeatureVector) -> SwitchPrediction {
        let start = Instant::now();

        let prediction = match self.try_model(features) {
            ModelOutcome::Scored(prediction) => {
                self.counters.ml_predictions.fetch_add(1, Ordering::Relaxed);
                prediction
            }
            ModelOutcome::Degraded(reason) => {
                if reason != DegradeReason::NoModel {
                    self.counters.degraded.fetch_add(1, Ordering::Relaxed);
                    self.metrics.inc_degraded(reason.label());
                    warn!(
                        reason = %reason,
                        model_version = ?self.model_version(),
                        "Model prediction degraded to heuristic"
                    );
                }
                self.heuristic(features)
            }
        };

        self.counters.predictions.fetch_add(1, Ordering::Relaxed);
        self.metrics
            .observe_prediction(prediction.used_ml, start.elapsed().as_secs_f64());
        prediction
    }

    /// Deterministic rule chain, regardless of model state
    pub fn heuristic(&self, features: &FeatureVector) -> SwitchPrediction {
        self.heuristic.predict(features)
    }

    /// Score every valid candidate, highest confidence first.
    ///
    /// Probes that fail validation and non-finite predictions are skipped.
    pub fn rank(&self, probes: &[SwitchProbe]) -> Vec<RankedCandidate> {
        let candidates: Vec<SwitchCandidate> = probes
            .iter()
            .enumerate()
            .filter_map(|(i, probe)| match probe.validate() {
                Ok(candidate) => Some(candidate),
                Err(e) => {
                    warn!(candidate = i, error = %e, "Skipping invalid candidate");
                    None
                }
            })
            .collect();
        self.rank_candidates(&candidates)
    }

    pub fn rank_candidates(&self, candidates: &[SwitchCandidate]) -> Vec<RankedCandidate> {
        let mut ranked: Vec<RankedCandidate> = candidates
            .iter()
            .filter_map(|candidate| {
                let prediction = self.predict(&build_feature_vector(candidate));
                if !prediction.confidence.is_finite() {
                    warn!(
                        target_quality = candidate.target_quality_index,
                        "Skipping candidate with non-finite confidence"
                    );
                    return None;
                }
                self.logger.log_prediction(
                    candidate.target_quality_index,
                    &prediction,
                    self.model_version().as_deref(),
                );
                Some(RankedCandidate {
                    target_quality_index: candidate.target_quality_index,
                    prediction,
                })
            })
            .collect();

        ranked.sort_by(|a, b| b.prediction.confidence.total_cmp(&a.prediction.confidence));
        ranked
    }

    /// Target quality index of the best candidate that clears the threshold
    pub fn recommend(&self, probes: &[SwitchProbe]) -> Option<i32> {
        best_approved(self.rank(probes))
    }

    pub fn recommend_candidates(&self, candidates: &[SwitchCandidate]) -> Option<i32> {
        best_approved(self.rank_candidates(candidates))
    }

    pub fn stats(&self) -> PredictorStats {
        let total = self.counters.predictions.load(Ordering::Relaxed);
        let ml = self.counters.ml_predictions.load(Ordering::Relaxed);
        PredictorStats {
            total_predictions: total,
            ml_predictions: ml,
            heuristic_predictions: total.saturating_sub(ml),
            degraded_predictions: self.counters.degraded.load(Ordering::Relaxed),
            slow_inferences: self.counters.slow_inferences.load(Ordering::Relaxed),
            model_loads: self.counters.model_loads.load(Ordering::Relaxed),
            failed_model_loads: self.counters.failed_model_loads.load(Ordering::Relaxed),
            model_version: self.model_version(),
            using_fallback: self.using_fallback(),
        }
    }
}

fn best_approved(ranked: Vec<RankedCandidate>) -> Option<i32> {
    ranked
        .into_iter()
        .find(|r| r.prediction.should_switch)
        .map(|r| r.target_quality_index)
}
