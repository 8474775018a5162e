//! Quality-switch prediction engine

mod engine;
mod features;
mod heuristic;
mod inference;

pub use engine::{
    DegradeReason, ModelOutcome, ModelSource, PredictorConfig, PredictorStats, RankedCandidate,
    SwitchPredictor, DEFAULT_CONFIDENCE_THRESHOLD, MODEL_FILE, SCALER_FILE,
};
pub use features::{
    build_feature_vector, estimated_load_time, Feature, FeatureVector, NUM_FEATURES,
    PREFETCH_SECONDS, SCHEMA_VERSION,
};
pub use heuristic::{HeuristicConfig, HeuristicDecision, HeuristicPredictor, HeuristicRule};
pub use inference::{
    compute_checksum, version_from_checksum, LoadedModel, ModelError, ModelOutput,
    NormalizationParams, OnnxSwitchModel, SwitchModel,
};
