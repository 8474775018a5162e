//! `qsw predict` and `qsw recommend`

use anyhow::{Context, Result};
use colored::Colorize;
use serde::Serialize;
use std::path::Path;
use switch_lib::predictor::RankedCandidate;
use switch_lib::{build_feature_vector, QswConfig, SwitchPrediction, SwitchPredictor, SwitchProbe};
use tabled::Tabled;
use tracing::{info, warn};

use super::read_json;
use crate::output::{
    color_confidence, color_decision, format_path, format_seconds, print_info, print_json,
    print_success, print_table, print_warning, OutputFormat,
};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PredictReport<'a> {
    original_quality_index: i32,
    target_quality_index: i32,
    #[serde(flatten)]
    prediction: &'a SwitchPrediction,
    model_version: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RecommendReport<'a> {
    recommended: Option<i32>,
    candidates: &'a [RankedCandidate],
    skipped: usize,
    model_version: Option<String>,
}

#[derive(Tabled)]
struct CandidateRow {
    #[tabled(rename = "Target")]
    target: i32,
    #[tabled(rename = "Decision")]
    decision: String,
    #[tabled(rename = "Confidence")]
    confidence: String,
    #[tabled(rename = "Expected")]
    expected: String,
    #[tabled(rename = "Path")]
    path: &'static str,
    #[tabled(rename = "Reason")]
    reason: String,
}

/// Build a predictor, loading the configured model when there is one
async fn build_predictor(config: &QswConfig, format: OutputFormat) -> Result<SwitchPredictor> {
    let predictor = SwitchPredictor::new(config.predictor_config())?;

    if let Some(location) = &config.model_location {
        let loaded = predictor.load_model().await;
        if loaded {
            let version = predictor.model_version().unwrap_or_default();
            info!(location = %location, version = %version, "Using ML model");
        } else {
            warn!(location = %location, "Model load failed, using heuristic");
        }
        if matches!(format, OutputFormat::Table) {
            match predictor.model_version() {
                Some(version) if loaded => {
                    print_info(&format!("Loaded model {} from {}", version, location))
                }
                _ => print_warning(&format!(
                    "Model unavailable at {}, using heuristic",
                    location
                )),
            }
        }
    }

    Ok(predictor)
}

pub async fn predict(config: &QswConfig, probe_path: &Path, format: OutputFormat) -> Result<()> {
    let probe: SwitchProbe = read_json(probe_path)?;
    let candidate = probe
        .validate()
        .with_context(|| format!("Invalid probe in {}", probe_path.display()))?;

    let predictor = build_predictor(config, format).await?;
    let prediction = predictor.predict(&build_feature_vector(&candidate));

    match format {
        OutputFormat::Json => print_json(&PredictReport {
            original_quality_index: candidate.original_quality_index,
            target_quality_index: candidate.target_quality_index,
            prediction: &prediction,
            model_version: predictor.model_version(),
        })?,
        OutputFormat::Table => {
            println!("{}", "Switch Prediction".bold());
            println!("{}", "=".repeat(50));
            println!(
                "Switch:          {} -> {}",
                candidate.original_quality_index,
                candidate.target_quality_index.to_string().cyan()
            );
            println!("Decision:        {}", color_decision(prediction.should_switch));
            println!(
                "Confidence:      {}",
                color_confidence(prediction.confidence, config.confidence_threshold)
            );
            println!(
                "Expected Time:   {}",
                format_seconds(prediction.expected_switch_time)
            );
            println!("Path:            {}", format_path(prediction.used_ml));
            if let Some(reason) = &prediction.reason {
                println!("Reason:          {}", reason);
            }
        }
    }

    Ok(())
}

pub async fn recommend(config: &QswConfig, probes_path: &Path, format: OutputFormat) -> Result<()> {
    let probes: Vec<SwitchProbe> = read_json(probes_path)?;
    let predictor = build_predictor(config, format).await?;

    let ranked = predictor.rank(&probes);
    let skipped = probes.len() - ranked.len();
    let recommended = ranked
        .iter()
        .find(|c| c.prediction.should_switch)
        .map(|c| c.target_quality_index);

    match format {
        OutputFormat::Json => print_json(&RecommendReport {
            recommended,
            candidates: &ranked,
            skipped,
            model_version: predictor.model_version(),
        })?,
        OutputFormat::Table => {
            println!("{}", "Candidate Ranking".bold());
            let rows = ranked
                .iter()
                .map(|c| CandidateRow {
                    target: c.target_quality_index,
                    decision: color_decision(c.prediction.should_switch),
                    confidence: color_confidence(
                        c.prediction.confidence,
                        config.confidence_threshold,
                    ),
                    expected: format_seconds(c.prediction.expected_switch_time),
                    path: format_path(c.prediction.used_ml),
                    reason: c.prediction.reason.clone().unwrap_or_default(),
                })
                .collect();
            print_table::<CandidateRow>(rows);

            if skipped > 0 {
                print_warning(&format!("Skipped {} invalid probe(s)", skipped));
            }
            match recommended {
                Some(target) => print_success(&format!("Recommended quality: {}", target)),
                None => print_info("No candidate clears the switch threshold; hold current quality"),
            }
        }
    }

    Ok(())
}
