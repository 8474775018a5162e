//! `qsw features`

use anyhow::{Context, Result};
use colored::Colorize;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use switch_lib::{build_feature_vector, SwitchProbe};
use tabled::Tabled;

use super::read_json;
use crate::output::{print_json, print_table, OutputFormat};

#[derive(Tabled)]
struct FeatureRow {
    #[tabled(rename = "#")]
    index: usize,
    #[tabled(rename = "Feature")]
    name: &'static str,
    #[tabled(rename = "Value")]
    value: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct FeatureReport {
    schema_version: u32,
    values: Vec<f32>,
    features: BTreeMap<&'static str, f32>,
}

pub fn show_features(probe_path: &Path, format: OutputFormat) -> Result<()> {
    let probe: SwitchProbe = read_json(probe_path)?;
    let candidate = probe
        .validate()
        .with_context(|| format!("Invalid probe in {}", probe_path.display()))?;
    let features = build_feature_vector(&candidate);

    match format {
        OutputFormat::Json => print_json(&FeatureReport {
            schema_version: features.schema_version(),
            values: features.as_slice().to_vec(),
            features: features.named().collect(),
        })?,
        OutputFormat::Table => {
            println!(
                "{} (schema v{}, {} -> {})",
                "Feature Vector".bold(),
                features.schema_version(),
                candidate.original_quality_index,
                candidate.target_quality_index
            );
            let rows = features
                .named()
                .enumerate()
                .map(|(index, (name, value))| FeatureRow {
                    index,
                    name,
                    value: format!("{value:.6}"),
                })
                .collect();
            print_table::<FeatureRow>(rows);
        }
    }

    Ok(())
}
