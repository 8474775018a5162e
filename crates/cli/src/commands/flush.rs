//! `qsw flush`

use anyhow::{Context, Result};
use colored::Colorize;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use switch_lib::telemetry::{read_spill, HttpTelemetrySink, MemoryPreferences};
use switch_lib::{QswConfig, TelemetryRecorder};
use tracing::{info, warn};

use crate::output::{format_timestamp_ms, print_info, print_json, print_success, OutputFormat};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct FlushSummary {
    loaded: usize,
    sent: usize,
    spilled: usize,
    remaining: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// Upload every record in a spill file.
///
/// Records the collector does not accept are written back to the same file.
pub async fn flush(
    config: &QswConfig,
    spill_path: &Path,
    user: Option<String>,
    format: OutputFormat,
) -> Result<()> {
    let records = read_spill(spill_path)?;
    if records.is_empty() {
        if matches!(format, OutputFormat::Table) {
            print_info(&format!("{} holds no records", spill_path.display()));
        }
        return Ok(());
    }

    let mut telemetry = config.telemetry_config();
    telemetry.spill_path = Some(spill_path.to_path_buf());
    telemetry.upload_on_complete = false;
    telemetry.upload_interval = None;

    let recorder = match user {
        Some(user) => {
            let endpoint = telemetry
                .endpoint
                .clone()
                .context("No telemetry endpoint; pass --endpoint or set QSW_TELEMETRY_ENDPOINT")?;
            let sink = HttpTelemetrySink::new(&endpoint, telemetry.request_timeout)?;
            let preferences = MemoryPreferences::with(telemetry.preference_key.clone(), user);
            TelemetryRecorder::new(telemetry, Arc::new(sink), Arc::new(preferences))
        }
        None => TelemetryRecorder::from_config(telemetry)
            .context("No telemetry endpoint; pass --endpoint or set QSW_TELEMETRY_ENDPOINT")?,
    };

    info!(
        spill = %spill_path.display(),
        records = records.len(),
        "Flushing spilled telemetry"
    );
    let report = recorder.flush_for_unload().await;
    match &report.error {
        None => info!(sent = report.sent, "Spill file delivered"),
        Some(error) => warn!(
            sent = report.sent,
            spilled = report.spilled,
            error = %error,
            "Flush stopped early"
        ),
    }
    let summary = FlushSummary {
        loaded: records.len(),
        sent: report.sent,
        spilled: report.spilled,
        remaining: report.remaining,
        error: report.error.clone(),
    };

    match format {
        OutputFormat::Json => print_json(&summary)?,
        OutputFormat::Table => {
            println!("{}", "Telemetry Flush".bold());
            println!("{}", "=".repeat(50));
            println!("Spill File:      {}", spill_path.display().to_string().cyan());
            if let (Some(first), Some(last)) = (
                records.iter().map(|r| r.timestamp).min(),
                records.iter().map(|r| r.timestamp).max(),
            ) {
                println!(
                    "Recorded:        {} .. {}",
                    format_timestamp_ms(first),
                    format_timestamp_ms(last)
                );
            }
            println!("Loaded:          {}", summary.loaded);
            println!("Sent:            {}", summary.sent.to_string().green());
            if summary.spilled > 0 {
                println!("Written Back:    {}", summary.spilled.to_string().yellow());
            }
            if report.error.is_none() {
                print_success("All records delivered");
            }
        }
    }

    if let Some(error) = report.error {
        anyhow::bail!(
            "Upload failed after {} of {} records: {}",
            summary.sent,
            summary.loaded,
            error
        );
    }

    Ok(())
}
