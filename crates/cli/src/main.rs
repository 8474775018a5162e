//! Quality-switch CLI
//!
//! Inspect feature vectors, run predictions against a model directory or
//! URL, rank candidate renditions and re-send spilled telemetry.

mod commands;
mod config;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Quality-switch decision engine CLI
#[derive(Parser)]
#[command(name = "qsw")]
#[command(author, version, about = "CLI for the quality-switch decision engine", long_about = None)]
pub struct Cli {
    /// Output format
    #[arg(long, short, global = true, default_value = "table")]
    pub format: output::OutputFormat,

    /// Log engine activity to stderr
    #[arg(long, short, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Print the feature vector built from a probe
    Features {
        /// JSON file holding one probe
        probe: PathBuf,
    },

    /// Decide whether a single switch is advisable
    Predict {
        /// JSON file holding one probe
        probe: PathBuf,

        /// Model directory or http(s) base URL (can also be set via QSW_MODEL_LOCATION)
        #[arg(long, short, env = "QSW_MODEL_LOCATION")]
        model: Option<String>,
    },

    /// Rank candidate switches and pick a target quality
    Recommend {
        /// JSON file holding an array of probes
        probes: PathBuf,

        /// Model directory or http(s) base URL (can also be set via QSW_MODEL_LOCATION)
        #[arg(long, short, env = "QSW_MODEL_LOCATION")]
        model: Option<String>,
    },

    /// Re-send telemetry from a spill file
    Flush {
        /// Spill file written by a recorder on unload
        spill: PathBuf,

        /// Collector endpoint (can also be set via QSW_TELEMETRY_ENDPOINT)
        #[arg(long, short, env = "QSW_TELEMETRY_ENDPOINT")]
        endpoint: Option<String>,

        /// User id to upload as
        #[arg(long, short)]
        user: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.verbose {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")),
            )
            .with_writer(std::io::stderr)
            .init();
    }

    match cli.command {
        Commands::Features { probe } => {
            commands::features::show_features(&probe, cli.format)?;
        }
        Commands::Predict { probe, model } => {
            let config = config::load(model, None)?;
            commands::predict::predict(&config, &probe, cli.format).await?;
        }
        Commands::Recommend { probes, model } => {
            let config = config::load(model, None)?;
            commands::predict::recommend(&config, &probes, cli.format).await?;
        }
        Commands::Flush {
            spill,
            endpoint,
            user,
        } => {
            let config = config::load(None, endpoint)?;
            commands::flush::flush(&config, &spill, user, cli.format).await?;
        }
    }

    Ok(())
}
