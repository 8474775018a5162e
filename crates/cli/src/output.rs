//! Output formatting utilities

use clap::ValueEnum;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

/// Output format for CLI commands
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
    /// Table format (default)
    #[default]
    Table,
    /// JSON format
    Json,
}

pub fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub fn print_table<T: Tabled>(rows: Vec<T>) {
    if rows.is_empty() {
        println!("{}", "No items found".yellow());
        return;
    }
    println!("{}", Table::new(rows).with(Style::rounded()).to_string());
}

pub fn print_success(message: &str) {
    println!("{} {}", "✓".green().bold(), message);
}

pub fn print_warning(message: &str) {
    println!("{} {}", "⚠".yellow().bold(), message);
}

pub fn print_info(message: &str) {
    println!("{} {}", "ℹ".blue().bold(), message);
}

pub fn format_confidence(confidence: f64) -> String {
    format!("{:.0}%", confidence * 100.0)
}

/// Green at or above the switch threshold, yellow within 0.2 of it, red below
pub fn color_confidence(confidence: f64, threshold: f64) -> String {
    let formatted = format_confidence(confidence);
    if confidence >= threshold {
        formatted.green().to_string()
    } else if confidence >= threshold - 0.2 {
        formatted.yellow().to_string()
    } else {
        formatted.red().to_string()
    }
}

pub fn color_decision(should_switch: bool) -> String {
    if should_switch {
        "switch".green().bold().to_string()
    } else {
        "hold".red().to_string()
    }
}

pub fn format_path(used_ml: bool) -> &'static str {
    if used_ml {
        "model"
    } else {
        "heuristic"
    }
}

/// Seconds with millisecond precision, or `-` when unknown
pub fn format_seconds(seconds: Option<f64>) -> String {
    match seconds {
        Some(s) => format!("{:.3}s", s),
        None => "-".to_string(),
    }
}

/// Unix milliseconds as a human-readable UTC timestamp
pub fn format_timestamp_ms(timestamp_ms: i64) -> String {
    chrono::DateTime::<chrono::Utc>::from_timestamp_millis(timestamp_ms)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| timestamp_ms.to_string())
}
