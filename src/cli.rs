//! Command-line interface argument parsing.
//!
//! The binary is a thin adapter; every flag here maps onto a library call
//! or a configuration override.

use crate::models::OkrStatus;
use chrono::{DateTime, Utc};
use clap::Parser;
use std::path::PathBuf;

/// okrtrend - OKR scoring and historical trend engine
///
/// Scores an entity inventory against weighted key results per country,
/// SDM and site, archives the snapshots, and reports trends and
/// burndowns against earlier runs.
///
/// Examples:
///   okrtrend --entities devices.json
///   okrtrend --entities devices.json --dimensions country,site --fail-on at-risk
///   okrtrend --entities devices.json --as-of 2025-03-01T00:00:00Z --no-save
///   okrtrend --init-config
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Args {
    /// JSON file holding an array of entity records
    #[arg(long, value_name = "FILE", required_unless_present = "init_config")]
    pub entities: Option<PathBuf>,

    /// Path to configuration file
    ///
    /// If not specified, looks for .okrtrend.toml in the current directory
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Snapshot archive directory
    #[arg(long, value_name = "DIR", env = "OKRTREND_HISTORY_DIR")]
    pub history_dir: Option<PathBuf>,

    /// Dimensions to aggregate (comma-separated)
    ///
    /// Example: --dimensions country,sdm,site
    #[arg(short, long, value_name = "LIST", value_delimiter = ',')]
    pub dimensions: Option<Vec<String>>,

    /// Run timestamp (RFC 3339); defaults to now
    #[arg(long, value_name = "TIMESTAMP", value_parser = parse_as_of)]
    pub as_of: Option<DateTime<Utc>>,

    /// Output file path for the JSON run report
    #[arg(
        short,
        long,
        default_value = "okr_report.json",
        value_name = "FILE"
    )]
    pub output: PathBuf,

    /// Score and compare without archiving this run
    #[arg(long)]
    pub no_save: bool,

    /// Fail if the overall status is at or below this level
    ///
    /// Useful for CI pipelines. Exit code 2 when the threshold is hit.
    /// Values: caution, at-risk
    #[arg(long, value_name = "LEVEL")]
    pub fail_on: Option<FailOnLevel>,

    /// Enable verbose logging output
    #[arg(short, long)]
    pub verbose: bool,

    /// Run in quiet mode (minimal output)
    #[arg(short, long)]
    pub quiet: bool,

    /// Generate a default .okrtrend.toml configuration file
    #[arg(long)]
    pub init_config: bool,
}

/// Status level for --fail-on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, clap::ValueEnum)]
pub enum FailOnLevel {
    Caution,
    AtRisk,
}

impl FailOnLevel {
    /// Whether `status` is at or below this level.
    pub fn is_hit(&self, status: OkrStatus) -> bool {
        let threshold = match self {
            FailOnLevel::Caution => OkrStatus::Caution,
            FailOnLevel::AtRisk => OkrStatus::AtRisk,
        };
        status.severity() >= threshold.severity()
    }
}

fn parse_as_of(raw: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| format!("invalid RFC 3339 timestamp '{}': {}", raw, e))
}

impl Args {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Run timestamp, falling back to the current time.
    pub fn run_timestamp(&self) -> DateTime<Utc> {
        self.as_of.unwrap_or_else(Utc::now)
    }

    /// Validate the parsed arguments.
    pub fn validate(&self) -> Result<(), String> {
        if self.init_config {
            return Ok(());
        }

        if self.verbose && self.quiet {
            return Err("Cannot use both --verbose and --quiet".to_string());
        }

        match self.entities {
            Some(ref path) if !path.is_file() => {
                return Err(format!("Entities file does not exist: {}", path.display()));
            }
            None => return Err("--entities is required".to_string()),
            _ => {}
        }

        if let Some(ref dims) = self.dimensions {
            if dims.iter().all(|d| d.trim().is_empty()) {
                return Err("--dimensions needs at least one dimension".to_string());
            }
        }

        Ok(())
    }

    /// Returns the log level based on verbosity settings.
    pub fn log_level(&self) -> tracing::Level {
        if self.quiet {
            tracing::Level::ERROR
        } else if self.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        }
    }
}
