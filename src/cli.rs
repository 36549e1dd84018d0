//! Command-line interface argument parsing.
//!
//! This module handles all CLI argument parsing using clap,
//! including validation. Most flags are optional so that values from
//! `.scorecrawl.toml` are only overridden when given explicitly.

use crate::input::BadScorePolicy;
use crate::output::OutputFormat;
use crate::pipeline::Strategy;
use clap::Parser;
use std::path::PathBuf;

/// scorecrawl - security scorecards for critical open source projects
///
/// Reads a criticality table (first column: repository URL, last column:
/// criticality score), fetches the scorecard of every listed repository
/// concurrently and writes the results as per-repo JSON files, one JSON
/// array, or a CSV table.
///
/// Examples:
///   scorecrawl --input 1000_critical_projects.csv
///   scorecrawl -i projects.csv --format json -o scorecards.json
///   scorecrawl -i projects.csv --format csv --max-concurrency 32
///   scorecrawl --init-config
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Args {
    /// Criticality table to read
    #[arg(short, long, value_name = "FILE", required_unless_present = "init_config")]
    pub input: Option<PathBuf>,

    /// Output path (directory for `files`, file otherwise)
    ///
    /// Defaults: results/, results.json, results.csv
    #[arg(short, long, value_name = "PATH")]
    pub output: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_name = "FORMAT")]
    pub format: Option<OutputFormat>,

    /// How fetched results are aggregated
    ///
    /// `channel` (default) funnels results to a single writer; `collect`
    /// gathers them in memory and writes once; `per-item` has every fetch
    /// write its own file and only works with the `files` format.
    #[arg(short, long, value_name = "STRATEGY")]
    pub strategy: Option<Strategy>,

    /// Scorecard API base URL
    #[arg(long, value_name = "URL", env = "SCORECRAWL_ENDPOINT")]
    pub endpoint: Option<String>,

    /// Per-request timeout in seconds
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Maximum number of simultaneous fetches
    ///
    /// Without this flag every row gets its own fetch task immediately.
    #[arg(long, value_name = "NUM")]
    pub max_concurrency: Option<usize>,

    /// Read at most this many data rows from the table
    #[arg(long, value_name = "ROWS")]
    pub limit: Option<usize>,

    /// What to do with a non-numeric criticality score
    #[arg(long, value_name = "POLICY")]
    pub on_bad_score: Option<BadScorePolicy>,

    /// Also write failed fetches to this JSON file
    #[arg(long, value_name = "FILE")]
    pub failures: Option<PathBuf>,

    /// Path to configuration file
    ///
    /// If not specified, looks for .scorecrawl.toml in the current directory
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging output
    #[arg(short, long)]
    pub verbose: bool,

    /// Run in quiet mode (errors only, no progress bar)
    #[arg(short, long)]
    pub quiet: bool,

    /// Generate a default .scorecrawl.toml configuration file
    #[arg(long)]
    pub init_config: bool,
}

impl Args {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate the parsed arguments.
    pub fn validate(&self) -> Result<(), String> {
        // Skip validation for --init-config
        if self.init_config {
            return Ok(());
        }

        if self.verbose && self.quiet {
            return Err("Cannot use both --verbose and --quiet".to_string());
        }

        if let Some(ref input) = self.input {
            if !input.is_file() {
                return Err(format!("Input table does not exist: {}", input.display()));
            }
        }

        if let Some(ref endpoint) = self.endpoint {
            if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
                return Err("Endpoint must start with 'http://' or 'https://'".to_string());
            }
        }

        if self.timeout == Some(0) {
            return Err("Timeout must be at least 1 second".to_string());
        }

        if self.max_concurrency == Some(0) {
            return Err("Max concurrency must be at least 1".to_string());
        }

        if self.limit == Some(0) {
            return Err("Limit must be at least 1".to_string());
        }

        if let (Some(Strategy::PerItem), Some(format)) = (self.strategy, self.format) {
            if format != OutputFormat::Files {
                return Err(format!(
                    "The per-item strategy only supports the files format (got {})",
                    format
                ));
            }
        }

        Ok(())
    }
}
