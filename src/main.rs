//! scorecrawl - Security scorecards for critical open source projects
//!
//! A CLI tool that reads a criticality-ranked table of repositories,
//! fetches each repository's security scorecard concurrently and
//! aggregates the results into JSON files, a JSON array or a CSV table.
//!
//! Exit codes:
//!   0 - Batch completed
//!   1 - Runtime error (bad input table, config, unwritable output, etc.)
//!   2 - Batch completed but some results could not be persisted

mod cli;
mod client;
mod config;
mod error;
mod input;
mod models;
mod output;
mod pipeline;

use anyhow::{Context, Result};
use cli::Args;
use client::ScorecardClient;
use config::{Config, CONFIG_FILE_NAME};
use models::BatchReport;
use pipeline::{Aggregator, DispatchSummary, FetchCoordinator};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse_args();

    // Validate arguments
    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    // Handle --init-config early (no logging needed)
    if args.init_config {
        return handle_init_config();
    }

    // Config is loaded first so its verbosity applies to the logger.
    let (mut config, origin) = match load_config(&args) {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!("\n❌ Error: {:#}", e);
            std::process::exit(1);
        }
    };
    config.merge_with_args(&args);

    init_logging(config.log_level(args.quiet));

    info!("scorecrawl v{}", env!("CARGO_PKG_VERSION"));
    debug!("Arguments: {:?}", args);
    origin.log();

    match run_batch(args, config).await {
        Ok(code) => {
            std::process::exit(code);
        }
        Err(e) => {
            error!("Batch failed: {:#}", e);
            eprintln!("\n❌ Error: {:#}", e);
            std::process::exit(1);
        }
    }
}

/// Handle --init-config: generate a default .scorecrawl.toml.
fn handle_init_config() -> Result<()> {
    let path = std::path::Path::new(CONFIG_FILE_NAME);

    if path.exists() {
        eprintln!(
            "⚠️  {} already exists. Remove it first or edit it manually.",
            CONFIG_FILE_NAME
        );
        std::process::exit(1);
    }

    let content = Config::default_toml();
    std::fs::write(path, &content)
        .with_context(|| format!("Failed to write {}", CONFIG_FILE_NAME))?;

    println!("✅ Created {} with default settings.", CONFIG_FILE_NAME);
    println!("   Edit it to customize the endpoint, output, strategy and more.");
    Ok(())
}

/// Initialize logging at the given level.
fn init_logging(level: tracing::Level) {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_writer(std::io::stderr)
        .compact()
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
    }
}

/// Run one fetch-aggregate batch. Returns the exit code (0 or 2).
async fn run_batch(args: Args, config: Config) -> Result<i32> {
    config.validate()?;

    let input_path = args
        .input
        .clone()
        .context("An input table is required (--input)")?;
    let output_path = config.output_path();

    // Step 1: read the table. A malformed score aborts here under the
    // default policy, before anything is dispatched.
    println!("📥 Reading criticality table: {}", input_path.display());
    let records = input::read_table(&input_path, &config.read_options())?;
    println!("   {} repositories to fetch", records.len());

    // Step 2: set up the client and the aggregator.
    let client = ScorecardClient::new(&config.client_config())
        .context("Failed to create HTTP client")?;

    println!("🔬 Fetching scorecards...");
    println!("   Endpoint: {}", config.client.endpoint);
    println!("   Timeout: {}s", config.client.timeout_seconds);
    println!("   Concurrency: {:?}", config.concurrency());

    let aggregator = Aggregator::open(
        config.general.strategy,
        config.general.format,
        &output_path,
    )
    .with_context(|| format!("Failed to open output {}", output_path.display()))?;

    println!(
        "   Output: {} ({}, {} strategy)",
        output_path.display(),
        config.general.format,
        aggregator.strategy()
    );

    // Step 3: fan out and wait for every fetch to report.
    let coordinator = FetchCoordinator::new(Arc::new(client), config.concurrency())
        .with_progress(!args.quiet);
    let summary = {
        let sink = aggregator.sink();
        coordinator.run(records, &sink).await
    };

    // Step 4: flush and close the output.
    let report = aggregator
        .finalize()
        .await
        .context("Failed to finalize output")?;

    check_liveness(&summary, &report);

    if let Some(ref failures_path) = args.failures {
        output::write_failures_file(failures_path, &report.failures).with_context(|| {
            format!("Failed to write failures to {}", failures_path.display())
        })?;
        info!("Failed fetches written to {}", failures_path.display());
    }

    print_summary(&report);

    let code = exit_code(&report);
    if code != 0 {
        eprintln!(
            "\n⛔ {} result(s) could not be persisted. Failing (exit code {}).",
            report.write_failures, code
        );
    }
    Ok(code)
}

/// 2 when any result could not be persisted, otherwise 0. Failed fetches
/// alone do not fail the batch.
fn exit_code(report: &BatchReport) -> i32 {
    if report.write_failures > 0 {
        2
    } else {
        0
    }
}

/// Every dispatched fetch must have reached the aggregator.
fn check_liveness(summary: &DispatchSummary, report: &BatchReport) {
    if summary.dispatched != report.observed {
        warn!(
            "Dispatched {} fetches but the aggregator observed {} outcomes",
            summary.dispatched, report.observed
        );
    }
}

fn print_summary(report: &BatchReport) {
    println!("\n📊 Batch Summary:");
    println!("   Fetched: {}", report.observed);
    println!("   Saved: {}", report.succeeded);
    println!("   Failed fetches: {}", report.failures.len());
    if report.write_failures > 0 {
        println!("   Failed writes: {}", report.write_failures);
    }
    for failed in report.failures.iter().take(10) {
        println!("     - {}", failed);
    }
    if report.failures.len() > 10 {
        println!("     ... and {} more", report.failures.len() - 10);
    }
    println!("   Duration: {:.1}s", report.duration_seconds());
    println!(
        "\n✅ Done ({}). Results saved to: {}",
        report.finished_at.format("%Y-%m-%d %H:%M:%S UTC"),
        report.output.display()
    );
}

/// Where the configuration came from. Loading happens before logging is
/// set up, so this is logged afterwards.
enum ConfigOrigin {
    File(PathBuf),
    Defaults,
    Fallback(String),
}

impl ConfigOrigin {
    fn log(&self) {
        match self {
            ConfigOrigin::File(path) => info!("Loaded config from {}", path.display()),
            ConfigOrigin::Defaults => debug!("No config file found, using defaults"),
            ConfigOrigin::Fallback(e) => warn!("Failed to load config: {}", e),
        }
    }
}

/// Load configuration from file or use defaults.
fn load_config(args: &Args) -> Result<(Config, ConfigOrigin)> {
    // Try explicit config path
    if let Some(ref config_path) = args.config {
        let config = Config::load(config_path)?;
        return Ok((config, ConfigOrigin::File(config_path.clone())));
    }

    // Try default location
    match Config::load_default() {
        Ok(Some(config)) => Ok((config, ConfigOrigin::File(PathBuf::from(CONFIG_FILE_NAME)))),
        Ok(None) => Ok((Config::default(), ConfigOrigin::Defaults)),
        Err(e) => Ok((Config::default(), ConfigOrigin::Fallback(format!("{:#}", e)))),
    }
}
