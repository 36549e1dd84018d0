//! Configuration file handling.
//!
//! This module handles loading and merging configuration from
//! `.scorecrawl.toml` files.

use crate::cli::Args;
use crate::client::scorecard::DEFAULT_ENDPOINT;
use crate::client::ClientConfig;
use crate::input::{BadScorePolicy, ReadOptions};
use crate::output::OutputFormat;
use crate::pipeline::{Concurrency, Strategy};
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Name of the configuration file looked up in the working directory.
pub const CONFIG_FILE_NAME: &str = ".scorecrawl.toml";

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// General settings.
    #[serde(default)]
    pub general: GeneralConfig,

    /// Scorecard service settings.
    #[serde(default)]
    pub client: ClientSection,

    /// Input table settings.
    #[serde(default)]
    pub input: InputConfig,

    /// Fan-out settings.
    #[serde(default)]
    pub dispatch: DispatchConfig,
}

/// General application settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Output path. Defaults depend on the format.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<PathBuf>,

    #[serde(default)]
    pub format: OutputFormat,

    #[serde(default)]
    pub strategy: Strategy,

    /// Enable verbose logging by default.
    #[serde(default)]
    pub verbose: bool,
}

/// Scorecard service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientSection {
    /// Base URL of the scorecard API.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for ClientSection {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            timeout_seconds: default_timeout(),
            user_agent: default_user_agent(),
        }
    }
}

fn default_endpoint() -> String {
    DEFAULT_ENDPOINT.to_string()
}

fn default_timeout() -> u64 {
    30
}

fn default_user_agent() -> String {
    format!("scorecrawl/{}", env!("CARGO_PKG_VERSION"))
}

/// Input table settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InputConfig {
    /// Maximum number of data rows to read.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,

    #[serde(default)]
    pub on_bad_score: BadScorePolicy,
}

/// Fan-out settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Cap on simultaneous fetches. Unset means one task per record with no cap.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_concurrency: Option<usize>,
}

impl Config {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Try to load configuration from the default location.
    ///
    /// Returns `Ok(None)` if the file doesn't exist, `Err` if it exists but can't be parsed.
    pub fn load_default() -> Result<Option<Self>> {
        let default_path = Path::new(CONFIG_FILE_NAME);

        if default_path.exists() {
            Ok(Some(Self::load(default_path)?))
        } else {
            Ok(None)
        }
    }

    /// Merge this configuration with CLI arguments.
    ///
    /// CLI arguments take precedence, but only where they were given.
    pub fn merge_with_args(&mut self, args: &Args) {
        if let Some(ref output) = args.output {
            self.general.output = Some(output.clone());
        }
        if let Some(format) = args.format {
            self.general.format = format;
        }
        if let Some(strategy) = args.strategy {
            self.general.strategy = strategy;
        }
        if args.verbose {
            self.general.verbose = true;
        }

        if let Some(ref endpoint) = args.endpoint {
            self.client.endpoint = endpoint.clone();
        }
        if let Some(timeout) = args.timeout {
            self.client.timeout_seconds = timeout;
        }

        if let Some(limit) = args.limit {
            self.input.limit = Some(limit);
        }
        if let Some(policy) = args.on_bad_score {
            self.input.on_bad_score = policy;
        }

        if let Some(max) = args.max_concurrency {
            self.dispatch.max_concurrency = Some(max);
        }
    }

    /// Check settings that only make sense together.
    pub fn validate(&self) -> Result<()> {
        if !self.general.strategy.supports(self.general.format) {
            bail!(
                "The {} strategy only supports the files format (got {})",
                self.general.strategy,
                self.general.format
            );
        }
        if self.client.timeout_seconds == 0 {
            bail!("Client timeout must be at least 1 second");
        }
        if !self.client.endpoint.starts_with("http://")
            && !self.client.endpoint.starts_with("https://")
        {
            bail!("Endpoint must start with 'http://' or 'https://'");
        }
        Ok(())
    }

    /// Effective output path.
    pub fn output_path(&self) -> PathBuf {
        self.general
            .output
            .clone()
            .unwrap_or_else(|| self.general.format.default_path())
    }

    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            endpoint: self.client.endpoint.clone(),
            timeout: Duration::from_secs(self.client.timeout_seconds),
            user_agent: self.client.user_agent.clone(),
        }
    }

    pub fn read_options(&self) -> ReadOptions {
        ReadOptions {
            limit: self.input.limit,
            on_bad_score: self.input.on_bad_score,
        }
    }

    pub fn concurrency(&self) -> Concurrency {
        Concurrency::from_limit(self.dispatch.max_concurrency)
    }

    /// Log level after merging: `quiet` wins over a verbose config or flag.
    pub fn log_level(&self, quiet: bool) -> tracing::Level {
        if quiet {
            tracing::Level::ERROR
        } else if self.general.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        }
    }

    /// Generate a default configuration file content.
    pub fn default_toml() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config).unwrap_or_else(|_| String::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::tests::make_args;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.client.endpoint, DEFAULT_ENDPOINT);
        assert_eq!(config.client.timeout_seconds, 30);
        assert_eq!(config.general.format, OutputFormat::Files);
        assert_eq!(config.general.strategy, Strategy::Channel);
        assert_eq!(config.input.on_bad_score, BadScorePolicy::Abort);
        assert_eq!(config.concurrency(), Concurrency::Unbounded);
        assert_eq!(config.output_path(), PathBuf::from("results"));
    }

    #[test]
    fn test_parse_config() {
        let toml_content = r#"
[general]
output = "out/scorecards.csv"
format = "csv"
strategy = "collect"

[client]
endpoint = "http://localhost:8080/projects"
timeout_seconds = 5

[input]
limit = 1000
on_bad_score = "skip"

[dispatch]
max_concurrency = 16
"#;

        let config: Config = toml::from_str(toml_content).unwrap();
        assert_eq!(config.output_path(), PathBuf::from("out/scorecards.csv"));
        assert_eq!(config.general.format, OutputFormat::Csv);
        assert_eq!(config.general.strategy, Strategy::Collect);
        assert_eq!(config.client.timeout_seconds, 5);
        assert_eq!(config.read_options().limit, Some(1000));
        assert_eq!(config.read_options().on_bad_score, BadScorePolicy::Skip);
        assert_eq!(config.concurrency(), Concurrency::Bounded(16));
        assert_eq!(
            config.client_config().timeout,
            Duration::from_secs(5)
        );
    }

    #[test]
    fn test_per_item_strategy_parses_kebab_case() {
        let config: Config = toml::from_str("[general]\nstrategy = \"per-item\"\n").unwrap();
        assert_eq!(config.general.strategy, Strategy::PerItem);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_merge_only_overrides_given_flags() {
        let mut config: Config =
            toml::from_str("[client]\ntimeout_seconds = 90\n[dispatch]\nmax_concurrency = 4\n")
                .unwrap();

        let mut args = make_args();
        args.format = Some(OutputFormat::Json);
        config.merge_with_args(&args);

        assert_eq!(config.client.timeout_seconds, 90);
        assert_eq!(config.concurrency(), Concurrency::Bounded(4));
        assert_eq!(config.general.format, OutputFormat::Json);
        assert_eq!(config.output_path(), PathBuf::from("results.json"));

        args.timeout = Some(3);
        config.merge_with_args(&args);
        assert_eq!(config.client.timeout_seconds, 3);
    }

    #[test]
    fn test_log_level_from_config_and_flags() {
        let mut config = Config::default();
        let mut args = make_args();
        config.merge_with_args(&args);
        assert_eq!(config.log_level(args.quiet), tracing::Level::INFO);

        let mut config: Config = toml::from_str("[general]\nverbose = true\n").unwrap();
        config.merge_with_args(&args);
        assert_eq!(config.log_level(args.quiet), tracing::Level::DEBUG);
        assert_eq!(config.log_level(true), tracing::Level::ERROR);

        let mut config = Config::default();
        args.verbose = true;
        config.merge_with_args(&args);
        assert_eq!(config.log_level(args.quiet), tracing::Level::DEBUG);
    }

    #[test]
    fn test_validate_rejects_per_item_csv() {
        let mut config = Config::default();
        config.general.strategy = Strategy::PerItem;
        config.general.format = OutputFormat::Csv;
        assert!(config.validate().is_err());

        config.general.format = OutputFormat::Files;
        assert!(config.validate().is_ok());

        config.client.endpoint = "ftp://example.test".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_default_toml_generation() {
        let toml_str = Config::default_toml();
        assert!(!toml_str.is_empty());
        assert!(toml_str.contains("[general]"));
        assert!(toml_str.contains("[client]"));
        assert!(toml_str.contains("strategy = \"channel\""));

        let reparsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(reparsed.client.endpoint, DEFAULT_ENDPOINT);
    }
}
