//! Data models for the scorecard crawler.
//!
//! This module contains the records flowing through the pipeline: the input
//! rows, the decoded scorecards, the per-fetch outcomes and the batch report.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// One row of the input table that will be dispatched.
#[derive(Debug, Clone, PartialEq)]
pub struct InputRecord {
    /// Repository locator as it appears in the table (scheme may be present).
    pub locator: String,
    /// 1-based position of the row in the table.
    pub criticality_rank: u32,
    /// Ecosystem importance score from the trailing column.
    pub criticality_score: f64,
}

/// Repository section of a scorecard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepoInfo {
    /// Repository name as reported by the service (e.g. `github.com/a/b`).
    pub name: String,
    /// Commit the scorecard was computed against.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit: Option<String>,
    /// Criticality score stamped from the input table.
    #[serde(rename = "criticalityScore", default)]
    pub criticality_score: f64,
    /// Criticality rank stamped from the input table.
    #[serde(rename = "criticality", default)]
    pub criticality_rank: u32,
}

/// A single named sub-check of a scorecard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Check {
    pub name: String,
    /// `None` means the check was not evaluated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<i64>,
}

/// A decoded scorecard with the criticality fields attached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScorecardResult {
    pub repo: RepoInfo,
    /// Overall aggregate score.
    pub score: f64,
    /// Date the scorecard was produced.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(default)]
    pub checks: Vec<Check>,
}

impl ScorecardResult {
    /// Attach the input row's criticality metadata.
    pub fn stamp(mut self, criticality_score: f64, criticality_rank: u32) -> Self {
        self.repo.criticality_score = criticality_score;
        self.repo.criticality_rank = criticality_rank;
        self
    }

    pub fn criticality_rank(&self) -> u32 {
        self.repo.criticality_rank
    }

    /// Score of the named check, if present and evaluated.
    pub fn check_score(&self, name: &str) -> Option<i64> {
        self.checks
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
            .and_then(|c| c.score)
    }
}

/// A fetch that did not produce a scorecard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedFetch {
    pub identifier: String,
    pub criticality_rank: u32,
    pub cause: String,
}

impl fmt::Display for FailedFetch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#{} {}: {}",
            self.criticality_rank, self.identifier, self.cause
        )
    }
}

/// Result of one dispatched fetch. Exactly one per dispatched record.
#[derive(Debug, Clone)]
pub enum FetchOutcome {
    Success(ScorecardResult),
    Failure(FailedFetch),
}

impl FetchOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, FetchOutcome::Success(_))
    }

    pub fn criticality_rank(&self) -> u32 {
        match self {
            FetchOutcome::Success(result) => result.criticality_rank(),
            FetchOutcome::Failure(failed) => failed.criticality_rank,
        }
    }
}

/// Summary of a finished batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchReport {
    /// Number of outcomes the aggregator observed.
    pub observed: usize,
    /// Number of scorecards that reached the output.
    pub succeeded: usize,
    /// Fetches that failed, sorted by rank.
    pub failures: Vec<FailedFetch>,
    /// Output units that could not be persisted.
    pub write_failures: usize,
    /// Final output location (file or directory).
    pub output: PathBuf,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl BatchReport {
    /// Seconds between aggregator construction and finalize.
    pub fn duration_seconds(&self) -> f64 {
        (self.finished_at - self.started_at).num_milliseconds() as f64 / 1000.0
    }
}
