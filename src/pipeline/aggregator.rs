//! Outcome aggregation.
//!
//! An [`Aggregator`] is opened before dispatch, hands out cloneable
//! [`OutcomeSink`]s to the fetch tasks, and is finalized once the
//! coordinator's completion barrier has released. Three strategies are
//! supported:
//!
//! - `per-item`: every task writes its own `<rank>.json`; nothing is shared.
//! - `collect`: successes are pushed into one mutex-guarded vector and
//!   written in a single pass at finalize.
//! - `channel`: tasks only enqueue; one blocking writer drains the queue and
//!   is the only code that touches the destination.

use crate::error::PersistError;
use crate::models::{BatchReport, FailedFetch, FetchOutcome, ScorecardResult};
use crate::output::{write_item_file, OutputFormat, OutputWriter};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

/// How completed outcomes reach the output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    /// Each task persists its own result immediately (files format only)
    PerItem,
    /// Mutex-guarded in-memory collection written once at the end
    Collect,
    /// Single writer task fed through a queue
    #[default]
    Channel,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Strategy::PerItem => write!(f, "per-item"),
            Strategy::Collect => write!(f, "collect"),
            Strategy::Channel => write!(f, "channel"),
        }
    }
}

impl Strategy {
    /// Whether this strategy can produce `format`.
    pub fn supports(&self, format: OutputFormat) -> bool {
        !matches!(self, Strategy::PerItem) || format == OutputFormat::Files
    }
}

/// Counters shared by whoever observes outcomes.
#[derive(Debug, Default)]
struct Tally {
    observed: AtomicUsize,
    succeeded: AtomicUsize,
    write_failures: AtomicUsize,
    failures: std::sync::Mutex<Vec<FailedFetch>>,
}

impl Tally {
    fn observe(&self) {
        self.observed.fetch_add(1, Ordering::SeqCst);
    }

    fn succeed(&self) {
        self.succeeded.fetch_add(1, Ordering::SeqCst);
    }

    fn write_failed(&self) {
        self.write_failures.fetch_add(1, Ordering::SeqCst);
    }

    fn record_failure(&self, failed: FailedFetch) {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(failed);
    }

    fn report(&self, output: PathBuf, started_at: chrono::DateTime<Utc>) -> BatchReport {
        let mut failures = self
            .failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        failures.sort_by_key(|f| f.criticality_rank);

        BatchReport {
            observed: self.observed.load(Ordering::SeqCst),
            succeeded: self.succeeded.load(Ordering::SeqCst),
            failures,
            write_failures: self.write_failures.load(Ordering::SeqCst),
            output,
            started_at,
            finished_at: Utc::now(),
        }
    }
}

#[derive(Clone)]
enum SinkInner {
    PerItem {
        dir: Arc<PathBuf>,
        tally: Arc<Tally>,
    },
    Collect {
        results: Arc<Mutex<Vec<ScorecardResult>>>,
        tally: Arc<Tally>,
    },
    Channel {
        tx: mpsc::UnboundedSender<FetchOutcome>,
    },
}

/// Producer-side handle given to each fetch task.
#[derive(Clone)]
pub struct OutcomeSink {
    inner: SinkInner,
}

impl OutcomeSink {
    /// Hand one completed outcome to the aggregator.
    pub async fn submit(&self, outcome: FetchOutcome) {
        match &self.inner {
            SinkInner::PerItem { dir, tally } => {
                tally.observe();
                match outcome {
                    FetchOutcome::Success(result) => {
                        let dir = Arc::clone(dir);
                        let rank = result.criticality_rank();
                        let written =
                            tokio::task::spawn_blocking(move || write_item_file(&dir, &result))
                                .await;
                        match written {
                            Ok(Ok(path)) => {
                                debug!("Wrote {}", path.display());
                                tally.succeed();
                            }
                            Ok(Err(e)) => {
                                warn!("Failed to persist result #{}: {}", rank, e);
                                tally.write_failed();
                            }
                            Err(e) => {
                                warn!("Write task for result #{} failed: {}", rank, e);
                                tally.write_failed();
                            }
                        }
                    }
                    FetchOutcome::Failure(failed) => tally.record_failure(failed),
                }
            }
            SinkInner::Collect { results, tally } => {
                tally.observe();
                match outcome {
                    // Lock is held for the push only.
                    FetchOutcome::Success(result) => results.lock().await.push(result),
                    FetchOutcome::Failure(failed) => tally.record_failure(failed),
                }
            }
            SinkInner::Channel { tx } => {
                let rank = outcome.criticality_rank();
                if tx.send(outcome).is_err() {
                    error!("Output writer is gone; outcome #{} dropped", rank);
                }
            }
        }
    }
}

enum Finalizer {
    PerItem {
        tally: Arc<Tally>,
    },
    Collect {
        results: Arc<Mutex<Vec<ScorecardResult>>>,
        tally: Arc<Tally>,
        writer: OutputWriter,
    },
    Channel {
        writer: JoinHandle<Result<(Tally, PathBuf), PersistError>>,
    },
}

/// Fan-in point for fetch outcomes.
pub struct Aggregator {
    strategy: Strategy,
    output: PathBuf,
    started_at: chrono::DateTime<Utc>,
    sink: OutcomeSink,
    finalizer: Finalizer,
}

impl Aggregator {
    /// Open the output and set up the chosen strategy.
    ///
    /// Must be called from within a Tokio runtime: the channel strategy
    /// starts its writer task here.
    pub fn open(
        strategy: Strategy,
        format: OutputFormat,
        output: &Path,
    ) -> Result<Self, PersistError> {
        if !strategy.supports(format) {
            return Err(PersistError::IncompatibleFormat {
                strategy: strategy.to_string(),
                format: format.to_string(),
            });
        }

        let writer = OutputWriter::open(format, output)?;

        let (sink, finalizer) = match strategy {
            Strategy::PerItem => {
                // The directory already exists; tasks write into it directly.
                drop(writer);
                let tally = Arc::new(Tally::default());
                (
                    SinkInner::PerItem {
                        dir: Arc::new(output.to_path_buf()),
                        tally: Arc::clone(&tally),
                    },
                    Finalizer::PerItem { tally },
                )
            }
            Strategy::Collect => {
                let results = Arc::new(Mutex::new(Vec::new()));
                let tally = Arc::new(Tally::default());
                (
                    SinkInner::Collect {
                        results: Arc::clone(&results),
                        tally: Arc::clone(&tally),
                    },
                    Finalizer::Collect {
                        results,
                        tally,
                        writer,
                    },
                )
            }
            Strategy::Channel => {
                let (tx, rx) = mpsc::unbounded_channel();
                let writer = tokio::task::spawn_blocking(move || drain_queue(rx, writer));
                (SinkInner::Channel { tx }, Finalizer::Channel { writer })
            }
        };

        debug!(
            "Aggregator open: strategy={}, format={}, output={}",
            strategy,
            format,
            output.display()
        );

        Ok(Self {
            strategy,
            output: output.to_path_buf(),
            started_at: Utc::now(),
            sink: OutcomeSink { inner: sink },
            finalizer,
        })
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    /// A producer handle. Every clone must be dropped before [`finalize`]
    /// can complete under the channel strategy.
    ///
    /// [`finalize`]: Aggregator::finalize
    pub fn sink(&self) -> OutcomeSink {
        self.sink.clone()
    }

    /// Flush and close the output. Call only after every fetch has reported.
    pub async fn finalize(self) -> Result<BatchReport, PersistError> {
        let Aggregator {
            output,
            started_at,
            sink,
            finalizer,
            ..
        } = self;

        // Closes the queue once the task-held clones are gone.
        drop(sink);

        match finalizer {
            Finalizer::PerItem { tally } => Ok(tally.report(output, started_at)),
            Finalizer::Collect {
                results,
                tally,
                mut writer,
            } => {
                let mut results = std::mem::take(&mut *results.lock().await);
                results.sort_by_key(|r| r.criticality_rank());

                for result in &results {
                    match writer.write(result) {
                        Ok(()) => tally.succeed(),
                        Err(e) => {
                            warn!(
                                "Failed to persist result #{}: {}",
                                result.criticality_rank(),
                                e
                            );
                            tally.write_failed();
                        }
                    }
                }

                debug!("Collected {} results for writing", writer.written());
                let path = writer.finish()?;
                Ok(tally.report(path, started_at))
            }
            Finalizer::Channel { writer } => {
                let (tally, path) = writer
                    .await
                    .map_err(|e| PersistError::WriterTask(e.to_string()))??;
                Ok(tally.report(path, started_at))
            }
        }
    }
}

/// Body of the single writer: drain until every sender is dropped.
fn drain_queue(
    mut rx: mpsc::UnboundedReceiver<FetchOutcome>,
    mut writer: OutputWriter,
) -> Result<(Tally, PathBuf), PersistError> {
    let tally = Tally::default();

    while let Some(outcome) = rx.blocking_recv() {
        tally.observe();
        match outcome {
            FetchOutcome::Success(result) => match writer.write(&result) {
                Ok(()) => tally.succeed(),
                Err(e) => {
                    warn!(
                        "Failed to persist result #{}: {}",
                        result.criticality_rank(),
                        e
                    );
                    tally.write_failed();
                }
            },
            FetchOutcome::Failure(failed) => tally.record_failure(failed),
        }
    }

    debug!("Output queue closed after {} outcomes", tally.observed.load(Ordering::SeqCst));
    let path = writer.finish()?;
    Ok((tally, path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Check, RepoInfo};
    use crate::output::CSV_HEADER;
    use std::fs;
    use tempfile::TempDir;

    fn scorecard(rank: u32) -> ScorecardResult {
        ScorecardResult {
            repo: RepoInfo {
                name: format!("github.com/org/repo{rank}"),
                commit: None,
                criticality_score: 0.0,
                criticality_rank: 0,
            },
            score: 4.0,
            date: None,
            checks: vec![Check {
                name: "Maintained".to_string(),
                score: Some(7),
            }],
        }
        .stamp(rank as f64 / 10.0, rank)
    }

    fn failure(rank: u32) -> FetchOutcome {
        FetchOutcome::Failure(FailedFetch {
            identifier: format!("github.com/org/gone{rank}"),
            criticality_rank: rank,
            cause: "connection refused".to_string(),
        })
    }

    /// Submit from many concurrent tasks, in reverse rank order.
    async fn submit_concurrently(aggregator: &Aggregator, outcomes: Vec<FetchOutcome>) {
        let mut tasks = tokio::task::JoinSet::new();
        for outcome in outcomes.into_iter().rev() {
            let sink = aggregator.sink();
            tasks.spawn(async move {
                tokio::task::yield_now().await;
                sink.submit(outcome).await;
            });
        }
        while let Some(joined) = tasks.join_next().await {
            joined.unwrap();
        }
    }

    fn mixed_outcomes(successes: u32, failures: u32) -> Vec<FetchOutcome> {
        let mut outcomes: Vec<FetchOutcome> = (1..=successes)
            .map(|rank| FetchOutcome::Success(scorecard(rank)))
            .collect();
        outcomes.extend((successes + 1..=successes + failures).map(failure));
        outcomes
    }

    #[test]
    fn test_per_item_requires_files_format() {
        assert!(Strategy::PerItem.supports(OutputFormat::Files));
        assert!(!Strategy::PerItem.supports(OutputFormat::Csv));
        assert!(Strategy::Channel.supports(OutputFormat::Json));
        assert!(Strategy::Collect.supports(OutputFormat::Csv));
    }

    #[tokio::test]
    async fn test_per_item_rejects_bulk_format() {
        let dir = TempDir::new().unwrap();
        let result = Aggregator::open(
            Strategy::PerItem,
            OutputFormat::Json,
            &dir.path().join("r.json"),
        );
        assert!(matches!(
            result,
            Err(PersistError::IncompatibleFormat { .. })
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_per_item_writes_one_file_per_success() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("results");
        let aggregator = Aggregator::open(Strategy::PerItem, OutputFormat::Files, &out).unwrap();

        submit_concurrently(&aggregator, mixed_outcomes(5, 2)).await;
        let report = aggregator.finalize().await.unwrap();

        assert_eq!(report.observed, 7);
        assert_eq!(report.succeeded, 5);
        assert_eq!(report.failures.len(), 2);
        assert_eq!(report.write_failures, 0);
        assert_eq!(fs::read_dir(&out).unwrap().count(), 5);
        assert!(out.join("3.json").exists());
        assert!(!out.join("6.json").exists());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_collect_keeps_every_success_and_sorts_by_rank() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("results.json");
        let aggregator = Aggregator::open(Strategy::Collect, OutputFormat::Json, &path).unwrap();

        submit_concurrently(&aggregator, mixed_outcomes(50, 10)).await;
        let report = aggregator.finalize().await.unwrap();

        assert_eq!(report.observed, 60);
        assert_eq!(report.succeeded, 50);
        assert_eq!(report.failures.len(), 10);
        assert_eq!(report.failures[0].criticality_rank, 51);

        let parsed: Vec<ScorecardResult> =
            serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        assert_eq!(parsed.len(), 50);
        let ranks: Vec<u32> = parsed.iter().map(|r| r.criticality_rank()).collect();
        assert_eq!(ranks, (1..=50).collect::<Vec<_>>());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_channel_csv_single_writer() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("results.csv");
        let aggregator = Aggregator::open(Strategy::Channel, OutputFormat::Csv, &path).unwrap();
        assert_eq!(aggregator.strategy(), Strategy::Channel);

        submit_concurrently(&aggregator, mixed_outcomes(20, 3)).await;
        let report = aggregator.finalize().await.unwrap();

        assert_eq!(report.observed, 23);
        assert_eq!(report.succeeded, 20);
        assert_eq!(report.output, path);

        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 21);
        assert_eq!(lines[0], CSV_HEADER);
        assert!(lines.iter().all(|l| l.split(',').count() == 4));
    }

    #[tokio::test]
    async fn test_channel_with_no_outcomes_finalizes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("results.json");
        let aggregator = Aggregator::open(Strategy::Channel, OutputFormat::Json, &path).unwrap();

        let report = aggregator.finalize().await.unwrap();
        assert_eq!(report.observed, 0);
        assert_eq!(fs::read_to_string(&path).unwrap().trim(), "[]");
    }

    #[tokio::test]
    async fn test_collect_write_failures_are_counted() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("results");
        let aggregator = Aggregator::open(Strategy::Collect, OutputFormat::Files, &out).unwrap();

        let sink = aggregator.sink();
        sink.submit(FetchOutcome::Success(scorecard(1))).await;
        sink.submit(FetchOutcome::Success(scorecard(2))).await;
        drop(sink);

        // Pull the directory out from under the writer.
        fs::remove_dir_all(&out).unwrap();

        let report = aggregator.finalize().await.unwrap();
        assert_eq!(report.observed, 2);
        assert_eq!(report.succeeded, 0);
        assert_eq!(report.write_failures, 2);
    }
}
