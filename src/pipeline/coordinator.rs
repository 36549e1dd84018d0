//! Fetch fan-out and the completion barrier.
//!
//! One task is spawned per input record. Each task fetches, stamps the
//! criticality metadata, and submits exactly one [`FetchOutcome`] to the
//! aggregator, whether the fetch succeeded, failed or panicked.

use crate::client::ScorecardSource;
use crate::models::{FailedFetch, FetchOutcome, InputRecord};
use crate::pipeline::aggregator::OutcomeSink;
use futures::FutureExt;
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Admission policy for fetch tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Concurrency {
    /// Every record's fetch starts immediately.
    #[default]
    Unbounded,
    /// At most `n` fetches are on the wire at once.
    Bounded(usize),
}

impl Concurrency {
    /// `None` or zero means unbounded.
    pub fn from_limit(limit: Option<usize>) -> Self {
        match limit {
            Some(n) if n > 0 => Concurrency::Bounded(n),
            _ => Concurrency::Unbounded,
        }
    }
}

/// Counts reported by [`FetchCoordinator::run`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    pub dispatched: usize,
    pub succeeded: usize,
    pub failed: usize,
}

/// Number of launched tasks that have not yet completed.
#[derive(Debug, Default)]
struct InFlight(AtomicUsize);

impl InFlight {
    fn enter(self: &Arc<Self>) -> InFlightGuard {
        self.0.fetch_add(1, Ordering::SeqCst);
        InFlightGuard(Arc::clone(self))
    }

    fn current(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

/// Decrements the in-flight count when the owning task ends, on any path.
struct InFlightGuard(Arc<InFlight>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0 .0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Strip a `scheme://` prefix and any trailing slash from a locator.
pub fn strip_scheme(locator: &str) -> &str {
    let rest = match locator.find("://") {
        Some(idx) => &locator[idx + 3..],
        None => locator,
    };
    rest.trim_end_matches('/')
}

/// Launches one fetch task per record and waits for all of them.
pub struct FetchCoordinator {
    source: Arc<dyn ScorecardSource>,
    concurrency: Concurrency,
    in_flight: Arc<InFlight>,
    show_progress: bool,
}

impl FetchCoordinator {
    pub fn new(source: Arc<dyn ScorecardSource>, concurrency: Concurrency) -> Self {
        Self {
            source,
            concurrency,
            in_flight: Arc::new(InFlight::default()),
            show_progress: false,
        }
    }

    /// Show a progress bar while fetching.
    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    /// Tasks launched but not yet completed.
    pub fn in_flight(&self) -> usize {
        self.in_flight.current()
    }

    /// Dispatch every record and block until each task has reported.
    ///
    /// Every dispatched record produces exactly one outcome on `sink`. A
    /// failing fetch never affects its siblings.
    pub async fn run(&self, records: Vec<InputRecord>, sink: &OutcomeSink) -> DispatchSummary {
        let total = records.len();
        info!("Dispatching {} fetches ({:?})", total, self.concurrency);

        let progress = self.progress_bar(total as u64);
        let semaphore = match self.concurrency {
            Concurrency::Bounded(n) => Some(Arc::new(Semaphore::new(n))),
            Concurrency::Unbounded => None,
        };

        // Records whose task has not yet reported, by rank.
        let mut unreported: BTreeMap<u32, String> = records
            .iter()
            .map(|r| (r.criticality_rank, strip_scheme(&r.locator).to_string()))
            .collect();

        let mut tasks = JoinSet::new();
        for record in records {
            let guard = self.in_flight.enter();
            let source = Arc::clone(&self.source);
            let sink = sink.clone();
            let semaphore = semaphore.clone();

            tasks.spawn(async move {
                let _guard = guard;
                let _permit = match semaphore {
                    Some(sem) => sem.acquire_owned().await.ok(),
                    None => None,
                };

                let outcome = fetch_one(source.as_ref(), &record).await;
                let succeeded = outcome.is_success();
                sink.submit(outcome).await;
                (record.criticality_rank, succeeded)
            });
        }

        let mut summary = DispatchSummary {
            dispatched: total,
            ..Default::default()
        };

        // Completion barrier.
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((rank, succeeded)) => {
                    unreported.remove(&rank);
                    if succeeded {
                        summary.succeeded += 1;
                    } else {
                        summary.failed += 1;
                    }
                }
                Err(e) => {
                    error!("Fetch task did not complete: {}", e);
                    summary.failed += 1;
                }
            }
            progress.inc(1);
        }

        progress.finish_and_clear();

        // A task that died outside the fetch never reached the sink.
        for (rank, identifier) in unreported {
            warn!("#{} {}: fetch task did not complete", rank, identifier);
            sink.submit(FetchOutcome::Failure(FailedFetch {
                identifier,
                criticality_rank: rank,
                cause: "fetch task did not complete".to_string(),
            }))
            .await;
        }

        if self.in_flight() != 0 {
            error!(
                "{} fetch tasks still marked in flight after the barrier",
                self.in_flight()
            );
        }

        info!(
            "All {} fetches reported: {} succeeded, {} failed",
            summary.dispatched, summary.succeeded, summary.failed
        );
        summary
    }

    fn progress_bar(&self, len: u64) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }

        let pb = ProgressBar::new(len);
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})")
        {
            pb.set_style(style.progress_chars("#>-"));
        }
        pb
    }
}

/// Fetch one record and turn the result into an outcome. A panic inside the
/// source is reported as a failure so the record is not lost.
async fn fetch_one(source: &dyn ScorecardSource, record: &InputRecord) -> FetchOutcome {
    let identifier = strip_scheme(&record.locator);
    let rank = record.criticality_rank;

    let fetched = AssertUnwindSafe(source.fetch(identifier))
        .catch_unwind()
        .await;

    let cause = match fetched {
        Ok(Ok(result)) => {
            debug!("#{} {}: score {}", rank, identifier, result.score);
            return FetchOutcome::Success(result.stamp(record.criticality_score, rank));
        }
        Ok(Err(e)) => e.to_string(),
        Err(_) => "fetch task panicked".to_string(),
    };

    warn!("#{} {}: {}", rank, identifier, cause);
    FetchOutcome::Failure(FailedFetch {
        identifier: identifier.to_string(),
        criticality_rank: rank,
        cause,
    })
}
