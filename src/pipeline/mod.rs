//! The fetch-aggregate pipeline.
//!
//! [`FetchCoordinator`] fans fetches out, one task per record, and
//! [`Aggregator`] fans their outcomes back in.

pub mod aggregator;
pub mod coordinator;

pub use aggregator::{Aggregator, OutcomeSink, Strategy};
pub use coordinator::{strip_scheme, Concurrency, DispatchSummary, FetchCoordinator};
