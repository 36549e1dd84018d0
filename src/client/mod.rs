//! Remote scorecard lookups.
//!
//! This module provides the HTTP client for the scorecard service and the
//! trait the fetch coordinator is written against.

pub mod scorecard;

pub use scorecard::{ClientConfig, ScorecardClient, ScorecardSource};
