//! Error types for the fetch-aggregate pipeline.
//!
//! Each stage has its own error enum so that the coordinator can tell a
//! batch-fatal input problem apart from failures scoped to a single record.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while reading the input table.
#[derive(Debug, Error)]
pub enum InputError {
    /// The input file could not be opened or read.
    #[error("failed to read input table {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The trailing criticality score column is not a valid float.
    #[error("invalid criticality score {value:?} on line {line}: {source}")]
    ParseScore {
        line: usize,
        value: String,
        #[source]
        source: std::num::ParseFloatError,
    },

    /// The score parsed but is NaN or infinite.
    #[error("criticality score {value:?} on line {line} is not a finite number")]
    NonFiniteScore { line: usize, value: String },
}

/// Errors scoped to a single scorecard lookup.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The request never produced a response (connect, DNS, timeout).
    #[error("transport error fetching {identifier}: {source}")]
    Transport {
        identifier: String,
        #[source]
        source: reqwest::Error,
    },

    /// The service answered with a non-success status.
    #[error("scorecard service returned {status} for {identifier}")]
    Status {
        identifier: String,
        status: reqwest::StatusCode,
    },

    /// The response body does not have the scorecard shape.
    #[error("could not decode scorecard for {identifier}: {reason}")]
    Decode { identifier: String, reason: String },
}

/// Errors raised while persisting aggregated output.
#[derive(Debug, Error)]
pub enum PersistError {
    /// Filesystem failure on an output unit.
    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A result could not be serialized.
    #[error("failed to serialize output: {0}")]
    Serialize(#[from] serde_json::Error),

    /// The dedicated writer task died before reporting.
    #[error("output writer task failed: {0}")]
    WriterTask(String),

    /// The aggregation strategy cannot produce the requested format.
    #[error("the {strategy} strategy cannot produce {format} output")]
    IncompatibleFormat { strategy: String, format: String },
}

impl PersistError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PersistError::Io {
            path: path.into(),
            source,
        }
    }
}
