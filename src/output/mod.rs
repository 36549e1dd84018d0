//! Output persistence.
//!
//! This module serializes scorecards into per-item JSON files, a bulk JSON
//! array or an append-only CSV table.

pub mod writer;

pub use writer::*;
