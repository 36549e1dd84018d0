//! Output writers for aggregated scorecards.
//!
//! JSON outputs are written through a temp file in the destination directory
//! and renamed into place, so a crash never leaves a half-written unit. CSV
//! rows are written whole and flushed one at a time by a single owner.

use crate::error::PersistError;
use crate::models::{FailedFetch, ScorecardResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::debug;

/// Header row of the CSV output.
pub const CSV_HEADER: &str = "Name,Maintained,CodeReview,Criticality";

/// Output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// One `<rank>.json` file per scorecard in a directory
    #[default]
    Files,
    /// A single JSON array, sorted by criticality rank
    Json,
    /// An append-only CSV table
    Csv,
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputFormat::Files => write!(f, "files"),
            OutputFormat::Json => write!(f, "json"),
            OutputFormat::Csv => write!(f, "csv"),
        }
    }
}

impl OutputFormat {
    /// Default destination for this format.
    pub fn default_path(&self) -> PathBuf {
        match self {
            OutputFormat::Files => PathBuf::from("results"),
            OutputFormat::Json => PathBuf::from("results.json"),
            OutputFormat::Csv => PathBuf::from("results.csv"),
        }
    }
}

enum Destination {
    Files,
    Json(Vec<ScorecardResult>),
    Csv(BufWriter<File>),
}

/// Sole owner of an output destination.
pub struct OutputWriter {
    path: PathBuf,
    destination: Destination,
    written: usize,
}

impl OutputWriter {
    /// Prepare the destination: create the directory, or open the CSV for
    /// appending and emit the header if the file is new or empty.
    pub fn open(format: OutputFormat, path: &Path) -> Result<Self, PersistError> {
        let destination = match format {
            OutputFormat::Files => {
                fs::create_dir_all(path).map_err(|e| PersistError::io(path, e))?;
                Destination::Files
            }
            OutputFormat::Json => {
                ensure_parent(path)?;
                Destination::Json(Vec::new())
            }
            OutputFormat::Csv => Destination::Csv(open_csv(path)?),
        };

        debug!("Opened {} output at {}", format, path.display());

        Ok(Self {
            path: path.to_path_buf(),
            destination,
            written: 0,
        })
    }

    /// Persist (or buffer, for bulk JSON) one scorecard.
    pub fn write(&mut self, result: &ScorecardResult) -> Result<(), PersistError> {
        match &mut self.destination {
            Destination::Files => {
                write_item_file(&self.path, result)?;
            }
            Destination::Json(buffer) => buffer.push(result.clone()),
            Destination::Csv(out) => {
                writeln!(out, "{}", csv_row(result))
                    .and_then(|_| out.flush())
                    .map_err(|e| PersistError::io(&self.path, e))?;
            }
        }
        self.written += 1;
        Ok(())
    }

    /// Number of scorecards accepted so far.
    pub fn written(&self) -> usize {
        self.written
    }

    /// Flush and close the destination, returning its path.
    pub fn finish(self) -> Result<PathBuf, PersistError> {
        match self.destination {
            Destination::Files => {}
            Destination::Json(mut results) => {
                results.sort_by_key(|r| r.criticality_rank());
                let content = serde_json::to_vec_pretty(&results)?;
                write_atomic(&self.path, &content)?;
            }
            Destination::Csv(mut out) => {
                out.flush().map_err(|e| PersistError::io(&self.path, e))?;
            }
        }
        Ok(self.path)
    }
}

/// Write `<dir>/<rank>.json` atomically.
pub fn write_item_file(dir: &Path, result: &ScorecardResult) -> Result<PathBuf, PersistError> {
    let path = dir.join(format!("{}.json", result.criticality_rank()));
    let content = serde_json::to_vec_pretty(result)?;
    write_atomic(&path, &content)?;
    Ok(path)
}

/// Write the failed fetches as a JSON array.
pub fn write_failures_file(path: &Path, failures: &[FailedFetch]) -> Result<(), PersistError> {
    ensure_parent(path)?;
    let content = serde_json::to_vec_pretty(failures)?;
    write_atomic(path, &content)
}

/// Format one CSV row: name, Maintained score, Code-Review score, criticality.
pub fn csv_row(result: &ScorecardResult) -> String {
    let score = |name: &str| {
        result
            .check_score(name)
            .map(|s| s.to_string())
            .unwrap_or_default()
    };

    [
        csv_field(&result.repo.name),
        score("Maintained"),
        score("Code-Review"),
        result.repo.criticality_score.to_string(),
    ]
    .join(",")
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

fn open_csv(path: &Path) -> Result<BufWriter<File>, PersistError> {
    ensure_parent(path)?;

    let mut file = OpenOptions::new()
        .create(true)
        .read(true)
        .append(true)
        .open(path)
        .map_err(|e| PersistError::io(path, e))?;

    let len = file
        .metadata()
        .map_err(|e| PersistError::io(path, e))?
        .len();

    // An existing table without a final newline would tear our first row.
    let unterminated = len > 0 && {
        let mut last = [0u8; 1];
        file.seek(SeekFrom::End(-1))
            .and_then(|_| file.read_exact(&mut last))
            .map_err(|e| PersistError::io(path, e))?;
        last[0] != b'\n'
    };

    let mut out = BufWriter::new(file);
    let lead = if len == 0 {
        Some(format!("{}\n", CSV_HEADER))
    } else if unterminated {
        Some("\n".to_string())
    } else {
        None
    };
    if let Some(lead) = lead {
        out.write_all(lead.as_bytes())
            .and_then(|_| out.flush())
            .map_err(|e| PersistError::io(path, e))?;
    }
    Ok(out)
}

fn ensure_parent(path: &Path) -> Result<(), PersistError> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => {
            fs::create_dir_all(parent).map_err(|e| PersistError::io(parent, e))
        }
        _ => Ok(()),
    }
}

/// Write to a temp file next to `path`, then rename over it.
fn write_atomic(path: &Path, content: &[u8]) -> Result<(), PersistError> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let mut tmp = NamedTempFile::new_in(dir).map_err(|e| PersistError::io(path, e))?;
    tmp.write_all(content)
        .and_then(|_| tmp.flush())
        .map_err(|e| PersistError::io(path, e))?;
    tmp.persist(path)
        .map_err(|e| PersistError::io(path, e.error))?;
    Ok(())
}
