//! Criticality table reader.
//!
//! The table is comma-delimited with a header row. The first field of each
//! data row is the repository locator and the last field is the criticality
//! score. Rows with an empty score are not dispatched.

use crate::error::InputError;
use crate::models::InputRecord;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use tracing::{debug, warn};

/// What to do with a score column that is present but not a finite number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum BadScorePolicy {
    /// Fail the whole batch before anything is dispatched.
    #[default]
    Abort,
    /// Log a warning and leave the row out.
    Skip,
}

/// Options controlling how the table is read.
#[derive(Debug, Clone, Default)]
pub struct ReadOptions {
    /// Maximum number of data rows to consider (skipped rows included).
    pub limit: Option<usize>,
    pub on_bad_score: BadScorePolicy,
}

/// Read the table at `path`.
pub fn read_table(path: &Path, options: &ReadOptions) -> Result<Vec<InputRecord>, InputError> {
    let file = File::open(path).map_err(|source| InputError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    parse_table(BufReader::new(file), options).map_err(|e| match e {
        InputError::Io { source, .. } => InputError::Io {
            path: path.to_path_buf(),
            source,
        },
        other => other,
    })
}

/// Parse a table from any buffered reader.
pub fn parse_table<R: BufRead>(
    reader: R,
    options: &ReadOptions,
) -> Result<Vec<InputRecord>, InputError> {
    let mut records = Vec::new();

    // Header row is discarded; rank counts data rows from 1.
    for (index, line) in reader.lines().enumerate().skip(1) {
        let rank = index;
        if options.limit.is_some_and(|limit| rank > limit) {
            break;
        }

        let line = line.map_err(|source| InputError::Io {
            path: Default::default(),
            source,
        })?;

        if let Some(record) = parse_row(&line, rank, options.on_bad_score)? {
            records.push(record);
        }
    }

    debug!("Parsed {} dispatchable records", records.len());
    Ok(records)
}

fn parse_row(
    line: &str,
    rank: usize,
    policy: BadScorePolicy,
) -> Result<Option<InputRecord>, InputError> {
    let line = line.trim_end_matches('\r');
    let line_number = rank + 1;

    let locator = line.split(',').next().unwrap_or("").trim();
    let score = line.rsplit(',').next().unwrap_or("").trim();

    if score.is_empty() {
        debug!("Line {}: no criticality score, skipping", line_number);
        return Ok(None);
    }

    let parsed = match score.parse::<f64>() {
        Ok(value) if value.is_finite() => Ok(value),
        Ok(_) => Err(InputError::NonFiniteScore {
            line: line_number,
            value: score.to_string(),
        }),
        Err(source) => Err(InputError::ParseScore {
            line: line_number,
            value: score.to_string(),
            source,
        }),
    };

    let criticality_score = match (parsed, policy) {
        (Ok(value), _) => value,
        (Err(e), BadScorePolicy::Abort) => return Err(e),
        (Err(e), BadScorePolicy::Skip) => {
            warn!("{}, skipping", e);
            return Ok(None);
        }
    };

    if locator.is_empty() {
        warn!("Line {}: empty repository locator, skipping", line_number);
        return Ok(None);
    }

    Ok(Some(InputRecord {
        locator: locator.to_string(),
        criticality_rank: rank as u32,
        criticality_score,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::io::Write;

    fn parse(table: &str, options: &ReadOptions) -> Result<Vec<InputRecord>, InputError> {
        parse_table(Cursor::new(table), options)
    }

    #[test]
    fn test_empty_score_rows_keep_their_position() {
        let table = "url,score\nhttps://github.com/a/b,0.5\nhttps://github.com/c/d,\nhttps://github.com/e/f,0.9";
        let records = parse(table, &ReadOptions::default()).unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].locator, "https://github.com/a/b");
        assert_eq!(records[0].criticality_rank, 1);
        assert_eq!(records[0].criticality_score, 0.5);
        assert_eq!(records[1].locator, "https://github.com/e/f");
        assert_eq!(records[1].criticality_rank, 3);
    }

    #[test]
    fn test_last_field_is_score_first_is_locator() {
        let table = "repo,language,stars,score\r\ngithub.com/x/y,Go,1200,0.81\r\n";
        let records = parse(table, &ReadOptions::default()).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].locator, "github.com/x/y");
        assert_eq!(records[0].criticality_score, 0.81);
    }

    #[test]
    fn test_bad_score_aborts_by_default() {
        let table = "url,score\ngithub.com/a/b,0.5\ngithub.com/c/d,high\n";
        let err = parse(table, &ReadOptions::default()).unwrap_err();
        match err {
            InputError::ParseScore { line, value, .. } => {
                assert_eq!(line, 3);
                assert_eq!(value, "high");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_bad_score_skip_policy() {
        let table = "url,score\ngithub.com/a/b,oops\ngithub.com/c/d,0.2\n";
        let options = ReadOptions {
            on_bad_score: BadScorePolicy::Skip,
            ..Default::default()
        };
        let records = parse(table, &options).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].criticality_rank, 2);
    }

    #[test]
    fn test_non_finite_scores_are_bad_scores() {
        let table = "url,score\ngithub.com/a/b,NaN\ngithub.com/c/d,inf\ngithub.com/e/f,-infinity\ngithub.com/g/h,0.7\n";

        let err = parse(table, &ReadOptions::default()).unwrap_err();
        match err {
            InputError::NonFiniteScore { line, value } => {
                assert_eq!(line, 2);
                assert_eq!(value, "NaN");
            }
            other => panic!("unexpected error: {other}"),
        }

        let options = ReadOptions {
            on_bad_score: BadScorePolicy::Skip,
            ..Default::default()
        };
        let records = parse(table, &options).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].criticality_rank, 4);
        assert!(records.iter().all(|r| r.criticality_score.is_finite()));
    }

    #[test]
    fn test_limit_counts_skipped_rows() {
        let table = "url,score\na/a,0.1\nb/b,\nc/c,0.3\nd/d,0.4\n";
        let options = ReadOptions {
            limit: Some(3),
            ..Default::default()
        };
        let records = parse(table, &options).unwrap();
        let ranks: Vec<u32> = records.iter().map(|r| r.criticality_rank).collect();
        assert_eq!(ranks, vec![1, 3]);
    }

    #[test]
    fn test_header_only_and_blank_lines() {
        assert!(parse("url,score\n", &ReadOptions::default())
            .unwrap()
            .is_empty());
        assert!(parse("", &ReadOptions::default()).unwrap().is_empty());

        let records = parse("url,score\n\ngithub.com/a/b,1\n", &ReadOptions::default()).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].criticality_rank, 2);
    }

    #[test]
    fn test_read_table_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "url,score\nhttps://github.com/a/b,0.25\n").unwrap();

        let records = read_table(file.path(), &ReadOptions::default()).unwrap();
        assert_eq!(records.len(), 1);

        let missing = read_table(Path::new("/nonexistent/table.csv"), &ReadOptions::default());
        assert!(matches!(missing, Err(InputError::Io { .. })));
    }
}
