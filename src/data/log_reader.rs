//! Reads a session log back into ordered entries.
//!
//! Used to hand the persisted values to the plotter. Lines written by older tooling with
//! a `Date and Time: ` prefix on the timestamp are accepted too.

use super::storage::FAILURE_MARKER;
use crate::error::{AppResult, ScanError};
use crate::measurement::MeasurementKind;
use std::io::Read;
use std::path::Path;

const LEGACY_TIMESTAMP_PREFIX: &str = "Date and Time:";

/// Payload of one log line.
#[derive(Debug, Clone, PartialEq)]
pub enum LogEntry {
    /// A measured value.
    Value(f64),
    /// A failure marker, with the text after `FAILED`.
    Failure(String),
}

/// One parsed log line.
#[derive(Debug, Clone, PartialEq)]
pub struct LogLine {
    /// Timestamp text as written.
    pub timestamp: String,
    /// Value or failure marker.
    pub entry: LogEntry,
}

/// Parse log lines from any reader.
pub fn parse_log<R: Read>(source: R) -> AppResult<Vec<LogLine>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(source);

    let mut lines = Vec::new();
    for (index, row) in reader.records().enumerate() {
        let row = row.map_err(std::io::Error::from)?;
        if row.iter().all(str::is_empty) {
            continue;
        }
        if row.len() != 2 {
            return Err(ScanError::Protocol(format!(
                "Log line {} has {} fields, expected 2",
                index + 1,
                row.len()
            )));
        }
        let timestamp = row[0]
            .strip_prefix(LEGACY_TIMESTAMP_PREFIX)
            .unwrap_or(&row[0])
            .trim()
            .to_string();
        let field = &row[1];
        let entry = if let Some(rest) = field.strip_prefix(FAILURE_MARKER) {
            LogEntry::Failure(rest.trim().to_string())
        } else {
            let value = field.parse::<f64>().map_err(|_| {
                ScanError::Protocol(format!(
                    "Log line {}: '{}' is neither a value nor a failure marker",
                    index + 1,
                    field
                ))
            })?;
            LogEntry::Value(value)
        };
        lines.push(LogLine { timestamp, entry });
    }
    Ok(lines)
}

/// Parse the log file at `path`.
pub fn read_log(path: impl AsRef<Path>) -> AppResult<Vec<LogLine>> {
    let file = std::fs::File::open(path.as_ref())?;
    parse_log(file)
}

/// Measured values in log order, failure markers skipped.
pub fn values(lines: &[LogLine]) -> Vec<f64> {
    lines
        .iter()
        .filter_map(|line| match line.entry {
            LogEntry::Value(value) => Some(value),
            LogEntry::Failure(_) => None,
        })
        .collect()
}

/// Samples by log position, `None` where a failure marker holds the slot.
///
/// With `kind` set, only that kind's rows are kept. Records are always three rows in scan
/// order, so a row's kind is its position modulo three.
pub fn series(lines: &[LogLine], kind: Option<MeasurementKind>) -> Vec<Option<f64>> {
    let slot = kind.and_then(|k| MeasurementKind::SCAN_ORDER.iter().position(|&o| o == k));
    lines
        .iter()
        .enumerate()
        .filter(|(index, _)| slot.map_or(true, |slot| index % 3 == slot))
        .map(|(_, line)| match line.entry {
            LogEntry::Value(value) => Some(value),
            LogEntry::Failure(_) => None,
        })
        .collect()
}
