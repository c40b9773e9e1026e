//! Session log: the durable, append-only record of a scan.
//!
//! Each [`ScanRecord`] becomes three CSV rows, one per kind in voltage, current, resistance
//! order, formatted as `<timestamp>, <value>`. A reading that failed under the skip policy
//! is written in its slot as `<timestamp>, FAILED <channel> <kind> <failure-kind>`.
//!
//! The file is opened in append mode and never truncated past what this session wrote.
//! `append` writes a whole record and syncs it to storage before returning, so a crash can
//! lose at most the channel in progress, never one that was already committed. A record
//! that fails halfway is rolled back to the previous end of file.

use crate::error::{AppResult, ScanError};
use crate::measurement::{ReadingSlot, ScanRecord};
use chrono::{DateTime, Local};
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Timestamp layout used for every log line.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

/// Prefix of failure-marker lines.
pub const FAILURE_MARKER: &str = "FAILED";

/// What remains after a log has been closed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogSummary {
    /// Backing file, if the log is file based.
    pub path: Option<PathBuf>,
    /// Lines written during this session, markers included.
    pub entries: usize,
}

/// Append-only store for scan records. The sequencer is its only writer.
pub trait SessionLog {
    /// Durably commit one record before returning.
    fn append(&mut self, record: &ScanRecord) -> AppResult<()>;

    /// Flush and close the log.
    fn finalize(&mut self) -> AppResult<LogSummary>;

    /// Lines written so far in this session.
    fn entries_written(&self) -> usize;
}

/// Byte storage under a [`CsvSessionLog`].
pub trait LogSink: Write {
    /// Current length; a failed record is rolled back to this.
    fn committed_len(&self) -> io::Result<u64>;

    /// Cut the storage back to `len` bytes.
    fn truncate(&mut self, len: u64) -> io::Result<()>;

    /// Push written bytes to durable storage.
    fn sync(&self) -> io::Result<()>;
}

impl LogSink for File {
    fn committed_len(&self) -> io::Result<u64> {
        Ok(self.metadata()?.len())
    }

    fn truncate(&mut self, len: u64) -> io::Result<()> {
        self.set_len(len)
    }

    fn sync(&self) -> io::Result<()> {
        self.sync_data()
    }
}

/// Format a value so that parsing it back yields the same `f64`.
pub fn format_value(value: f64) -> String {
    let magnitude = value.abs();
    if value != 0.0 && (magnitude >= 1e15 || magnitude < 1e-5) {
        format!("{:e}", value)
    } else {
        format!("{}", value)
    }
}

fn format_slot(slot: &ReadingSlot) -> String {
    match slot {
        ReadingSlot::Measured(reading) => format_value(reading.value),
        ReadingSlot::Failed(failure) => format!(
            "{} {} {} {}",
            FAILURE_MARKER, failure.channel, failure.kind, failure.failure
        ),
    }
}

/// Encode the rows for one record, all stamped with `appended_at`.
pub fn encode_record(record: &ScanRecord, appended_at: DateTime<Local>) -> AppResult<Vec<u8>> {
    let stamp = appended_at.format(TIMESTAMP_FORMAT).to_string();
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(Vec::new());
    for slot in record.slots() {
        let field = format!(" {}", format_slot(slot));
        writer
            .write_record([stamp.as_str(), field.as_str()])
            .map_err(|e| ScanError::Logging(format!("Failed to encode {}: {}", record.channel, e)))?;
    }
    writer
        .into_inner()
        .map_err(|e| ScanError::Logging(format!("Failed to encode {}: {}", record.channel, e.error())))
}

fn commit<S: LogSink>(sink: &mut S, bytes: &[u8]) -> io::Result<()> {
    sink.write_all(bytes)?;
    sink.flush()?;
    sink.sync()
}

/// Session log writing CSV rows to a file (or any [`LogSink`]).
pub struct CsvSessionLog<S: LogSink = File> {
    path: PathBuf,
    sink: Option<S>,
    entries: usize,
}

impl CsvSessionLog<File> {
    /// Open `path` for appending, creating it and its parent directory if needed.
    pub fn open(path: impl AsRef<Path>) -> AppResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                ScanError::Logging(format!(
                    "Failed to create log directory '{}': {}",
                    parent.display(),
                    e
                ))
            })?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| {
                ScanError::Logging(format!("Failed to open log '{}': {}", path.display(), e))
            })?;
        tracing::info!(path = %path.display(), "Session log opened for append");
        Ok(Self::with_sink(path, file))
    }
}

impl<S: LogSink> CsvSessionLog<S> {
    /// Log over an already opened sink. `path` names it in messages and the summary.
    pub fn with_sink(path: impl Into<PathBuf>, sink: S) -> Self {
        Self {
            path: path.into(),
            sink: Some(sink),
            entries: 0,
        }
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl<S: LogSink> SessionLog for CsvSessionLog<S> {
    fn append(&mut self, record: &ScanRecord) -> AppResult<()> {
        let bytes = encode_record(record, Local::now())?;
        let sink = self.sink.as_mut().ok_or_else(|| {
            ScanError::Logging(format!("Log '{}' is already closed", self.path.display()))
        })?;
        let start = sink.committed_len().map_err(|e| {
            ScanError::Logging(format!("Failed to stat '{}': {}", self.path.display(), e))
        })?;

        if let Err(e) = commit(sink, &bytes) {
            if let Err(rollback) = sink.truncate(start) {
                tracing::error!(
                    path = %self.path.display(),
                    "Failed to roll back partial record: {}",
                    rollback
                );
            }
            return Err(ScanError::Logging(format!(
                "Failed to append {} to '{}': {}",
                record.channel,
                self.path.display(),
                e
            )));
        }
        self.entries += record.slots().len();
        Ok(())
    }

    fn finalize(&mut self) -> AppResult<LogSummary> {
        if let Some(sink) = self.sink.take() {
            sink.sync().map_err(|e| {
                ScanError::Logging(format!("Failed to sync '{}': {}", self.path.display(), e))
            })?;
            tracing::info!(
                path = %self.path.display(),
                entries = self.entries,
                "Session log closed"
            );
        }
        Ok(LogSummary {
            path: Some(self.path.clone()),
            entries: self.entries,
        })
    }

    fn entries_written(&self) -> usize {
        self.entries
    }
}
