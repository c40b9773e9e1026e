//! Persistence of scan results: the append-only session log and its reader.

pub mod log_reader;
pub mod storage;

pub use log_reader::{read_log, series, values, LogEntry, LogLine};
pub use storage::{CsvSessionLog, LogSink, LogSummary, SessionLog};
