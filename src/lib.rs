//! # DMM Scan Controller Library
//!
//! Drives a SCPI digital multimeter with a switch matrix through a measurement session:
//! for every channel in the scan list it configures and reads DC voltage, DC current and
//! resistance, and commits the three readings to an append-only session log before moving
//! to the next channel. A finished log can be cut into annotated segments for plotting.
//!
//! ## Crate Structure
//!
//! - **`config`**: Figment-based configuration (TOML file plus `DMM_SCAN_` environment
//!   overrides). See `config::ScanConfig`.
//! - **`data`**: The durable session log writer and its reader.
//! - **`error`**: The `ScanError` enum and the `AppResult` alias used across the crate.
//! - **`instrument`**: The `InstrumentPort` seam, the SCPI command set, a raw TCP socket
//!   port and a scripted mock instrument.
//! - **`measurement`**: Channel addresses, measurement kinds, acquisition settings and the
//!   per-channel `ScanRecord`.
//! - **`plot`**: Segment traces over a finished log.
//! - **`scan`**: The configurator, reader and the sequencer that runs a session.
//! - **`tracing_init`**: Structured logging setup.

pub mod config;
pub mod data;
pub mod error;
pub mod instrument;
pub mod measurement;
pub mod plot;
pub mod scan;
pub mod tracing_init;

pub use error::{AppResult, ScanError};
