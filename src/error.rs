//! Custom error types for the scan controller.
//!
//! This module defines the primary error type, `ScanError`, for the whole crate.
//! Using the `thiserror` crate, it gives a single, consistent way to report what can go
//! wrong during a measurement session, from a dropped instrument link to a full disk.
//!
//! ## Error Hierarchy
//!
//! - **`Transport`**: the instrument port could not send or receive (link down, timeout).
//! - **`Protocol`**: the instrument answered, but the reply was not the numeric value(s)
//!   we asked for (empty reply, malformed ASCII).
//! - **`Logging`**: the session log could not durably append or close.
//! - **`Config`**: wraps errors from `figment` while reading the TOML file or environment.
//! - **`Configuration`**: semantic errors in otherwise well-formed configuration, such as a
//!   negative range or a malformed channel address.
//! - **`Io`**: any other `std::io::Error`.
//!
//! The first three carry a [`FailureKind`], which is what a scan report shows per failed
//! reading. Transport and protocol errors together make up an acquisition failure.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Convenience alias for results using the crate error type.
pub type AppResult<T> = std::result::Result<T, ScanError>;

/// Errors raised while configuring, reading, logging or loading settings.
#[derive(Error, Debug)]
pub enum ScanError {
    /// The instrument link failed to carry a command or reply.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The instrument replied with something that is not the expected numeric value.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The session log could not durably commit an entry.
    #[error("Logging error: {0}")]
    Logging(String),

    /// Raised by `figment` when the configuration cannot be read or deserialised.
    #[error("Configuration error: {0}")]
    Config(#[from] figment::Error),

    /// Semantic configuration error found during validation.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// Generic I/O failure outside the instrument link and the session log.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ScanError {
    /// Taxonomy bucket of this error, if it belongs to one.
    pub fn kind(&self) -> Option<FailureKind> {
        match self {
            ScanError::Transport(_) => Some(FailureKind::Transport),
            ScanError::Protocol(_) => Some(FailureKind::Protocol),
            ScanError::Logging(_) => Some(FailureKind::Logging),
            _ => None,
        }
    }

    /// True for errors that make a single reading unusable (transport or protocol).
    pub fn is_acquisition_failure(&self) -> bool {
        matches!(self, ScanError::Transport(_) | ScanError::Protocol(_))
    }
}

/// Kind of failure attached to a reading or a log write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Link down, timeout, or refused connection.
    Transport,
    /// Reply could not be parsed.
    Protocol,
    /// Log storage unavailable.
    Logging,
}

impl FailureKind {
    /// Lower-case name used in log markers and reports.
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Transport => "transport",
            FailureKind::Protocol => "protocol",
            FailureKind::Logging => "logging",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
