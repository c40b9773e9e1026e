//! Mock instrument port for testing
//!
//! This port implements [`InstrumentPort`] without any hardware. It provides:
//! - Programmable reply values per kind and per (channel, kind)
//! - Controllable failure injection on acquisition queries
//! - A log of every command and query, in order, for test verification
//!
//! It also tracks which function each channel was last configured for, like the real
//! instrument does. A `MEASure` query for a channel whose active function is a different
//! kind answers with the not-a-number sentinel, so a missing configuration step shows up
//! as a bogus value rather than passing silently.

use super::{scpi, InstrumentPort};
use crate::error::{AppResult, ScanError};
use crate::measurement::MeasurementKind;
use async_trait::async_trait;
use std::collections::HashMap;

/// Reply sent when a channel is measured without being configured for that kind.
pub const NOT_A_NUMBER_REPLY: &str = "+9.91000000E+37";

/// How an injected failure manifests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureMode {
    /// The link drops: the query returns a transport error.
    Transport,
    /// The instrument answers with an empty line.
    EmptyReply,
    /// The instrument answers with the given non-numeric text.
    Garbage(String),
}

#[derive(Debug, Clone)]
struct InjectedFailure {
    mode: FailureMode,
    /// `None` fails forever, `Some(n)` fails the next `n` queries.
    remaining: Option<u32>,
}

/// Fake switch/DMM unit.
///
/// # Example
///
/// ```
/// use dmm_scan::instrument::{InstrumentPort, MockInstrument};
/// use dmm_scan::measurement::MeasurementKind;
///
/// # tokio::runtime::Runtime::new().unwrap().block_on(async {
/// let mut dmm = MockInstrument::new().with_value(MeasurementKind::Voltage, 12.5);
/// dmm.send(":CONFigure:SCALar:VOLTage:DC 100,6.5,(@1001)").await.unwrap();
/// let values = dmm.query(":MEASure:SCALar:VOLTage:DC? (@1001)").await.unwrap();
/// assert_eq!(values, vec![12.5]);
/// # });
/// ```
#[derive(Debug, Clone, Default)]
pub struct MockInstrument {
    kind_values: HashMap<MeasurementKind, f64>,
    channel_values: HashMap<(String, MeasurementKind), f64>,
    failures: HashMap<(String, MeasurementKind), InjectedFailure>,
    active_function: HashMap<String, MeasurementKind>,
    extra_samples: usize,
    call_log: Vec<String>,
}

impl MockInstrument {
    /// Create a mock that answers 0.0 for every kind.
    pub fn new() -> Self {
        Self::default()
    }

    /// Value returned for `kind` on any channel without a per-channel value.
    pub fn with_value(mut self, kind: MeasurementKind, value: f64) -> Self {
        self.kind_values.insert(kind, value);
        self
    }

    /// Value returned for `kind` on `channel`.
    pub fn with_channel_value(mut self, channel: &str, kind: MeasurementKind, value: f64) -> Self {
        self.channel_values.insert((channel.to_string(), kind), value);
        self
    }

    /// Append `count` extra samples to every reply, as a batching instrument would.
    pub fn with_extra_samples(mut self, count: usize) -> Self {
        self.extra_samples = count;
        self
    }

    /// Fail every `kind` query on `channel`.
    pub fn fail_on(&mut self, channel: &str, kind: MeasurementKind, mode: FailureMode) {
        self.failures.insert(
            (channel.to_string(), kind),
            InjectedFailure {
                mode,
                remaining: None,
            },
        );
    }

    /// Fail the next `times` `kind` queries on `channel`, then answer normally.
    pub fn fail_times(&mut self, channel: &str, kind: MeasurementKind, mode: FailureMode, times: u32) {
        self.failures.insert(
            (channel.to_string(), kind),
            InjectedFailure {
                mode,
                remaining: Some(times),
            },
        );
    }

    /// Every command and query received, in order.
    pub fn call_log(&self) -> &[String] {
        &self.call_log
    }

    /// Clear the call log.
    pub fn clear_call_log(&mut self) {
        self.call_log.clear();
    }

    fn kind_in(command: &str) -> Option<MeasurementKind> {
        let upper = command.to_uppercase();
        if upper.contains(":VOLTAGE") {
            Some(MeasurementKind::Voltage)
        } else if upper.contains(":CURRENT") {
            Some(MeasurementKind::Current)
        } else if upper.contains(":RESISTANCE") {
            Some(MeasurementKind::Resistance)
        } else {
            None
        }
    }

    /// Channel inside the trailing `(...)` of a command.
    fn channel_in(command: &str) -> Option<String> {
        let start = command.rfind('(')?;
        let end = command.rfind(')')?;
        (end > start + 1).then(|| command[start + 1..end].to_string())
    }

    fn value_for(&self, channel: &str, kind: MeasurementKind) -> f64 {
        self.channel_values
            .get(&(channel.to_string(), kind))
            .or_else(|| self.kind_values.get(&kind))
            .copied()
            .unwrap_or(0.0)
    }

    fn take_failure(&mut self, channel: &str, kind: MeasurementKind) -> Option<FailureMode> {
        let key = (channel.to_string(), kind);
        let failure = self.failures.get(&key)?.clone();
        match failure.remaining {
            None => Some(failure.mode),
            Some(0) => {
                self.failures.remove(&key);
                None
            }
            Some(1) => {
                self.failures.remove(&key);
                Some(failure.mode)
            }
            Some(n) => {
                if let Some(entry) = self.failures.get_mut(&key) {
                    entry.remaining = Some(n - 1);
                }
                Some(failure.mode)
            }
        }
    }

    fn reply_to(&mut self, command: &str) -> AppResult<String> {
        let upper = command.to_uppercase();
        let (kind, channel) = match (Self::kind_in(command), Self::channel_in(command)) {
            (Some(kind), Some(channel)) if upper.starts_with(":MEAS") => (kind, channel),
            _ => {
                return Err(ScanError::Protocol(format!(
                    "Mock instrument cannot answer '{}'",
                    command
                )))
            }
        };

        if let Some(mode) = self.take_failure(&channel, kind) {
            return match mode {
                FailureMode::Transport => Err(ScanError::Transport(format!(
                    "Mock link failure on {} {}",
                    channel, kind
                ))),
                FailureMode::EmptyReply => Ok(String::new()),
                FailureMode::Garbage(text) => Ok(text),
            };
        }

        if self.active_function.get(&channel) != Some(&kind) {
            return Ok(NOT_A_NUMBER_REPLY.to_string());
        }

        let value = self.value_for(&channel, kind);
        let mut fields = vec![format!("{:E}", value)];
        for i in 0..self.extra_samples {
            fields.push(format!("{:E}", value + (i + 1) as f64));
        }
        Ok(fields.join(","))
    }
}

#[async_trait]
impl InstrumentPort for MockInstrument {
    async fn send(&mut self, command: &str) -> AppResult<()> {
        self.call_log.push(command.to_string());
        if command.to_uppercase().starts_with(":CONF") {
            if let (Some(kind), Some(channel)) = (Self::kind_in(command), Self::channel_in(command)) {
                self.active_function.insert(channel, kind);
            }
        }
        Ok(())
    }

    async fn query(&mut self, command: &str) -> AppResult<Vec<f64>> {
        self.call_log.push(command.to_string());
        let reply = self.reply_to(command)?;
        scpi::parse_ascii_values(&reply)
    }

    fn describe(&self) -> String {
        "MockInstrument".to_string()
    }
}
