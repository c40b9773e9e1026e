//! Scan Sequencer: drives configure → read for every kind of every channel and commits
//! one record per channel to the session log before moving on.
//!
//! # Session flow
//!
//! 1. One-time setup: range, remote sensing, inter-channel delay.
//! 2. For each channel, in the caller's order: voltage, current, resistance, each fully
//!    configured and read; the assembled [`ScanRecord`] is appended to the log.
//! 3. The log is finalized and a [`ScanReport`] is returned.
//!
//! A failed reading is retried up to `max_retries` times (each retry re-issues the full
//! configuration), then handled by the [`FailurePolicy`]: `Abort` ends the session without
//! logging the failing channel, `SkipAndContinue` logs a failure marker in its slot.
//! A log-write failure never stops the scan; it marks the session incomplete.
//! Any other error from the port (local I/O, bad configuration) is not a reading failure:
//! the log is finalized and the error is returned.

use super::{ChannelConfigurator, MeasurementReader};
use crate::data::{LogSummary, SessionLog};
use crate::error::{AppResult, ScanError};
use crate::instrument::{scpi, InstrumentPort};
use crate::measurement::{
    AcquisitionProfile, AcquisitionSettings, ChannelAddress, MeasurementKind, Reading,
    ReadingFailure, ReadingSlot, ScanRecord, SettingsOverride,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::Instrument;

// =============================================================================
// Policy and setup
// =============================================================================

/// What to do when a reading still fails after its retries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailurePolicy {
    /// Stop the session; the failing channel is not logged.
    #[default]
    #[serde(rename = "abort")]
    Abort,
    /// Log a failure marker for the reading and carry on.
    #[serde(rename = "skip", alias = "skip_and_continue")]
    SkipAndContinue,
}

/// Session-wide instrument state, issued once before the first channel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSetup {
    /// DC voltage range.
    pub range: f64,
    /// Remote (4-wire) sensing.
    pub remote_sensing: bool,
    /// Inter-channel settling delay in seconds.
    pub channel_delay_s: f64,
}

impl Default for SessionSetup {
    fn default() -> Self {
        Self {
            range: 100.0,
            remote_sensing: true,
            channel_delay_s: 0.002,
        }
    }
}

impl SessionSetup {
    /// Setup commands for a scan over `channels`. The delay command addresses the scan
    /// list and is left out when there is nothing to address.
    pub fn commands(&self, channels: &[ChannelAddress]) -> Vec<String> {
        let mut commands = vec![
            scpi::select_range(self.range),
            scpi::remote_sensing(self.remote_sensing),
        ];
        if !channels.is_empty() {
            commands.push(scpi::channel_delay(self.channel_delay_s, channels));
        }
        commands
    }

    /// Check numeric fields.
    pub fn validate(&self) -> AppResult<()> {
        if !self.range.is_finite() || self.range <= 0.0 {
            return Err(ScanError::Configuration(format!(
                "Session range must be positive, got {}",
                self.range
            )));
        }
        if !self.channel_delay_s.is_finite() || self.channel_delay_s < 0.0 {
            return Err(ScanError::Configuration(format!(
                "Channel delay must be zero or positive, got {}",
                self.channel_delay_s
            )));
        }
        Ok(())
    }
}

// =============================================================================
// ScanPlan
// =============================================================================

/// Channels to scan, in order, and the settings to use for each (channel, kind).
#[derive(Debug, Clone, Default)]
pub struct ScanPlan {
    channels: Vec<ChannelAddress>,
    profile: AcquisitionProfile,
    overrides: HashMap<(ChannelAddress, MeasurementKind), SettingsOverride>,
}

impl ScanPlan {
    /// Plan over `channels` with default settings.
    pub fn new(channels: Vec<ChannelAddress>) -> Self {
        Self {
            channels,
            ..Default::default()
        }
    }

    /// Base settings per kind.
    pub fn with_profile(mut self, profile: AcquisitionProfile) -> Self {
        self.profile = profile;
        self
    }

    /// Override some settings for one (channel, kind).
    pub fn with_override(
        mut self,
        channel: ChannelAddress,
        kind: MeasurementKind,
        settings: SettingsOverride,
    ) -> Self {
        self.overrides.insert((channel, kind), settings);
        self
    }

    /// Channels in scan order.
    pub fn channels(&self) -> &[ChannelAddress] {
        &self.channels
    }

    /// Effective settings for `kind` on `channel`.
    pub fn settings_for(&self, channel: &ChannelAddress, kind: MeasurementKind) -> AcquisitionSettings {
        let base = self.profile.for_kind(kind);
        match self.overrides.get(&(channel.clone(), kind)) {
            Some(over) => over.apply(base),
            None => base,
        }
    }

    /// Validate the profile and every effective override.
    pub fn validate(&self) -> AppResult<()> {
        self.profile.validate()?;
        for ((channel, kind), over) in &self.overrides {
            over.apply(self.profile.for_kind(*kind))
                .validate()
                .map_err(|e| {
                    ScanError::Configuration(format!("Override for {} {}: {}", channel, kind, e))
                })?;
        }
        Ok(())
    }
}

// =============================================================================
// Stop handle and progress events
// =============================================================================

/// Requests a halt between channels. The channel in progress always completes.
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    /// Ask the sequencer to stop before the next channel.
    pub fn request_stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether a stop has been requested.
    pub fn is_stop_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Progress notifications sent while a scan runs.
#[derive(Debug, Clone, PartialEq)]
pub enum ScanEvent {
    /// A channel is about to be scanned (`index` is 0-based).
    ChannelStarted {
        /// Channel address.
        channel: ChannelAddress,
        /// Position in the plan.
        index: usize,
        /// Channels in the plan.
        total: usize,
    },
    /// A reading was taken.
    ReadingTaken(Reading),
    /// A reading failed after its retries.
    ReadingFailed(ReadingFailure),
    /// The channel's record was committed to the log.
    ChannelCommitted(ChannelAddress),
    /// The channel's record could not be logged.
    LogWriteFailed {
        /// Channel whose record was lost.
        channel: ChannelAddress,
        /// Error text.
        message: String,
    },
}

// =============================================================================
// ScanReport
// =============================================================================

/// A log write that did not go through.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogFailure {
    /// Channel whose record was being written, `None` when closing the log.
    pub channel: Option<ChannelAddress>,
    /// Error text.
    pub message: String,
}

/// Overall outcome of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionStatus {
    /// Every planned channel was measured and committed.
    Complete,
    /// The scan ran to the end but some readings or log writes failed.
    Incomplete,
    /// A reading failed under the abort policy.
    Aborted,
    /// A stop was requested before every channel was scanned.
    Stopped,
}

/// What happened during a session.
#[derive(Debug, Clone, Serialize)]
pub struct ScanReport {
    /// Channels in the plan.
    pub channels_planned: usize,
    /// Channels measured and handed to the log, in scan order.
    pub channels_scanned: usize,
    /// Channels whose record was durably committed.
    pub committed: Vec<ChannelAddress>,
    /// Readings that failed, with their channel, kind and failure kind.
    pub failures: Vec<ReadingFailure>,
    /// Log writes that failed.
    pub log_failures: Vec<LogFailure>,
    /// Readings that came back as the overflow / not-a-number sentinel.
    pub overflow_readings: Vec<Reading>,
    /// Failure that ended the session under the abort policy.
    pub aborted_by: Option<ReadingFailure>,
    /// A stop request ended the session early.
    pub stopped_early: bool,
    /// Summary of the finalized log.
    pub log: Option<LogSummary>,
}

impl ScanReport {
    fn new(channels_planned: usize) -> Self {
        Self {
            channels_planned,
            channels_scanned: 0,
            committed: Vec::new(),
            failures: Vec::new(),
            log_failures: Vec::new(),
            overflow_readings: Vec::new(),
            aborted_by: None,
            stopped_early: false,
            log: None,
        }
    }

    /// Overall outcome.
    pub fn status(&self) -> SessionStatus {
        if self.aborted_by.is_some() {
            SessionStatus::Aborted
        } else if !self.failures.is_empty() || !self.log_failures.is_empty() {
            SessionStatus::Incomplete
        } else if self.stopped_early {
            SessionStatus::Stopped
        } else {
            SessionStatus::Complete
        }
    }

    /// True when every planned channel was measured and committed.
    pub fn is_success(&self) -> bool {
        self.status() == SessionStatus::Complete
    }

    /// Channels with at least one failed reading, in scan order, without repeats.
    pub fn failed_channels(&self) -> Vec<&ChannelAddress> {
        let mut channels: Vec<&ChannelAddress> = Vec::new();
        for failure in &self.failures {
            if !channels.contains(&&failure.channel) {
                channels.push(&failure.channel);
            }
        }
        channels
    }
}

/// Why a channel could not be completed.
enum ChannelError {
    /// A reading failed under the abort policy.
    Aborted(ReadingFailure),
    /// The port failed in a way no reading failure describes.
    Fatal(ScanError),
}

// =============================================================================
// ScanSequencer
// =============================================================================

/// Owns the instrument port for the session and runs scans over it.
pub struct ScanSequencer<P: InstrumentPort> {
    port: P,
    setup: SessionSetup,
    policy: FailurePolicy,
    max_retries: u32,
    configurator: ChannelConfigurator,
    reader: MeasurementReader,
    stop: StopHandle,
    events: Option<mpsc::UnboundedSender<ScanEvent>>,
}

impl<P: InstrumentPort> ScanSequencer<P> {
    /// Sequencer with default setup, abort policy and no retries.
    pub fn new(port: P) -> Self {
        Self {
            port,
            setup: SessionSetup::default(),
            policy: FailurePolicy::default(),
            max_retries: 0,
            configurator: ChannelConfigurator,
            reader: MeasurementReader,
            stop: StopHandle::default(),
            events: None,
        }
    }

    /// Session-wide setup.
    pub fn with_setup(mut self, setup: SessionSetup) -> Self {
        self.setup = setup;
        self
    }

    /// Failure policy.
    pub fn with_policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Retries per reading before the policy applies.
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Send progress events to `tx`.
    pub fn with_events(mut self, tx: mpsc::UnboundedSender<ScanEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    /// Handle for requesting a stop between channels.
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// The instrument port.
    pub fn port(&self) -> &P {
        &self.port
    }

    /// Mutable access to the instrument port.
    pub fn port_mut(&mut self) -> &mut P {
        &mut self.port
    }

    /// Give the port back.
    pub fn into_port(self) -> P {
        self.port
    }

    fn emit(&self, event: ScanEvent) {
        if let Some(tx) = &self.events {
            if tx.send(event).is_err() {
                tracing::trace!("No active event receiver");
            }
        }
    }

    /// Run one session over `plan`, committing each channel's record to `log`.
    ///
    /// Returns `Err` if the plan is invalid or the one-time setup fails, in which case no
    /// channel was measured, or if the port fails with anything other than a transport or
    /// protocol error. Channels committed before that stay in the log. Reading and log
    /// failures are reported in the [`ScanReport`].
    pub async fn run_scan<L>(&mut self, plan: &ScanPlan, log: &mut L) -> AppResult<ScanReport>
    where
        L: SessionLog + ?Sized,
    {
        plan.validate()?;
        self.setup.validate()?;

        let channels = plan.channels();
        tracing::info!(
            port = %self.port.describe(),
            channels = channels.len(),
            policy = ?self.policy,
            "Starting scan session"
        );

        for command in self.setup.commands(channels) {
            self.port.send(&command).await?;
        }

        let mut report = ScanReport::new(channels.len());

        for (index, channel) in channels.iter().enumerate() {
            if self.stop.is_stop_requested() {
                tracing::warn!(next = %channel, "Stop requested; halting before next channel");
                report.stopped_early = true;
                break;
            }

            self.emit(ScanEvent::ChannelStarted {
                channel: channel.clone(),
                index,
                total: channels.len(),
            });

            let span = tracing::info_span!("channel", channel = %channel, index);
            let outcome = self
                .scan_channel(plan, channel, &mut report)
                .instrument(span)
                .await;

            match outcome {
                Ok(record) => {
                    self.commit(log, &record, &mut report);
                    report.channels_scanned += 1;
                }
                Err(ChannelError::Fatal(e)) => {
                    tracing::error!(%channel, "Scan stopped by instrument error: {}", e);
                    if let Err(close) = log.finalize() {
                        tracing::error!("Failed to finalize session log: {}", close);
                    }
                    return Err(e);
                }
                Err(ChannelError::Aborted(failure)) => {
                    tracing::error!(
                        %channel,
                        kind = %failure.kind,
                        failure = %failure.failure,
                        "Aborting scan: {}",
                        failure.message
                    );
                    report.aborted_by = Some(failure);
                    break;
                }
            }
        }

        match log.finalize() {
            Ok(summary) => report.log = Some(summary),
            Err(e) => {
                tracing::error!("Failed to finalize session log: {}", e);
                report.log_failures.push(LogFailure {
                    channel: None,
                    message: e.to_string(),
                });
            }
        }

        tracing::info!(
            status = ?report.status(),
            committed = report.committed.len(),
            failures = report.failures.len(),
            "Scan session finished"
        );
        Ok(report)
    }

    fn commit<L>(&self, log: &mut L, record: &ScanRecord, report: &mut ScanReport)
    where
        L: SessionLog + ?Sized,
    {
        match log.append(record) {
            Ok(()) => {
                report.committed.push(record.channel.clone());
                self.emit(ScanEvent::ChannelCommitted(record.channel.clone()));
            }
            Err(e) => {
                tracing::error!(channel = %record.channel, "Session log write failed: {}", e);
                self.emit(ScanEvent::LogWriteFailed {
                    channel: record.channel.clone(),
                    message: e.to_string(),
                });
                report.log_failures.push(LogFailure {
                    channel: Some(record.channel.clone()),
                    message: e.to_string(),
                });
            }
        }
    }

    /// Measure all three kinds on `channel`.
    async fn scan_channel(
        &mut self,
        plan: &ScanPlan,
        channel: &ChannelAddress,
        report: &mut ScanReport,
    ) -> Result<ScanRecord, ChannelError> {
        Ok(ScanRecord {
            channel: channel.clone(),
            voltage: self
                .measure_slot(plan, channel, MeasurementKind::Voltage, report)
                .await?,
            current: self
                .measure_slot(plan, channel, MeasurementKind::Current, report)
                .await?,
            resistance: self
                .measure_slot(plan, channel, MeasurementKind::Resistance, report)
                .await?,
        })
    }

    async fn measure_slot(
        &mut self,
        plan: &ScanPlan,
        channel: &ChannelAddress,
        kind: MeasurementKind,
        report: &mut ScanReport,
    ) -> Result<ReadingSlot, ChannelError> {
        let settings = plan.settings_for(channel, kind);
        match self.acquire(channel, kind, &settings).await {
            Ok(value) => {
                let reading = Reading::now(kind, channel.clone(), value);
                if reading.is_overflow() {
                    tracing::warn!(%kind, value, "Instrument returned overflow sentinel");
                    report.overflow_readings.push(reading.clone());
                } else {
                    tracing::info!(%kind, value, "Reading taken");
                }
                self.emit(ScanEvent::ReadingTaken(reading.clone()));
                Ok(ReadingSlot::Measured(reading))
            }
            Err(e) => {
                let failure_kind = match e.kind() {
                    Some(failure_kind) if e.is_acquisition_failure() => failure_kind,
                    _ => return Err(ChannelError::Fatal(e)),
                };
                let failure = ReadingFailure {
                    kind,
                    channel: channel.clone(),
                    failure: failure_kind,
                    message: e.to_string(),
                };
                self.emit(ScanEvent::ReadingFailed(failure.clone()));
                report.failures.push(failure.clone());
                match self.policy {
                    FailurePolicy::Abort => Err(ChannelError::Aborted(failure)),
                    FailurePolicy::SkipAndContinue => {
                        tracing::warn!(%kind, "Skipping failed reading: {}", e);
                        Ok(ReadingSlot::Failed(failure))
                    }
                }
            }
        }
    }

    /// Configure then read, retrying the pair on acquisition failures.
    async fn acquire(
        &mut self,
        channel: &ChannelAddress,
        kind: MeasurementKind,
        settings: &AcquisitionSettings,
    ) -> AppResult<f64> {
        let mut attempt = 0;
        loop {
            let result = match self
                .configurator
                .configure(&mut self.port, channel, kind, settings)
                .await
            {
                Ok(()) => self.reader.read(&mut self.port, channel, kind).await,
                Err(e) => Err(e),
            };
            match result {
                Ok(value) => return Ok(value),
                Err(e) if e.is_acquisition_failure() && attempt < self.max_retries => {
                    attempt += 1;
                    tracing::warn!(
                        %kind,
                        attempt,
                        max_retries = self.max_retries,
                        "Retrying after error: {}",
                        e
                    );
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureKind;

    fn ch(addr: &str) -> ChannelAddress {
        ChannelAddress::parse(addr).unwrap()
    }

    #[test]
    fn setup_commands_address_the_scan_list() {
        let setup = SessionSetup::default();
        assert_eq!(
            setup.commands(&[ch("@1001"), ch("@1002")]),
            vec![
                ":SENSe:VOLTage:DC:RANGe 100".to_string(),
                "SENSE:REMOTE ON".to_string(),
                ":ROUTe:CHANnel:DELay 0.002,(@1001,@1002)".to_string(),
            ]
        );
        assert_eq!(setup.commands(&[]).len(), 2);
    }

    #[test]
    fn setup_validation() {
        let mut setup = SessionSetup::default();
        assert!(setup.validate().is_ok());
        setup.channel_delay_s = -1.0;
        assert!(setup.validate().is_err());
    }

    #[test]
    fn plan_resolves_overrides_per_channel_and_kind() {
        let plan = ScanPlan::new(vec![ch("@1001"), ch("@1002")]).with_override(
            ch("@1002"),
            MeasurementKind::Resistance,
            SettingsOverride {
                range: Some(10_000.0),
                ..Default::default()
            },
        );

        assert_eq!(
            plan.settings_for(&ch("@1001"), MeasurementKind::Resistance).range,
            100.0
        );
        assert_eq!(
            plan.settings_for(&ch("@1002"), MeasurementKind::Resistance).range,
            10_000.0
        );
        assert_eq!(
            plan.settings_for(&ch("@1002"), MeasurementKind::Voltage).range,
            100.0
        );
    }

    #[test]
    fn plan_rejects_invalid_override() {
        let plan = ScanPlan::new(vec![ch("@1001")]).with_override(
            ch("@1001"),
            MeasurementKind::Current,
            SettingsOverride {
                integration_cycles: Some(0.0),
                ..Default::default()
            },
        );
        assert!(plan.validate().is_err());
    }

    #[test]
    fn stop_handle_is_shared() {
        let handle = StopHandle::default();
        let clone = handle.clone();
        assert!(!handle.is_stop_requested());
        clone.request_stop();
        assert!(handle.is_stop_requested());
    }

    #[test]
    fn failure_policy_deserialises_from_config_names() {
        #[derive(Deserialize)]
        struct Wrapper {
            policy: FailurePolicy,
        }
        let abort: Wrapper = serde_json::from_str(r#"{"policy":"abort"}"#).unwrap();
        let skip: Wrapper = serde_json::from_str(r#"{"policy":"skip"}"#).unwrap();
        assert_eq!(abort.policy, FailurePolicy::Abort);
        assert_eq!(skip.policy, FailurePolicy::SkipAndContinue);
    }

    #[test]
    fn report_status_precedence() {
        let mut report = ScanReport::new(2);
        assert_eq!(report.status(), SessionStatus::Complete);

        report.stopped_early = true;
        assert_eq!(report.status(), SessionStatus::Stopped);

        report.log_failures.push(LogFailure {
            channel: Some(ch("@1001")),
            message: "disk full".into(),
        });
        assert_eq!(report.status(), SessionStatus::Incomplete);

        report.aborted_by = Some(ReadingFailure {
            kind: MeasurementKind::Current,
            channel: ch("@1002"),
            failure: FailureKind::Transport,
            message: "link down".into(),
        });
        assert_eq!(report.status(), SessionStatus::Aborted);
        assert!(!report.is_success());
    }
}
