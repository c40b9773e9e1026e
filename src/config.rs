//! Scan configuration using Figment
//!
//! Configuration is loaded from:
//! 1. a TOML file (base configuration, `config/scan.toml` by default)
//! 2. environment variables prefixed with `DMM_SCAN_`, nested keys split on `__`
//!    (e.g. `DMM_SCAN_SCAN__FAILURE_POLICY=skip`)
//!
//! # Example
//! ```no_run
//! use dmm_scan::config::ScanConfig;
//!
//! let config = ScanConfig::load()?;
//! config.validate()?;
//! println!("Scanning {} channels", config.scan.channel_list()?.len());
//! # Ok::<(), dmm_scan::error::ScanError>(())
//! ```

use crate::error::{AppResult, ScanError};
use crate::instrument::tcp::{self, parse_socket_resource};
use crate::measurement::{
    AcquisitionProfile, AcquisitionSettings, ChannelAddress, MeasurementKind, SettingsOverride,
};
use crate::plot::{PlotSegment, PlotSeries};
use crate::scan::{FailurePolicy, ScanPlan, SessionSetup};
use crate::tracing_init::OutputFormat;
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "config/scan.toml";

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScanConfig {
    /// Application settings
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Instrument link
    #[serde(default)]
    pub instrument: InstrumentConfig,
    /// One-time session setup
    #[serde(default)]
    pub session: SessionSetup,
    /// Channels and failure handling
    #[serde(default)]
    pub scan: ScanSection,
    /// Per-kind acquisition settings and per-channel overrides
    #[serde(default)]
    pub acquisition: AcquisitionConfig,
    /// Session log location
    #[serde(default)]
    pub log: LogConfig,
    /// Segment plot annotations
    #[serde(default)]
    pub plot: PlotConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application name
    #[serde(default = "default_name")]
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Log output format (pretty, compact, json)
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

/// Instrument link configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstrumentConfig {
    /// Host name or IP address
    #[serde(default = "default_host")]
    pub host: String,
    /// Raw-socket SCPI port
    #[serde(default = "default_port")]
    pub port: u16,
    /// VISA-style socket resource; overrides `host` and `port` when set
    #[serde(default)]
    pub resource: Option<String>,
    /// Reply timeout in milliseconds
    #[serde(default = "default_timeout")]
    pub timeout_ms: u64,
    /// Connection timeout in milliseconds
    #[serde(default = "default_timeout")]
    pub connect_timeout_ms: u64,
}

impl Default for InstrumentConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            resource: None,
            timeout_ms: default_timeout(),
            connect_timeout_ms: default_timeout(),
        }
    }
}

impl InstrumentConfig {
    /// Host and port to connect to.
    pub fn endpoint(&self) -> AppResult<(String, u16)> {
        match &self.resource {
            Some(resource) => parse_socket_resource(resource),
            None => Ok((self.host.clone(), self.port)),
        }
    }

    /// Reply timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Connection timeout.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// Contiguous run of channels in one slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelSpan {
    /// Slot number
    pub slot: u32,
    /// First channel, inclusive
    pub first: u32,
    /// Last channel, inclusive
    pub last: u32,
}

impl ChannelSpan {
    /// Addresses `@SCCC` for every channel in the span, ascending.
    pub fn addresses(&self) -> AppResult<Vec<ChannelAddress>> {
        if self.first > self.last {
            return Err(ScanError::Configuration(format!(
                "Channel span {}..{} is empty",
                self.first, self.last
            )));
        }
        (self.first..=self.last)
            .map(|channel| ChannelAddress::slot_channel(self.slot, channel))
            .collect()
    }
}

/// Which channels to scan and how to treat failures
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScanSection {
    /// Explicit channel list, scanned in the given order
    #[serde(default)]
    pub channels: Vec<ChannelAddress>,
    /// Channel span, used instead of `channels`
    #[serde(default)]
    pub span: Option<ChannelSpan>,
    /// Abort or skip on a failed reading
    #[serde(default)]
    pub failure_policy: FailurePolicy,
    /// Retries per reading before the policy applies
    #[serde(default)]
    pub max_retries: u32,
}

impl ScanSection {
    /// Channels to scan, in order.
    pub fn channel_list(&self) -> AppResult<Vec<ChannelAddress>> {
        match (&self.span, self.channels.is_empty()) {
            (Some(_), false) => Err(ScanError::Configuration(
                "Set either scan.channels or scan.span, not both".to_string(),
            )),
            (Some(span), true) => span.addresses(),
            (None, _) => Ok(self.channels.clone()),
        }
    }
}

/// Partial settings override for one (channel, kind)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelOverride {
    /// Channel the override applies to
    pub channel: ChannelAddress,
    /// Kind the override applies to
    pub kind: MeasurementKind,
    /// Fields to replace
    #[serde(flatten)]
    pub settings: SettingsOverride,
}

/// Acquisition settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AcquisitionConfig {
    /// DC voltage settings
    #[serde(default)]
    pub voltage: AcquisitionSettings,
    /// DC current settings
    #[serde(default)]
    pub current: AcquisitionSettings,
    /// Resistance settings
    #[serde(default)]
    pub resistance: AcquisitionSettings,
    /// Per-channel overrides
    #[serde(default)]
    pub overrides: Vec<ChannelOverride>,
}

impl AcquisitionConfig {
    /// Base settings per kind.
    pub fn profile(&self) -> AcquisitionProfile {
        AcquisitionProfile {
            voltage: self.voltage,
            current: self.current,
            resistance: self.resistance,
        }
    }
}

/// Session log configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log file, opened for append
    #[serde(default = "default_log_path")]
    pub path: PathBuf,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            path: default_log_path(),
        }
    }
}

/// Segment plot configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlotConfig {
    /// Plot title
    #[serde(default = "default_plot_title")]
    pub title: String,
    /// Y axis label
    #[serde(default = "default_plot_title")]
    pub y_label: String,
    /// Log rows to plot
    #[serde(default)]
    pub series: PlotSeries,
    /// Where the plot document is written
    #[serde(default = "default_plot_output")]
    pub output: PathBuf,
    /// Annotated index ranges
    #[serde(default)]
    pub segments: Vec<PlotSegment>,
}

impl Default for PlotConfig {
    fn default() -> Self {
        Self {
            title: default_plot_title(),
            y_label: default_plot_title(),
            series: PlotSeries::default(),
            output: default_plot_output(),
            segments: Vec::new(),
        }
    }
}

// Default value functions
fn default_name() -> String {
    "dmm-scan".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    tcp::DEFAULT_PORT
}

fn default_timeout() -> u64 {
    tcp::DEFAULT_TIMEOUT_MS
}

fn default_log_path() -> PathBuf {
    PathBuf::from("data.csv")
}

fn default_plot_title() -> String {
    "Resistance".to_string()
}

fn default_plot_output() -> PathBuf {
    PathBuf::from("plot.json")
}

impl ScanConfig {
    /// Load configuration from the default file and environment variables
    pub fn load() -> AppResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let config = Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("DMM_SCAN_").split("__"))
            .extract()?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> AppResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.to_lowercase().as_str()) {
            return Err(ScanError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }
        self.application
            .log_format
            .parse::<OutputFormat>()
            .map_err(ScanError::Configuration)?;

        self.instrument.endpoint()?;
        if self.instrument.timeout_ms == 0 {
            return Err(ScanError::Configuration(
                "instrument.timeout_ms must be greater than zero".to_string(),
            ));
        }

        self.session.validate()?;

        let channels = self.scan.channel_list()?;
        let mut seen = HashSet::new();
        for channel in &channels {
            if !seen.insert(channel) {
                return Err(ScanError::Configuration(format!(
                    "Duplicate channel in scan list: {}",
                    channel
                )));
            }
        }

        self.plan()?.validate()?;

        for segment in &self.plot.segments {
            segment.validate()?;
        }

        Ok(())
    }

    /// Build the scan plan: channel order, base profile and overrides.
    pub fn plan(&self) -> AppResult<ScanPlan> {
        let mut plan =
            ScanPlan::new(self.scan.channel_list()?).with_profile(self.acquisition.profile());
        for over in &self.acquisition.overrides {
            plan = plan.with_override(over.channel.clone(), over.kind, over.settings);
        }
        Ok(plan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_config(text: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scan.toml");
        std::fs::write(&path, text).unwrap();
        (dir, path)
    }

    #[test]
    fn defaults_are_valid() {
        let config = ScanConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.scan.failure_policy, FailurePolicy::Abort);
        assert_eq!(config.instrument.port, 5025);
        assert_eq!(config.log.path, PathBuf::from("data.csv"));
    }

    #[test]
    fn loads_span_overrides_and_segments() {
        let (_dir, path) = write_config(
            r#"
[application]
log_level = "debug"

[instrument]
resource = "TCPIP0::172.30.30.31::5025::SOCKET"

[scan]
span = { slot = 1, first = 1, last = 31 }
failure_policy = "skip"
max_retries = 2

[acquisition.resistance]
range = 1000.0

[[acquisition.overrides]]
channel = "@1031"
kind = "resistance"
range = 10000.0

[[plot.segments]]
start = 1
end = 82
color = "blue"

[[plot.segments]]
start = 236
color = "orange"
"#,
        );
        let config = ScanConfig::load_from(&path).unwrap();
        config.validate().unwrap();

        let channels = config.scan.channel_list().unwrap();
        assert_eq!(channels.len(), 31);
        assert_eq!(channels[0].as_str(), "@1001");
        assert_eq!(channels[30].as_str(), "@1031");
        assert_eq!(config.scan.failure_policy, FailurePolicy::SkipAndContinue);
        assert_eq!(config.scan.max_retries, 2);
        assert_eq!(
            config.instrument.endpoint().unwrap(),
            ("172.30.30.31".to_string(), 5025)
        );

        let plan = config.plan().unwrap();
        assert_eq!(
            plan.settings_for(&channels[0], MeasurementKind::Resistance).range,
            1000.0
        );
        assert_eq!(
            plan.settings_for(&channels[30], MeasurementKind::Resistance).range,
            10000.0
        );
        assert_eq!(config.plot.segments[1].end, None);
    }

    #[test]
    fn rejects_duplicate_channels() {
        let (_dir, path) = write_config(
            r#"
[scan]
channels = ["@1001", "@1002", "@1001"]
"#,
        );
        let config = ScanConfig::load_from(&path).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_malformed_channel_addresses_at_load() {
        let (_dir, path) = write_config(
            r#"
[scan]
channels = ["1001"]
"#,
        );
        assert!(ScanConfig::load_from(&path).is_err());
    }

    #[test]
    fn rejects_channels_and_span_together() {
        let mut config = ScanConfig::default();
        config.scan.channels = vec![ChannelAddress::parse("@1001").unwrap()];
        config.scan.span = Some(ChannelSpan {
            slot: 1,
            first: 1,
            last: 3,
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_span_with_oversized_slot() {
        let (_dir, path) = write_config(
            r#"
[scan]
span = { slot = 5000000, first = 1, last = 2 }
"#,
        );
        let config = ScanConfig::load_from(&path).unwrap();
        assert!(matches!(
            config.validate(),
            Err(ScanError::Configuration(_))
        ));
    }

    #[test]
    fn rejects_invalid_log_level() {
        let mut config = ScanConfig::default();
        config.application.log_level = "verbose".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_non_positive_acquisition_settings() {
        let mut config = ScanConfig::default();
        config.acquisition.voltage.integration_cycles = 0.0;
        assert!(config.validate().is_err());
    }
}
