//! Measurement data model: what is measured, where, with which settings, and the
//! readings that come back.

use crate::error::{AppResult, FailureKind, ScanError};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Magnitude at or above which a reply is the instrument's overflow / not-a-number sentinel
/// (`+9.9E+37` overload, `+9.91E+37` NaN) rather than a physical value.
pub const OVERFLOW_THRESHOLD: f64 = 9.9e37;

/// Scalar quantity measured on a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MeasurementKind {
    /// DC voltage.
    Voltage,
    /// DC current.
    Current,
    /// Resistance.
    Resistance,
}

impl MeasurementKind {
    /// Order in which a channel's kinds are measured.
    pub const SCAN_ORDER: [MeasurementKind; 3] = [
        MeasurementKind::Voltage,
        MeasurementKind::Current,
        MeasurementKind::Resistance,
    ];

    /// Lower-case name used in logs, markers and configuration.
    pub fn as_str(&self) -> &'static str {
        match self {
            MeasurementKind::Voltage => "voltage",
            MeasurementKind::Current => "current",
            MeasurementKind::Resistance => "resistance",
        }
    }
}

impl fmt::Display for MeasurementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MeasurementKind {
    type Err = ScanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "voltage" => Ok(MeasurementKind::Voltage),
            "current" => Ok(MeasurementKind::Current),
            "resistance" => Ok(MeasurementKind::Resistance),
            other => Err(ScanError::Configuration(format!(
                "Unknown measurement kind '{}'. Must be one of: voltage, current, resistance",
                other
            ))),
        }
    }
}

/// One physical channel on the switch/DMM, written as `@` followed by the slot digit and a
/// three-digit channel number (`@1001` is channel 1 of slot 1).
///
/// The address is passed through unmodified to every command that targets the channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ChannelAddress(String);

impl ChannelAddress {
    /// Parse and validate an address such as `@1001`.
    pub fn parse(address: &str) -> AppResult<Self> {
        let trimmed = address.trim();
        let digits = trimmed.strip_prefix('@').ok_or_else(|| {
            ScanError::Configuration(format!(
                "Channel address '{}' must start with '@'",
                address
            ))
        })?;
        if digits.len() < 4 || !digits.chars().all(|c| c.is_ascii_digit()) {
            return Err(ScanError::Configuration(format!(
                "Channel address '{}' must be '@' followed by a slot digit and a three-digit channel",
                address
            )));
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Address of `channel` in `slot`, e.g. `slot_channel(1, 4)` is `@1004`.
    pub fn slot_channel(slot: u32, channel: u32) -> AppResult<Self> {
        if slot == 0 || channel == 0 || channel > 999 {
            return Err(ScanError::Configuration(format!(
                "Invalid slot/channel pair {}/{}",
                slot, channel
            )));
        }
        let number = slot
            .checked_mul(1000)
            .and_then(|base| base.checked_add(channel))
            .ok_or_else(|| {
                ScanError::Configuration(format!(
                    "Slot {} is out of range for a channel address",
                    slot
                ))
            })?;
        Self::parse(&format!("@{}", number))
    }

    /// The address exactly as sent to the instrument.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChannelAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ChannelAddress {
    type Err = ScanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ChannelAddress {
    type Error = ScanError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ChannelAddress> for String {
    fn from(value: ChannelAddress) -> Self {
        value.0
    }
}

/// Acquisition settings for one (channel, kind) configuration.
///
/// The instrument holds these as live internal state. They are re-issued before every
/// acquisition and never assumed to carry over from a previous kind or channel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionSettings {
    /// Measurement range in the kind's base unit.
    pub range: f64,
    /// Resolution in digits.
    pub resolution_digits: f64,
    /// Integration time in power-line cycles.
    pub integration_cycles: f64,
    /// Offset compensation on/off.
    pub offset_compensation: bool,
}

impl Default for AcquisitionSettings {
    fn default() -> Self {
        Self {
            range: 100.0,
            resolution_digits: 6.5,
            integration_cycles: 10.0,
            offset_compensation: true,
        }
    }
}

impl AcquisitionSettings {
    /// Check that every numeric field is finite and positive.
    pub fn validate(&self) -> AppResult<()> {
        let fields = [
            ("range", self.range),
            ("resolution_digits", self.resolution_digits),
            ("integration_cycles", self.integration_cycles),
        ];
        for (name, value) in fields {
            if !value.is_finite() || value <= 0.0 {
                return Err(ScanError::Configuration(format!(
                    "Acquisition setting '{}' must be a positive number, got {}",
                    name, value
                )));
            }
        }
        Ok(())
    }
}

/// Partial override of [`AcquisitionSettings`]; unset fields keep the base value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SettingsOverride {
    /// Replacement range.
    #[serde(default)]
    pub range: Option<f64>,
    /// Replacement resolution.
    #[serde(default)]
    pub resolution_digits: Option<f64>,
    /// Replacement integration cycles.
    #[serde(default)]
    pub integration_cycles: Option<f64>,
    /// Replacement offset compensation flag.
    #[serde(default)]
    pub offset_compensation: Option<bool>,
}

impl SettingsOverride {
    /// Apply the set fields on top of `base`.
    pub fn apply(&self, base: AcquisitionSettings) -> AcquisitionSettings {
        AcquisitionSettings {
            range: self.range.unwrap_or(base.range),
            resolution_digits: self.resolution_digits.unwrap_or(base.resolution_digits),
            integration_cycles: self.integration_cycles.unwrap_or(base.integration_cycles),
            offset_compensation: self.offset_compensation.unwrap_or(base.offset_compensation),
        }
    }
}

/// Base settings for each measurement kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionProfile {
    /// Settings for DC voltage.
    pub voltage: AcquisitionSettings,
    /// Settings for DC current.
    pub current: AcquisitionSettings,
    /// Settings for resistance.
    pub resistance: AcquisitionSettings,
}

impl AcquisitionProfile {
    /// Same settings for all three kinds.
    pub fn uniform(settings: AcquisitionSettings) -> Self {
        Self {
            voltage: settings,
            current: settings,
            resistance: settings,
        }
    }

    /// Settings for `kind`.
    pub fn for_kind(&self, kind: MeasurementKind) -> AcquisitionSettings {
        match kind {
            MeasurementKind::Voltage => self.voltage,
            MeasurementKind::Current => self.current,
            MeasurementKind::Resistance => self.resistance,
        }
    }

    /// Validate all three settings.
    pub fn validate(&self) -> AppResult<()> {
        for kind in MeasurementKind::SCAN_ORDER {
            self.for_kind(kind).validate().map_err(|e| match e {
                ScanError::Configuration(msg) => {
                    ScanError::Configuration(format!("{} settings: {}", kind, msg))
                }
                other => other,
            })?;
        }
        Ok(())
    }
}

/// A single scalar value read from the instrument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    /// What was measured.
    pub kind: MeasurementKind,
    /// Where it was measured.
    pub channel: ChannelAddress,
    /// Value in the kind's base unit (V, A, Ω).
    pub value: f64,
    /// When the reading was taken.
    pub timestamp: DateTime<Local>,
}

impl Reading {
    /// Build a reading stamped with the current wall-clock time.
    pub fn now(kind: MeasurementKind, channel: ChannelAddress, value: f64) -> Self {
        Self {
            kind,
            channel,
            value,
            timestamp: Local::now(),
        }
    }

    /// True when the value is the instrument's overflow or not-a-number sentinel.
    pub fn is_overflow(&self) -> bool {
        !self.value.is_finite() || self.value.abs() >= OVERFLOW_THRESHOLD
    }
}

/// A reading that could not be taken.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadingFailure {
    /// Kind that failed.
    pub kind: MeasurementKind,
    /// Channel that failed.
    pub channel: ChannelAddress,
    /// Error class.
    pub failure: FailureKind,
    /// Human-readable error text.
    pub message: String,
}

/// Outcome of one kind within a channel scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ReadingSlot {
    /// The reading was taken.
    Measured(Reading),
    /// The reading failed and the scan continued under the skip policy.
    Failed(ReadingFailure),
}

impl ReadingSlot {
    /// The measured value, if any.
    pub fn value(&self) -> Option<f64> {
        match self {
            ReadingSlot::Measured(reading) => Some(reading.value),
            ReadingSlot::Failed(_) => None,
        }
    }

    /// Kind of this slot.
    pub fn kind(&self) -> MeasurementKind {
        match self {
            ReadingSlot::Measured(reading) => reading.kind,
            ReadingSlot::Failed(failure) => failure.kind,
        }
    }
}

/// Voltage, current and resistance for one channel, assembled as a unit before logging.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanRecord {
    /// Channel the record belongs to.
    pub channel: ChannelAddress,
    /// DC voltage slot.
    pub voltage: ReadingSlot,
    /// DC current slot.
    pub current: ReadingSlot,
    /// Resistance slot.
    pub resistance: ReadingSlot,
}

impl ScanRecord {
    /// Slots in voltage, current, resistance order.
    pub fn slots(&self) -> [&ReadingSlot; 3] {
        [&self.voltage, &self.current, &self.resistance]
    }

    /// True when every slot holds a reading.
    pub fn is_complete(&self) -> bool {
        self.slots()
            .iter()
            .all(|slot| matches!(slot, ReadingSlot::Measured(_)))
    }
}
