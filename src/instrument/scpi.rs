//! SCPI command grammar for the switch/DMM unit.
//!
//! The scan core needs four logical operations from the grammar: select range, enable
//! remote (4-wire) sensing, set the inter-channel delay, and configure-and-read one
//! measurement kind on a channel. This module spells those out as command strings, with
//! the channel list always passed explicitly in parentheses, e.g.
//!
//! ```text
//! :CONFigure:SCALar:VOLTage:DC 100,6.5,(@1001)
//! :SENSe:VOLTage:DC:NPLCycles 10,(@1001)
//! :SENSe:VOLTage:OCOMpensated 1,(@1001)
//! :MEASure:SCALar:VOLTage:DC? (@1001)
//! ```

use crate::error::{AppResult, ScanError};
use crate::measurement::{AcquisitionSettings, ChannelAddress, MeasurementKind};

/// Numbers are written in their shortest round-trip decimal form (`100`, `6.5`, `0.002`).
fn number(value: f64) -> String {
    format!("{}", value)
}

fn on_off(flag: bool) -> &'static str {
    if flag {
        "1"
    } else {
        "0"
    }
}

/// `(@1001,@1002)` channel-list parameter.
pub fn channel_list<'a, I>(channels: I) -> String
where
    I: IntoIterator<Item = &'a ChannelAddress>,
{
    let joined = channels
        .into_iter()
        .map(ChannelAddress::as_str)
        .collect::<Vec<_>>()
        .join(",");
    format!("({})", joined)
}

/// Session-wide DC voltage range.
pub fn select_range(range: f64) -> String {
    format!(":SENSe:VOLTage:DC:RANGe {}", number(range))
}

/// Enable or disable remote (4-wire) sensing.
pub fn remote_sensing(enabled: bool) -> String {
    format!("SENSE:REMOTE {}", if enabled { "ON" } else { "OFF" })
}

/// Inter-channel settling delay in seconds for the given channels.
pub fn channel_delay(seconds: f64, channels: &[ChannelAddress]) -> String {
    format!(
        ":ROUTe:CHANnel:DELay {},{}",
        number(seconds),
        channel_list(channels)
    )
}

/// Function, range and resolution selection. Resets the channel's active function.
pub fn configure(
    kind: MeasurementKind,
    channel: &ChannelAddress,
    settings: &AcquisitionSettings,
) -> String {
    let function = match kind {
        MeasurementKind::Voltage => "VOLTage:DC",
        MeasurementKind::Current => "CURRent:DC",
        MeasurementKind::Resistance => "RESistance",
    };
    format!(
        ":CONFigure:SCALar:{} {},{},({})",
        function,
        number(settings.range),
        number(settings.resolution_digits),
        channel
    )
}

/// Integration time in power-line cycles for the selected function.
pub fn integration_cycles(kind: MeasurementKind, channel: &ChannelAddress, cycles: f64) -> String {
    let subsystem = match kind {
        MeasurementKind::Voltage => "VOLTage:DC",
        MeasurementKind::Current => "CURRent:DC",
        MeasurementKind::Resistance => "RESistance",
    };
    format!(
        ":SENSe:{}:NPLCycles {},({})",
        subsystem,
        number(cycles),
        channel
    )
}

/// Offset compensation for the selected function.
pub fn offset_compensation(kind: MeasurementKind, channel: &ChannelAddress, enabled: bool) -> String {
    let subsystem = match kind {
        MeasurementKind::Voltage => "VOLTage",
        MeasurementKind::Current => "CURRent",
        MeasurementKind::Resistance => "RESistance",
    };
    format!(
        ":SENSe:{}:OCOMpensated {},({})",
        subsystem,
        on_off(enabled),
        channel
    )
}

/// Acquisition query for one kind on one channel.
pub fn measure(kind: MeasurementKind, channel: &ChannelAddress) -> String {
    let function = match kind {
        MeasurementKind::Voltage => "VOLTage:DC",
        MeasurementKind::Current => "CURRent:DC",
        MeasurementKind::Resistance => "RESistance",
    };
    format!(":MEASure:SCALar:{}? ({})", function, channel)
}

/// Parse an ASCII reply of comma-separated numbers (`+1.25000000E+01,+1.24E+01`).
///
/// An empty reply or any non-numeric field is a protocol error.
pub fn parse_ascii_values(reply: &str) -> AppResult<Vec<f64>> {
    let trimmed = reply.trim();
    if trimmed.is_empty() {
        return Err(ScanError::Protocol("Empty reply from instrument".to_string()));
    }
    trimmed
        .split(',')
        .map(|field| {
            let field = field.trim();
            field.parse::<f64>().map_err(|_| {
                ScanError::Protocol(format!(
                    "Failed to parse '{}' as a number in reply '{}'",
                    field, trimmed
                ))
            })
        })
        .collect()
}
