//! Measurement-session controller.
//!
//! - [`configurator`]: configuration sequence for one (channel, kind) pair.
//! - [`reader`]: acquisition query for one (channel, kind) pair.
//! - [`sequencer`]: the channel-by-channel loop, failure policy and session report.
//!
//! Within a channel the kinds run voltage, then current, then resistance, each configured
//! and read before the next begins. Channels run in the order the caller gives.

pub mod configurator;
pub mod reader;
pub mod sequencer;

pub use configurator::ChannelConfigurator;
pub use reader::MeasurementReader;
pub use sequencer::{
    FailurePolicy, LogFailure, ScanEvent, ScanPlan, ScanReport, ScanSequencer, SessionSetup,
    SessionStatus, StopHandle,
};
