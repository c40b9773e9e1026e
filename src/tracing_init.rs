//! Tracing setup for the CLI.
//!
//! Installs one `tracing-subscriber` fmt layer in the configured format (pretty, compact
//! or JSON) behind an `EnvFilter`. `RUST_LOG` overrides the configured level.

use crate::config::ScanConfig;
use std::io::IsTerminal;
use std::str::FromStr;
use tracing::Level;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Output format for tracing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Multi-line, for interactive runs
    Pretty,
    /// Single line per event
    Compact,
    /// One JSON object per event
    Json,
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "compact" => Ok(Self::Compact),
            "json" => Ok(Self::Json),
            _ => Err(format!(
                "Invalid log format '{}'. Must be one of: pretty, compact, json",
                s
            )),
        }
    }
}

/// Parse log level string into tracing Level
pub fn parse_log_level(level: &str) -> Result<Level, String> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        _ => Err(format!(
            "Invalid log level '{}'. Must be one of: trace, debug, info, warn, error",
            level
        )),
    }
}

/// Initialize tracing from the `[application]` section. Colours only on a terminal.
pub fn init_from_config(config: &ScanConfig) -> Result<(), String> {
    let level = parse_log_level(&config.application.log_level)?;
    let format = config.application.log_format.parse()?;
    init(level, format, std::io::stdout().is_terminal())
}

/// Install the global subscriber. A no-op if one is already set.
pub fn init(level: Level, format: OutputFormat, ansi: bool) -> Result<(), String> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.to_string().to_lowercase()));

    let layer = match format {
        OutputFormat::Pretty => fmt::layer().pretty().with_ansi(ansi).boxed(),
        OutputFormat::Compact => fmt::layer().compact().with_ansi(false).boxed(),
        OutputFormat::Json => fmt::layer().json().boxed(),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(layer)
        .try_init()
        .or_else(|e| match e.to_string() {
            msg if msg.contains("already been set") => Ok(()),
            msg => Err(format!("Failed to initialize tracing: {}", msg)),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_log_level() {
        assert!(matches!(parse_log_level("trace"), Ok(Level::TRACE)));
        assert!(matches!(parse_log_level("Debug"), Ok(Level::DEBUG)));
        assert!(parse_log_level("verbose").is_err());
    }

    #[test]
    fn test_output_format_parse() {
        assert_eq!("json".parse::<OutputFormat>(), Ok(OutputFormat::Json));
        assert_eq!("Compact".parse::<OutputFormat>(), Ok(OutputFormat::Compact));
        assert!("xml".parse::<OutputFormat>().is_err());
    }

    #[test]
    fn init_rejects_bad_level_before_touching_the_subscriber() {
        let mut config = ScanConfig::default();
        config.application.log_level = "loud".to_string();
        assert!(init_from_config(&config).is_err());
    }
}
