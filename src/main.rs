//! CLI Entry Point for dmm-scan
//!
//! Provides command-line interface for:
//! - Running a measurement session over the configured scan list
//! - Exporting segment traces from a finished session log
//! - Checking a configuration file without touching the instrument
//!
//! # Usage
//!
//! Scan against the instrument:
//! ```bash
//! dmm-scan scan --config config/scan.toml
//! ```
//!
//! Rehearse a session without hardware:
//! ```bash
//! dmm-scan scan --mock --log /tmp/rehearsal.csv
//! ```
//!
//! Export the plot document:
//! ```bash
//! dmm-scan plot --output plot.json
//! ```

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use dmm_scan::config::{ScanConfig, DEFAULT_CONFIG_PATH};
use dmm_scan::data::{self, CsvSessionLog};
use dmm_scan::instrument::{InstrumentPort, MockInstrument, TcpScpiPort};
use dmm_scan::measurement::MeasurementKind;
use dmm_scan::plot::{PlotDocument, PlotSegment};
use dmm_scan::scan::{FailurePolicy, ScanEvent, ScanReport, ScanSequencer};
use dmm_scan::tracing_init;
use std::path::PathBuf;
use tokio::sync::mpsc;

#[derive(Parser)]
#[command(name = "dmm-scan")]
#[command(about = "Switch/DMM measurement session controller", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one measurement session over the scan list
    Scan {
        /// Use the built-in mock instrument instead of the network
        #[arg(long)]
        mock: bool,

        /// Override the configured failure policy
        #[arg(long, value_enum)]
        policy: Option<PolicyArg>,

        /// Override the configured retries per reading
        #[arg(long)]
        retries: Option<u32>,

        /// Override the configured session log path
        #[arg(long)]
        log: Option<PathBuf>,
    },

    /// Write segment traces of a session log as JSON
    Plot {
        /// Session log to read (defaults to the configured log)
        #[arg(long)]
        log: Option<PathBuf>,

        /// Output file (defaults to the configured plot output)
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Load and validate the configuration, then exit
    CheckConfig,
}

#[derive(Clone, Copy, ValueEnum)]
enum PolicyArg {
    Abort,
    Skip,
}

impl From<PolicyArg> for FailurePolicy {
    fn from(arg: PolicyArg) -> Self {
        match arg {
            PolicyArg::Abort => FailurePolicy::Abort,
            PolicyArg::Skip => FailurePolicy::SkipAndContinue,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = ScanConfig::load_from(&cli.config)
        .with_context(|| format!("Failed to load {}", cli.config.display()))?;
    tracing_init::init_from_config(&config).map_err(anyhow::Error::msg)?;
    config.validate()?;

    match cli.command {
        Commands::Scan {
            mock,
            policy,
            retries,
            log,
        } => run_scan(config, mock, policy, retries, log).await,
        Commands::Plot { log, output } => export_plot(&config, log, output),
        Commands::CheckConfig => check_config(&config),
    }
}

async fn open_port(config: &ScanConfig, mock: bool) -> Result<Box<dyn InstrumentPort>> {
    if mock {
        tracing::info!("Using mock instrument");
        return Ok(Box::new(
            MockInstrument::new()
                .with_value(MeasurementKind::Voltage, 12.5)
                .with_value(MeasurementKind::Current, 0.003)
                .with_value(MeasurementKind::Resistance, 4166.7),
        ));
    }
    let (host, port) = config.instrument.endpoint()?;
    let tcp = TcpScpiPort::connect(&host, port, config.instrument.connect_timeout())
        .await?
        .with_timeout(config.instrument.timeout());
    Ok(Box::new(tcp))
}

async fn run_scan(
    config: ScanConfig,
    mock: bool,
    policy: Option<PolicyArg>,
    retries: Option<u32>,
    log_path: Option<PathBuf>,
) -> Result<()> {
    let plan = config.plan()?;
    let log_path = log_path.unwrap_or_else(|| config.log.path.clone());
    let mut log = CsvSessionLog::open(&log_path)?;

    let port = open_port(&config, mock).await?;
    let (tx, rx) = mpsc::unbounded_channel();
    let mut sequencer = ScanSequencer::new(port)
        .with_setup(config.session)
        .with_policy(policy.map(Into::into).unwrap_or(config.scan.failure_policy))
        .with_max_retries(retries.unwrap_or(config.scan.max_retries))
        .with_events(tx);

    let stop = sequencer.stop_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received; stopping after the current channel");
            stop.request_stop();
        }
    });

    let progress = tokio::spawn(report_progress(rx));

    let report = sequencer.run_scan(&plan, &mut log).await?;
    drop(sequencer);
    if progress.await.is_err() {
        tracing::debug!("Progress task ended abnormally");
    }

    print_summary(&report, &log_path);
    if !report.is_success() {
        bail!("Scan session ended {:?}", report.status());
    }
    Ok(())
}

async fn report_progress(mut rx: mpsc::UnboundedReceiver<ScanEvent>) {
    while let Some(event) = rx.recv().await {
        match event {
            ScanEvent::ChannelStarted {
                channel,
                index,
                total,
            } => tracing::info!("[{}/{}] Scanning {}", index + 1, total, channel),
            ScanEvent::ReadingFailed(failure) => tracing::warn!(
                channel = %failure.channel,
                kind = %failure.kind,
                failure = %failure.failure,
                "Reading failed"
            ),
            ScanEvent::LogWriteFailed { channel, message } => {
                tracing::error!(%channel, "Record not logged: {}", message)
            }
            ScanEvent::ReadingTaken(_) | ScanEvent::ChannelCommitted(_) => {}
        }
    }
}

fn print_summary(report: &ScanReport, log_path: &std::path::Path) {
    println!("Status:     {:?}", report.status());
    println!(
        "Channels:   {} of {} committed",
        report.committed.len(),
        report.channels_planned
    );
    if let Some(summary) = &report.log {
        println!("Log:        {} ({} entries)", log_path.display(), summary.entries);
    }
    if !report.failures.is_empty() {
        println!("Failures:");
        for failure in &report.failures {
            println!(
                "  {} {} {}: {}",
                failure.channel, failure.kind, failure.failure, failure.message
            );
        }
    }
    if !report.overflow_readings.is_empty() {
        println!("Overflow readings: {}", report.overflow_readings.len());
    }
    for failure in &report.log_failures {
        println!("Log write failed: {}", failure.message);
    }
}

fn export_plot(config: &ScanConfig, log: Option<PathBuf>, output: Option<PathBuf>) -> Result<()> {
    let log = log.unwrap_or_else(|| config.log.path.clone());
    let output = output.unwrap_or_else(|| config.plot.output.clone());

    let lines = data::read_log(&log)?;
    let samples = data::series(&lines, config.plot.series.kind());
    let segments = if config.plot.segments.is_empty() {
        vec![PlotSegment::new(1, None, "blue")]
    } else {
        config.plot.segments.clone()
    };

    let document =
        PlotDocument::build(&config.plot.title, &config.plot.y_label, &samples, &segments)?;
    document.write_json(&output)?;
    tracing::info!(
        log = %log.display(),
        output = %output.display(),
        series = ?config.plot.series,
        samples = samples.len(),
        failed = samples.iter().filter(|s| s.is_none()).count(),
        "Plot document written"
    );
    Ok(())
}

fn check_config(config: &ScanConfig) -> Result<()> {
    let plan = config.plan()?;
    let endpoint = config.instrument.endpoint()?;
    println!("Configuration OK");
    println!("  Instrument: {}:{}", endpoint.0, endpoint.1);
    println!("  Channels:   {}", plan.channels().len());
    println!("  Policy:     {:?}", config.scan.failure_policy);
    println!("  Log:        {}", config.log.path.display());
    Ok(())
}
