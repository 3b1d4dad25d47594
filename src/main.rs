//! # Chargewatch
//!
//! Monitor a multi-slot battery charger and record per-slot charge curves.
//!
//! # Control Flow
//!
//! 1. **Initialization**
//!    - Parse the command line and load the configuration
//!    - Name the run after the current time and create the output directory
//!    - Set up logging to stderr and to the run's monitor log
//!
//! 2. **Monitoring**
//!    - Open the charger (driver program or recorded capture)
//!    - Poll until no slot is charging any more
//!    - Ctrl+C stops polling but still writes charts and the report
//!
//! # Examples
//!
//! ```bash
//! chargewatch --config chargewatch.toml
//! chargewatch --replay capture.jsonl --output-dir /tmp/run
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use chargewatch::config::{Config, DeviceKind};
use chargewatch::device::command::CommandSource;
use chargewatch::device::replay::ReplaySource;
use chargewatch::device::StatusSource;
use chargewatch::monitor::{Monitor, PollPolicy};
use chargewatch::report::RunArtifacts;
use chargewatch::storage::rrd::RrdTool;

/// Command line options
#[derive(Debug, Parser)]
#[command(name = "chargewatch", version, about)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory for report, audit log, databases and charts
    #[arg(short, long)]
    output_dir: Option<String>,

    /// Replay a recorded capture instead of talking to a charger
    #[arg(long)]
    replay: Option<String>,

    /// Stop after this many seconds even if slots are still charging
    #[arg(long)]
    max_duration: Option<u64>,

    /// Log at debug level
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    /// Load the configuration file (if any) and apply command line overrides
    fn resolve_config(&self) -> Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::load(path)
                .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
            None => Config::default(),
        };

        if let Some(dir) = &self.output_dir {
            config.output.dir = dir.clone();
        }
        if let Some(file) = &self.replay {
            config.device.kind = DeviceKind::Replay;
            config.device.replay_file = file.clone();
        }
        if let Some(seconds) = self.max_duration {
            config.monitor.max_duration_s = seconds;
        }
        if self.verbose {
            config.logging.level = "debug".to_string();
        }

        config.validate().context("Invalid configuration")?;
        Ok(config)
    }
}

/// Log to stderr and, when enabled, to the run's monitor log
///
/// The returned guard flushes the file writer when dropped.
fn init_logging(config: &Config, artifacts: &RunArtifacts) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_new(&config.logging.level)
        .with_context(|| format!("Invalid log level '{}'", config.logging.level))?;

    let stderr_layer = fmt::layer().with_writer(std::io::stderr).with_target(false);

    let (file_layer, guard) = if config.logging.file {
        let appender = tracing_appender::rolling::never(artifacts.dir(), artifacts.monitor_log_name());
        let (writer, guard) = tracing_appender::non_blocking(appender);
        let layer = fmt::layer().with_writer(writer).with_ansi(false);
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .init();

    Ok(guard)
}

fn open_source(config: &Config) -> Result<Box<dyn StatusSource>> {
    let source: Box<dyn StatusSource> = match config.device.kind {
        DeviceKind::Command => Box::new(CommandSource::from_config(&config.device)?),
        DeviceKind::Replay => Box::new(
            ReplaySource::open(&config.device.replay_file)
                .with_context(|| format!("Failed to open capture {}", config.device.replay_file))?,
        ),
    };
    Ok(source)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = cli.resolve_config()?;

    let stamp = chrono::Utc::now().timestamp();
    let artifacts = RunArtifacts::new(config.output.dir_path(), config.output.prefix.clone(), stamp);
    artifacts
        .prepare()
        .with_context(|| format!("Failed to create {}", artifacts.dir().display()))?;

    let _guard = init_logging(&config, &artifacts)?;
    info!("Chargewatch v{} starting...", env!("CARGO_PKG_VERSION"));
    info!("Writing run {} to {}", stamp, artifacts.dir().display());

    let source = open_source(&config)?;
    let sink = Box::new(RrdTool::from_config(&config.storage));
    let cancel = CancellationToken::new();

    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C, finishing up...");
            ctrl_c.cancel();
        }
    });

    info!("Press Ctrl+C to stop early");
    let monitor = Monitor::new(source, sink, PollPolicy::from_config(&config.monitor), cancel);
    let summary = monitor.run(&artifacts).await?;

    info!(
        "Run {} ended after {}s: {}",
        stamp,
        summary.end_timestamp - summary.start_timestamp,
        summary.stop_reason
    );
    info!("Report written to {}", artifacts.report().display());

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_defaults_without_config_file() {
        let cli = Cli::parse_from(["chargewatch"]);
        let config = tokio_test::assert_ok!(cli.resolve_config());
        assert_eq!(config.device.kind, DeviceKind::Command);
        assert_eq!(config.monitor.read_retries, 3);
        assert_eq!(config.output.dir, "./data");
    }

    #[test]
    fn test_overrides_apply() {
        let cli = Cli::parse_from([
            "chargewatch",
            "--replay",
            "capture.jsonl",
            "--output-dir",
            "/tmp/run",
            "--max-duration",
            "600",
            "-v",
        ]);
        let config = tokio_test::assert_ok!(cli.resolve_config());
        assert_eq!(config.device.kind, DeviceKind::Replay);
        assert_eq!(config.device.replay_file, "capture.jsonl");
        assert_eq!(config.output.dir, "/tmp/run");
        assert_eq!(config.monitor.max_duration_s, 600);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_missing_config_file_is_reported() {
        let cli = Cli::parse_from(["chargewatch", "--config", "/nonexistent/chargewatch.toml"]);
        let err = tokio_test::assert_err!(cli.resolve_config());
        assert!(err.to_string().contains("Failed to load configuration"));
    }

    #[test]
    fn test_open_replay_source() {
        let dir = tempfile::tempdir().unwrap();
        let capture = dir.path().join("capture.jsonl");
        std::fs::write(&capture, "[]\n").unwrap();

        let mut config = Config::default();
        config.device.kind = DeviceKind::Replay;
        config.device.replay_file = capture.display().to_string();
        let source = open_source(&config).unwrap();
        assert!(source.describe().contains("capture.jsonl"));
    }
}
