//! # RRDtool Series Sink
//!
//! Stores every slot in its own round robin database by running the
//! `rrdtool` executable.
//!
//! ## Layout
//!
//! Step is one second. Each database holds three GAUGE data sources
//! (`voltage`, `current`, `bat_tem`) and four archives:
//!
//! | Archive | Resolution | Rows | Span |
//! |---------|------------|------|------|
//! | AVERAGE | 1 s | 21600 | 6 h |
//! | AVERAGE | 2 s | 10800 | 6 h |
//! | MIN | 1 h | 12 | 12 h |
//! | MAX | 1 h | 12 | 12 h |

use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info};

use super::{Sample, SeriesSink};
use crate::config::StorageConfig;
use crate::error::{ChargeError, Result};

/// Seconds between primary data points
pub const STEP_SECONDS: u32 = 1;

/// Default bound for one rrdtool run
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

const DATA_SOURCES: [&str; 3] = [
    "DS:voltage:GAUGE:1:0:U",
    "DS:current:GAUGE:1:0:U",
    "DS:bat_tem:GAUGE:1:0:U",
];

const ARCHIVES: [&str; 4] = [
    "RRA:AVERAGE:0.5:1:21600",
    "RRA:AVERAGE:0.5:2:10800",
    "RRA:MIN:0.5:3600:12",
    "RRA:MAX:0.5:3600:12",
];

/// Series sink driving the `rrdtool` command line tool
#[derive(Debug, Clone)]
pub struct RrdTool {
    binary: String,
    echo_commands: bool,
    timeout: Duration,
}

impl RrdTool {
    pub fn new(binary: impl Into<String>, echo_commands: bool) -> Self {
        Self {
            binary: binary.into(),
            echo_commands,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn from_config(config: &StorageConfig) -> Self {
        Self::new(config.rrdtool.clone(), config.echo_commands).with_timeout(config.timeout())
    }

    async fn exec(&self, series: &Path, args: Vec<String>) -> Result<()> {
        let command_line = format!("{} {}", self.binary, args.join(" "));
        if self.echo_commands {
            info!("{}", command_line);
        } else {
            debug!("{}", command_line);
        }

        let child = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();

        let output = match tokio::time::timeout(self.timeout, child).await {
            Err(_) => {
                return Err(ChargeError::series(
                    series,
                    format!(
                        "{} {} timed out after {} ms",
                        self.binary,
                        args.first().map(String::as_str).unwrap_or_default(),
                        self.timeout.as_millis()
                    ),
                ))
            }
            Ok(Err(e)) => {
                return Err(ChargeError::series(series, format!("Failed to run {}: {}", self.binary, e)))
            }
            Ok(Ok(output)) => output,
        };

        if !output.status.success() {
            return Err(ChargeError::series(
                series,
                format!(
                    "{} {} exited with {}: {}",
                    self.binary,
                    args.first().map(String::as_str).unwrap_or_default(),
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            ));
        }

        Ok(())
    }
}

#[async_trait]
impl SeriesSink for RrdTool {
    async fn create(&mut self, series: &Path, origin: i64) -> Result<()> {
        self.exec(series, create_args(series, origin)).await
    }

    async fn update(&mut self, series: &Path, sample: &Sample) -> Result<()> {
        self.exec(series, update_args(series, sample)).await
    }

    async fn render(&mut self, series: &Path, chart: &Path, start: i64, end: i64) -> Result<()> {
        self.exec(series, graph_args(series, chart, start, end)).await
    }
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// rrdtool splits DEF arguments on ':'
fn def_path(path: &Path) -> String {
    path_arg(path).replace(':', "\\:")
}

pub fn create_args(series: &Path, origin: i64) -> Vec<String> {
    let mut args = vec![
        "create".to_string(),
        path_arg(series),
        format!("--step={}", STEP_SECONDS),
        "--start".to_string(),
        origin.to_string(),
    ];
    args.extend(DATA_SOURCES.iter().map(|ds| ds.to_string()));
    args.extend(ARCHIVES.iter().map(|rra| rra.to_string()));
    args
}

pub fn update_args(series: &Path, sample: &Sample) -> Vec<String> {
    vec![
        "update".to_string(),
        path_arg(series),
        format!(
            "{}:{}:{}:{}",
            sample.timestamp, sample.voltage_mv, sample.current_ma, sample.temperature_dc
        ),
    ]
}

pub fn graph_args(series: &Path, chart: &Path, start: i64, end: i64) -> Vec<String> {
    let rrd = def_path(series);
    vec![
        "graph".to_string(),
        path_arg(chart),
        "--start".to_string(),
        start.to_string(),
        "--end".to_string(),
        end.to_string(),
        "--step".to_string(),
        STEP_SECONDS.to_string(),
        format!("DEF:batvoltage={}:voltage:LAST", rrd),
        format!("DEF:batcurrent={}:current:LAST", rrd),
        format!("DEF:batbat_tem={}:bat_tem:LAST", rrd),
        "AREA:batvoltage#FF0000:Voltage".to_string(),
        "AREA:batcurrent#0000FF80:Current".to_string(),
        "LINE1:batbat_tem#00FF00:Temperature".to_string(),
    ]
}
