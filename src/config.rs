//! # Configuration Module
//!
//! Handles loading and validating configuration from TOML files.
//!
//! Every key is optional. An empty file yields the same configuration as
//! [`Config::default`].

use serde::de::Error;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{ChargeError, Result};

/// Main configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Which kind of status source feeds the monitor
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    /// External driver program printing a JSON snapshot per call
    #[default]
    Command,
    /// Previously captured JSON Lines file
    Replay,
}

/// Device link configuration
#[derive(Debug, Deserialize, Clone)]
pub struct DeviceConfig {
    #[serde(default)]
    pub kind: DeviceKind,

    #[serde(default = "default_status_command")]
    pub command: Vec<String>,

    #[serde(default)]
    pub start_command: Vec<String>,

    #[serde(default)]
    pub close_command: Vec<String>,

    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default)]
    pub replay_file: String,
}

/// Polling policy
#[derive(Debug, Deserialize, Clone)]
pub struct MonitorConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_read_retries")]
    pub read_retries: u32,

    /// 0 disables the cap
    #[serde(default)]
    pub max_duration_s: u64,
}

/// Where run artifacts are written
#[derive(Debug, Deserialize, Clone)]
pub struct OutputConfig {
    #[serde(default = "default_output_dir")]
    pub dir: String,

    #[serde(default = "default_prefix")]
    pub prefix: String,
}

/// Round robin database tooling
#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_rrdtool")]
    pub rrdtool: String,

    #[serde(default)]
    pub echo_commands: bool,

    /// Upper bound for one rrdtool invocation
    #[serde(default = "default_rrdtool_timeout_ms")]
    pub timeout_ms: u64,
}

/// Diagnostic logging
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_to_file")]
    pub file: bool,
}

// Default value functions
fn default_status_command() -> Vec<String> { vec!["mc3000-status".to_string()] }
fn default_timeout_ms() -> u64 { 2000 }

fn default_poll_interval_ms() -> u64 { 1000 }
fn default_read_retries() -> u32 { 3 }

fn default_output_dir() -> String { "./data".to_string() }
fn default_prefix() -> String { "MC3000".to_string() }

fn default_rrdtool() -> String { "rrdtool".to_string() }
fn default_rrdtool_timeout_ms() -> u64 { 10000 }

fn default_log_level() -> String { "info".to_string() }
fn default_log_to_file() -> bool { true }

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            kind: DeviceKind::default(),
            command: default_status_command(),
            start_command: Vec::new(),
            close_command: Vec::new(),
            timeout_ms: default_timeout_ms(),
            replay_file: String::new(),
        }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            read_retries: default_read_retries(),
            max_duration_s: 0,
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: default_output_dir(),
            prefix: default_prefix(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            rrdtool: default_rrdtool(),
            echo_commands: false,
            timeout_ms: default_rrdtool_timeout_ms(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: default_log_to_file(),
        }
    }
}

impl MonitorConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn max_duration(&self) -> Option<Duration> {
        (self.max_duration_s > 0).then(|| Duration::from_secs(self.max_duration_s))
    }
}

impl DeviceConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl StorageConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl OutputConfig {
    pub fn dir_path(&self) -> PathBuf {
        PathBuf::from(&self.dir)
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - File cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use chargewatch::config::Config;
    ///
    /// let config = Config::load("chargewatch.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns error if any configuration value is out of valid range
    pub fn validate(&self) -> Result<()> {
        match self.device.kind {
            DeviceKind::Command if self.device.command.is_empty() => {
                return Err(invalid("device command cannot be empty"));
            }
            DeviceKind::Replay if self.device.replay_file.is_empty() => {
                return Err(invalid("device replay_file cannot be empty for replay devices"));
            }
            _ => {}
        }

        if self.device.timeout_ms == 0 || self.device.timeout_ms > 60000 {
            return Err(invalid("timeout_ms must be between 1 and 60000"));
        }

        // rrd step is one second; faster polls would collide on timestamps
        if self.monitor.poll_interval_ms < 1000 || self.monitor.poll_interval_ms > 60000 {
            return Err(invalid("poll_interval_ms must be between 1000 and 60000"));
        }

        if self.monitor.read_retries > 100 {
            return Err(invalid("read_retries must be between 0 and 100"));
        }

        if self.output.dir.is_empty() {
            return Err(invalid("output dir cannot be empty"));
        }

        if self.output.prefix.is_empty() || self.output.prefix.contains(|c| c == '/' || c == '\\') {
            return Err(invalid("output prefix must be a non-empty file name fragment"));
        }

        if self.storage.rrdtool.is_empty() {
            return Err(invalid("rrdtool path cannot be empty"));
        }

        if self.storage.timeout_ms == 0 || self.storage.timeout_ms > 600000 {
            return Err(invalid("storage timeout_ms must be between 1 and 600000"));
        }

        if !["trace", "debug", "info", "warn", "error"].contains(&self.logging.level.as_str()) {
            return Err(invalid("log level must be one of: trace, debug, info, warn, error"));
        }

        Ok(())
    }
}

fn invalid(msg: &str) -> ChargeError {
    ChargeError::Config(toml::de::Error::custom(msg))
}
