//! # Command Status Source
//!
//! Talks to the charger through an external driver program.
//!
//! The driver owns the wire protocol. Each poll runs the status command once
//! and expects a JSON array of slot records on stdout:
//!
//! ```text
//! [{"slot_index":0,"work_state":1,"voltage":1.41,"current":0.5,"battery_temperature":26.1}, ...]
//! ```
//!
//! A non-zero exit, a timeout or unreadable output counts as a transient read
//! error. Failing to launch the program at all is fatal.

use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

use super::{check_snapshot, Snapshot, StatusSource};
use crate::config::DeviceConfig;
use crate::error::{ChargeError, Result};

/// Status source backed by a driver program
#[derive(Debug, Clone)]
pub struct CommandSource {
    status: Vec<String>,
    start: Vec<String>,
    close: Vec<String>,
    timeout: Duration,
}

impl CommandSource {
    /// Create a source running `status` for every poll
    ///
    /// `start` and `close` may be empty, in which case the lifecycle call is
    /// a no-op.
    ///
    /// # Errors
    ///
    /// Returns error if `status` is empty
    pub fn new(
        status: Vec<String>,
        start: Vec<String>,
        close: Vec<String>,
        timeout: Duration,
    ) -> Result<Self> {
        if status.is_empty() {
            return Err(ChargeError::Device("status command cannot be empty".to_string()));
        }
        Ok(Self {
            status,
            start,
            close,
            timeout,
        })
    }

    pub fn from_config(config: &DeviceConfig) -> Result<Self> {
        Self::new(
            config.command.clone(),
            config.start_command.clone(),
            config.close_command.clone(),
            config.timeout(),
        )
    }

    /// Run `argv` and return its stdout
    async fn run(&self, argv: &[String]) -> Result<Vec<u8>> {
        let Some((program, args)) = argv.split_first() else {
            return Ok(Vec::new());
        };

        debug!("Running driver command: {}", argv.join(" "));

        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();

        let output = match tokio::time::timeout(self.timeout, child).await {
            Err(_) => {
                return Err(ChargeError::DeviceRead(format!(
                    "{} timed out after {} ms",
                    program,
                    self.timeout.as_millis()
                )))
            }
            Ok(Err(e)) => {
                return Err(ChargeError::Device(format!("Failed to run {}: {}", program, e)))
            }
            Ok(Ok(output)) => output,
        };

        if !output.status.success() {
            return Err(ChargeError::DeviceRead(format!(
                "{} exited with {}: {}",
                program,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        Ok(output.stdout)
    }

    /// Lifecycle commands are not retried, so any failure is final
    async fn run_lifecycle(&self, argv: &[String]) -> Result<()> {
        match self.run(argv).await {
            Ok(_) => Ok(()),
            Err(ChargeError::DeviceRead(msg)) => Err(ChargeError::Device(msg)),
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl StatusSource for CommandSource {
    async fn start(&mut self) -> Result<()> {
        self.run_lifecycle(&self.start).await
    }

    async fn snapshot(&mut self) -> Result<Snapshot> {
        let stdout = self.run(&self.status).await?;
        let snapshot: Snapshot = serde_json::from_slice(&stdout)
            .map_err(|e| ChargeError::DeviceRead(format!("Unreadable status output: {}", e)))?;
        check_snapshot(&snapshot)?;
        Ok(snapshot)
    }

    async fn close(&mut self) -> Result<()> {
        self.run_lifecycle(&self.close).await
    }

    fn describe(&self) -> String {
        format!("driver `{}`", self.status.join(" "))
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::device::WorkState;

    fn sh(script: &str) -> Vec<String> {
        vec!["sh".to_string(), "-c".to_string(), script.to_string()]
    }

    fn source(status: Vec<String>) -> CommandSource {
        CommandSource::new(status, Vec::new(), Vec::new(), Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn test_empty_status_command_rejected() {
        let result = CommandSource::new(Vec::new(), Vec::new(), Vec::new(), Duration::from_secs(1));
        assert!(matches!(result, Err(ChargeError::Device(_))));
    }

    #[tokio::test]
    async fn test_snapshot_parses_stdout() {
        let mut source = source(sh(
            r#"echo '[{"slot_index":0,"work_state":1,"voltage":1.3,"current":0.9,"battery_temperature":25.5},{"slot_index":1,"work_state":0,"voltage":0,"current":0,"battery_temperature":0}]'"#,
        ));

        let snapshot = source.snapshot().await.unwrap();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].work_state, WorkState::Charging);
        assert!(snapshot[0].is_active());
        assert!(!snapshot[1].is_occupied());
    }

    #[tokio::test]
    async fn test_non_zero_exit_is_transient() {
        let mut source = source(sh("echo 'usb busy' >&2; exit 3"));
        let err = source.snapshot().await.unwrap_err();
        assert!(err.is_transient());
        assert!(err.to_string().contains("usb busy"));
    }

    #[tokio::test]
    async fn test_garbage_output_is_transient() {
        let mut source = source(sh("echo 'not json'"));
        assert!(source.snapshot().await.unwrap_err().is_transient());
    }

    #[tokio::test]
    async fn test_timeout_is_transient() {
        let mut source =
            CommandSource::new(sh("sleep 5"), Vec::new(), Vec::new(), Duration::from_millis(100))
                .unwrap();
        let err = source.snapshot().await.unwrap_err();
        assert!(err.is_transient());
        assert!(err.to_string().contains("timed out"));
    }

    #[tokio::test]
    async fn test_missing_program_is_fatal() {
        let mut source = source(vec!["/nonexistent/mc3000-status".to_string()]);
        let err = source.snapshot().await.unwrap_err();
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn test_empty_lifecycle_commands_are_noops() {
        let mut source = source(sh("echo '[]'"));
        assert!(source.start().await.is_ok());
        assert!(source.close().await.is_ok());
    }

    #[tokio::test]
    async fn test_failed_start_is_fatal() {
        let mut source =
            CommandSource::new(sh("echo '[]'"), sh("exit 1"), Vec::new(), Duration::from_secs(5))
                .unwrap();
        let err = source.start().await.unwrap_err();
        assert!(matches!(err, ChargeError::Device(_)));
    }
}
