//! # Replay Status Source
//!
//! Feeds the monitor from a JSON Lines capture instead of a live charger.
//!
//! Each non-blank line is one poll:
//!
//! ```text
//! [{"slot_index":0,"work_state":1,"voltage":1.32,"current":1.0,"battery_temperature":24.0}]
//! {"read_error":"usb timeout"}
//! [{"slot_index":0,"work_state":2,"voltage":1.45,"current":0.0,"battery_temperature":29.5}]
//! ```
//!
//! The whole capture is parsed when the source is opened. Polling past the
//! last frame is a fatal device error.

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use super::{check_snapshot, Snapshot, StatusSource};
use crate::error::{ChargeError, Result};

/// One captured poll
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Frame {
    Slots(Snapshot),
    ReadError { read_error: String },
}

/// Status source replaying a capture file
#[derive(Debug)]
pub struct ReplaySource {
    path: PathBuf,
    frames: VecDeque<Frame>,
    total: usize,
}

impl ReplaySource {
    /// Open and parse a capture file
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or a line is not a valid frame
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)?;
        let frames = parse_frames(&contents)?;
        info!("Loaded {} frames from {}", frames.len(), path.display());
        Ok(Self {
            path: path.to_path_buf(),
            total: frames.len(),
            frames,
        })
    }

    pub fn remaining(&self) -> usize {
        self.frames.len()
    }
}

fn parse_frames(contents: &str) -> Result<VecDeque<Frame>> {
    contents
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(idx, line)| {
            serde_json::from_str::<Frame>(line).map_err(|e| {
                ChargeError::Device(format!("Invalid capture frame on line {}: {}", idx + 1, e))
            })
        })
        .collect()
}

#[async_trait]
impl StatusSource for ReplaySource {
    async fn start(&mut self) -> Result<()> {
        Ok(())
    }

    async fn snapshot(&mut self) -> Result<Snapshot> {
        match self.frames.pop_front() {
            Some(Frame::Slots(snapshot)) => {
                check_snapshot(&snapshot)?;
                Ok(snapshot)
            }
            Some(Frame::ReadError { read_error }) => Err(ChargeError::DeviceRead(read_error)),
            None => Err(ChargeError::Device(format!(
                "Capture {} exhausted after {} frames",
                self.path.display(),
                self.total
            ))),
        }
    }

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }

    fn describe(&self) -> String {
        format!("replay of {}", self.path.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn capture(lines: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(lines.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    const CAPTURE: &str = r#"[{"slot_index":0,"work_state":1,"voltage":1.32,"current":1.0,"battery_temperature":24.0}]

{"read_error":"usb timeout"}
[{"slot_index":0,"work_state":2,"voltage":1.45,"current":0.0,"battery_temperature":29.5}]
"#;

    #[tokio::test]
    async fn test_replays_frames_in_order() {
        let file = capture(CAPTURE);
        let mut source = ReplaySource::open(file.path()).unwrap();
        assert_eq!(source.remaining(), 3);

        let first = source.snapshot().await.unwrap();
        assert!(first[0].is_active());

        let hiccup = source.snapshot().await.unwrap_err();
        assert!(hiccup.is_transient());
        assert!(hiccup.to_string().contains("usb timeout"));

        let last = source.snapshot().await.unwrap();
        assert!(!last[0].is_active());
    }

    #[tokio::test]
    async fn test_exhausted_capture_is_fatal() {
        let file = capture(CAPTURE);
        let mut source = ReplaySource::open(file.path()).unwrap();
        for _ in 0..3 {
            let _ = source.snapshot().await;
        }
        let err = source.snapshot().await.unwrap_err();
        assert!(!err.is_transient());
        assert!(err.to_string().contains("exhausted after 3 frames"));
    }

    #[test]
    fn test_malformed_line_reports_line_number() {
        let file = capture("[]\n{\"slots\": 3}\n");
        let err = ReplaySource::open(file.path()).unwrap_err();
        assert!(err.to_string().contains("line 2"));
    }

    #[test]
    fn test_missing_capture_file() {
        let result = ReplaySource::open("/nonexistent/capture.jsonl");
        assert!(matches!(result, Err(ChargeError::Io(_))));
    }
}
