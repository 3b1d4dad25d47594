//! # Error Types
//!
//! Custom error types for Chargewatch using `thiserror`.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for Chargewatch
#[derive(Debug, Error)]
pub enum ChargeError {
    /// Temporary trouble on the device link; the poll can be retried
    #[error("Could not read data from device: {0}")]
    DeviceRead(String),

    /// Device failures that retrying will not fix
    #[error("Device error: {0}")]
    Device(String),

    /// Time-series store failures
    #[error("Series {} failed: {reason}", path.display())]
    Series { path: PathBuf, reason: String },

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Audit log errors
    #[error("Audit log error: {0}")]
    Csv(#[from] csv::Error),

    /// Snapshot decoding errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ChargeError {
    /// Whether the failed operation may succeed if simply tried again
    pub fn is_transient(&self) -> bool {
        matches!(self, ChargeError::DeviceRead(_))
    }

    pub(crate) fn series(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        ChargeError::Series {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

/// Result type alias for Chargewatch
pub type Result<T> = std::result::Result<T, ChargeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_device_read_is_transient() {
        assert!(ChargeError::DeviceRead("timeout".into()).is_transient());
        assert!(!ChargeError::Device("gone".into()).is_transient());
        assert!(!ChargeError::series("a.rrd", "locked").is_transient());
        assert!(!ChargeError::Io(std::io::Error::other("disk full")).is_transient());
    }

    #[test]
    fn test_series_error_names_path() {
        let err = ChargeError::series("/tmp/MC3000-1-Slot1.rrd", "illegal attempt to update");
        let msg = err.to_string();
        assert!(msg.contains("MC3000-1-Slot1.rrd"));
        assert!(msg.contains("illegal attempt to update"));
    }
}
