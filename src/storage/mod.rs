//! # Storage Module
//!
//! Turns slot readings into fixed-point samples and hands them to a
//! time-series store.
//!
//! Stored values use the integer resolution of the round robin archives:
//!
//! | Channel | Stored as | Example |
//! |---------|-----------|---------|
//! | voltage | millivolts | 1.2345 V -> 1234 |
//! | current | milliamps | -0.5 A -> -500 |
//! | temperature | tenths of a degree | 25.67 °C -> 256 |
//!
//! Conversion truncates toward zero, it never rounds. Archives written by
//! earlier runs depend on this.

pub mod rrd;

use async_trait::async_trait;
use std::path::Path;

use crate::device::SlotStatus;
use crate::error::Result;

/// Scale volts or amps to an integer milli-unit, truncating
pub fn to_milli(value: f64) -> i64 {
    (value * 1000.0) as i64
}

/// Scale degrees to integer tenths, truncating
pub fn to_deci(value: f64) -> i64 {
    (value * 10.0) as i64
}

/// One recorded point for one slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sample {
    /// Seconds since the Unix epoch
    pub timestamp: i64,
    pub voltage_mv: i64,
    pub current_ma: i64,
    pub temperature_dc: i64,
}

impl Sample {
    pub fn from_status(status: &SlotStatus, timestamp: i64) -> Self {
        Self {
            timestamp,
            voltage_mv: to_milli(status.voltage),
            current_ma: to_milli(status.current),
            temperature_dc: to_deci(status.battery_temperature),
        }
    }
}

/// Append-only, bounded-retention time-series store keyed by file
///
/// Every series has three channels: voltage, current and temperature.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SeriesSink: Send {
    /// Create an empty series accepting points after `origin`
    async fn create(&mut self, series: &Path, origin: i64) -> Result<()>;

    /// Append one point
    ///
    /// Fails unless `sample.timestamp` is strictly greater than the last
    /// point in the series.
    async fn update(&mut self, series: &Path, sample: &Sample) -> Result<()>;

    /// Draw the series between `start` and `end` into `chart`
    async fn render(&mut self, series: &Path, chart: &Path, start: i64, end: i64) -> Result<()>;
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::fixtures::charging;

    #[test]
    fn test_voltage_truncates_not_rounds() {
        assert_eq!(to_milli(1.2345), 1234);
        assert_eq!(to_milli(1.2349), 1234);
        assert_eq!(to_milli(4.2), 4200);
    }

    #[test]
    fn test_negative_current_truncates_toward_zero() {
        assert_eq!(to_milli(-0.5), -500);
        assert_eq!(to_milli(-1.2345), -1234);
    }

    #[test]
    fn test_temperature_in_tenths() {
        assert_eq!(to_deci(25.67), 256);
        assert_eq!(to_deci(0.09), 0);
        assert_eq!(to_deci(-3.25), -32);
    }

    #[test]
    fn test_sample_from_status() {
        let mut status = charging(0, 1.2345);
        status.current = 0.75;
        status.battery_temperature = 31.28;

        let sample = Sample::from_status(&status, 1_700_000_005);
        assert_eq!(
            sample,
            Sample {
                timestamp: 1_700_000_005,
                voltage_mv: 1234,
                current_ma: 750,
                temperature_dc: 312,
            }
        );
    }

    #[tokio::test]
    async fn test_memory_sink_rejects_non_increasing_timestamps() {
        let series = Path::new("slot1.rrd");
        let mut sink = mocks::MemorySink::new();
        sink.create(series, 100).await.unwrap();

        let sample = Sample::from_status(&charging(0, 1.3), 100);
        assert!(sink.update(series, &sample).await.is_err());

        let sample = Sample { timestamp: 101, ..sample };
        assert!(sink.update(series, &sample).await.is_ok());
        assert!(sink.update(series, &sample).await.is_err());
        assert_eq!(sink.points(series).len(), 1);
    }
}
