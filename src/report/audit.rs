//! # Audit Log
//!
//! Semicolon separated table with one row per recorded sample, flushed as it
//! is written so an interrupted run keeps every row.

use serde::Serialize;
use std::fs::File;
use std::io::Write;
use std::path::Path;

use crate::device::SlotStatus;
use crate::error::{ChargeError, Result};

/// Column names, in order
pub const HEADERS: [&str; 10] = [
    "Battery",
    "Timestamp",
    "Voltage",
    "Current",
    "Temperature",
    "Work",
    "Work Time",
    "dCaps",
    "Caps Decimal",
    "Inner Resistance",
];

/// Field separator
pub const DELIMITER: u8 = b';';

#[derive(Serialize)]
struct AuditRow {
    battery: u8,
    timestamp: i64,
    voltage: f64,
    current: f64,
    temperature: f64,
    work: u8,
    work_time: u32,
    dcaps: u32,
    caps_decimal: u32,
    inner_resistance: f64,
}

impl AuditRow {
    fn new(status: &SlotStatus, timestamp: i64) -> Self {
        Self {
            battery: status.slot_index,
            timestamp,
            voltage: status.voltage,
            current: status.current,
            temperature: status.battery_temperature,
            work: status.work_state.code(),
            work_time: status.elapsed_work_time,
            dcaps: status.capacity_delta,
            caps_decimal: status.capacity_decimal,
            inner_resistance: status.inner_resistance,
        }
    }
}

/// Append-only audit table
pub struct AuditLog<W: Write> {
    writer: csv::Writer<W>,
    rows: u64,
}

impl AuditLog<File> {
    /// Create (or truncate) the audit file and write the header row
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_writer(File::create(path)?)
    }
}

impl<W: Write> AuditLog<W> {
    pub fn from_writer(inner: W) -> Result<Self> {
        let mut writer = csv::WriterBuilder::new()
            .delimiter(DELIMITER)
            .has_headers(false)
            .from_writer(inner);
        writer.write_record(HEADERS)?;
        writer.flush()?;
        Ok(Self { writer, rows: 0 })
    }

    /// Append the raw device values of one slot
    pub fn append(&mut self, status: &SlotStatus, timestamp: i64) -> Result<()> {
        self.writer.serialize(AuditRow::new(status, timestamp))?;
        self.writer.flush()?;
        self.rows += 1;
        Ok(())
    }

    /// Rows written so far, header excluded
    pub fn rows(&self) -> u64 {
        self.rows
    }

    /// Flush and hand back the underlying writer
    pub fn close(self) -> Result<W> {
        self.writer
            .into_inner()
            .map_err(|e| ChargeError::Io(e.into_error()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::fixtures::{charging, done};

    #[test]
    fn test_header_only_when_empty() {
        let log = AuditLog::from_writer(Vec::new()).unwrap();
        let bytes = log.close().unwrap();
        assert_eq!(
            String::from_utf8(bytes).unwrap(),
            "Battery;Timestamp;Voltage;Current;Temperature;Work;Work Time;dCaps;Caps Decimal;Inner Resistance\n"
        );
    }

    #[test]
    fn test_rows_carry_raw_values_and_sample_time() {
        let mut log = AuditLog::from_writer(Vec::new()).unwrap();

        let mut status = charging(2, 1.4125);
        status.current = -0.25;
        status.elapsed_work_time = 90;
        status.capacity_delta = 35;
        status.capacity_decimal = 7;
        status.inner_resistance = 48.5;
        log.append(&status, 1_700_000_042).unwrap();
        log.append(&done(0, 1.45), 1_700_000_043).unwrap();
        assert_eq!(log.rows(), 2);

        let text = String::from_utf8(log.close().unwrap()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[1], "2;1700000042;1.4125;-0.25;24.5;1;90;35;7;48.5");
        assert_eq!(lines[2], "0;1700000043;1.45;1.0;24.5;2;0;0;0;0.0");
    }

    #[test]
    fn test_create_writes_header_to_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.csv");
        let log = AuditLog::create(&path).unwrap();
        drop(log);
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("Battery;Timestamp;"));
    }
}
