//! # Report Module
//!
//! Names and writes the files a run leaves behind.
//!
//! This module handles:
//! - Deterministic artifact names derived from the run timestamp
//! - The human readable run report (start and end sections)
//! - The audit log (see [`audit`])

pub mod audit;

use chrono::DateTime;
use std::fmt::{self, Write as _};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::device::SlotStatus;
use crate::error::Result;
use crate::monitor::RunSummary;

/// File names for one run
///
/// All names share `<prefix>-<stamp>` where `stamp` is the run start in
/// epoch seconds. Slots are numbered from 1 as printed on the charger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunArtifacts {
    dir: PathBuf,
    prefix: String,
    stamp: i64,
}

impl RunArtifacts {
    pub fn new(dir: impl Into<PathBuf>, prefix: impl Into<String>, stamp: i64) -> Self {
        Self {
            dir: dir.into(),
            prefix: prefix.into(),
            stamp,
        }
    }

    /// Create the output directory if needed
    pub fn prepare(&self) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        Ok(())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn stamp(&self) -> i64 {
        self.stamp
    }

    fn file(&self, suffix: &str) -> PathBuf {
        self.dir.join(format!("{}-{}-{}", self.prefix, self.stamp, suffix))
    }

    pub fn report(&self) -> PathBuf {
        self.file("Report.txt")
    }

    pub fn audit_log(&self) -> PathBuf {
        self.file("Data.csv")
    }

    pub fn series(&self, slot_number: u16) -> PathBuf {
        self.file(&format!("Slot{}.rrd", slot_number))
    }

    pub fn chart(&self, slot_number: u16) -> PathBuf {
        self.file(&format!("Slot{}.png", slot_number))
    }

    /// File name of the diagnostic log, relative to [`RunArtifacts::dir`]
    pub fn monitor_log_name(&self) -> String {
        format!("{}-{}-Monitor.log", self.prefix, self.stamp)
    }
}

fn format_time(timestamp: i64) -> String {
    match DateTime::from_timestamp(timestamp, 0) {
        Some(utc) => format!("{} ({})", timestamp, utc.format("%Y-%m-%d %H:%M:%S UTC")),
        None => timestamp.to_string(),
    }
}

fn format_duration(seconds: u32) -> String {
    format!("{:02}:{:02}:{:02}", seconds / 3600, seconds / 60 % 60, seconds % 60)
}

/// Text of the start section
pub fn render_start(start_timestamp: i64, snapshot: &[SlotStatus]) -> String {
    let mut out = String::new();
    // Writing into a String cannot fail
    let _ = start_section(&mut out, start_timestamp, snapshot);
    out
}

/// Text of the end section
pub fn render_end(summary: &RunSummary, snapshot: &[SlotStatus]) -> String {
    let mut out = String::new();
    let _ = end_section(&mut out, summary, snapshot);
    out
}

fn start_section(out: &mut String, start_timestamp: i64, snapshot: &[SlotStatus]) -> fmt::Result {
    writeln!(out, "Charger Report\n")?;
    writeln!(out, "Start Time: {}", format_time(start_timestamp))?;
    writeln!(out, "Batteries:")?;
    for status in snapshot {
        if !status.is_occupied() {
            writeln!(out, " - Battery in Slot #{} not occupied", status.slot_number())?;
            continue;
        }
        writeln!(out, " - Battery in Slot #{} ({})", status.slot_number(), label(status))?;
        writeln!(out, "   Voltage: {}", status.voltage)?;
        writeln!(out, "   Temperature: {}", status.battery_temperature)?;
        writeln!(out, "   Capacity: {} mAh", status.capacity_delta)?;
        writeln!(out, "   Inner resistance: {}", status.inner_resistance)?;
    }
    writeln!(out)
}

fn end_section(out: &mut String, summary: &RunSummary, snapshot: &[SlotStatus]) -> fmt::Result {
    writeln!(out, "Charging summary for Batteries:")?;
    writeln!(out, "End Time: {}", format_time(summary.end_timestamp))?;
    writeln!(out, "Stopped: {}", summary.stop_reason)?;
    writeln!(
        out,
        "Cycles: {} ({} skipped), samples recorded: {}",
        summary.cycles,
        summary.skipped_cycles,
        summary.total_samples()
    )?;
    for status in snapshot {
        if !status.is_occupied() {
            writeln!(out, " - Battery in Slot #{} not occupied", status.slot_number())?;
            continue;
        }
        writeln!(out, " - Battery in Slot #{}", status.slot_number())?;
        writeln!(out, "   Voltage: {}", status.voltage)?;
        writeln!(out, "   Capacity: {} mAh", status.capacity_delta)?;
        writeln!(out, "   Time: {}", format_duration(status.elapsed_work_time))?;
        writeln!(out, "   Temperature: {}", status.battery_temperature)?;
        writeln!(out, "   Inner resistance: {}", status.inner_resistance)?;
        writeln!(
            out,
            "   Samples: {}",
            summary.samples.get(&status.slot_index).copied().unwrap_or(0)
        )?;
    }

    if summary.failures.is_empty() {
        return Ok(());
    }
    writeln!(out, "\nRecording failures:")?;
    for (slot_index, failure) in &summary.failures {
        let mut problems = Vec::new();
        if failure.create_failed {
            problems.push("series not created".to_string());
        }
        if failure.failed_updates > 0 {
            problems.push(format!("{} failed updates", failure.failed_updates));
        }
        if failure.chart_failed {
            problems.push("chart not rendered".to_string());
        }
        writeln!(
            out,
            " - Slot #{}: {} (last error: {})",
            u16::from(*slot_index) + 1,
            problems.join(", "),
            failure.last_error.as_deref().unwrap_or("unknown")
        )?;
    }
    Ok(())
}

fn label(status: &SlotStatus) -> &str {
    if status.battery_type_label.is_empty() {
        "unknown type"
    } else {
        &status.battery_type_label
    }
}

/// Create the report file with its start section
pub fn write_start(path: &Path, start_timestamp: i64, snapshot: &[SlotStatus]) -> Result<()> {
    fs::write(path, render_start(start_timestamp, snapshot))?;
    Ok(())
}

/// Append the end section to an existing report
pub fn append_end(path: &Path, summary: &RunSummary, snapshot: &[SlotStatus]) -> Result<()> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(render_end(summary, snapshot).as_bytes())?;
    Ok(())
}
