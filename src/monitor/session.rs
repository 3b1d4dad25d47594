//! Process-wide state of one monitoring run

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use tokio::time::Instant;

use crate::device::{any_active, Snapshot, SlotStatus};
use crate::error::ChargeError;

/// Why the poll loop stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// No slot reported CHARGING any more
    Completed,
    /// Ctrl+C or another external stop request
    Interrupted,
    /// The configured maximum run time elapsed
    DurationCap,
    /// A fatal error aborted the loop
    Failed,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            StopReason::Completed => "all slots finished charging",
            StopReason::Interrupted => "interrupted",
            StopReason::DurationCap => "maximum duration reached",
            StopReason::Failed => "aborted by an error",
        };
        f.write_str(text)
    }
}

/// Persistence problems of one slot
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SlotFailure {
    /// The series could not be created, so no sample can land in it
    pub create_failed: bool,
    pub failed_updates: u32,
    pub chart_failed: bool,
    pub last_error: Option<String>,
}

impl SlotFailure {
    fn is_empty(&self) -> bool {
        !self.create_failed && self.failed_updates == 0 && !self.chart_failed
    }
}

/// What a finished run recorded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub start_timestamp: i64,
    pub end_timestamp: i64,
    pub stop_reason: StopReason,
    pub cycles: u64,
    pub skipped_cycles: u64,
    /// Samples recorded per slot index
    pub samples: BTreeMap<u8, u64>,
    /// Only slots that had at least one persistence failure
    pub failures: BTreeMap<u8, SlotFailure>,
}

impl RunSummary {
    pub fn total_samples(&self) -> u64 {
        self.samples.values().sum()
    }

    pub fn failed_slots(&self) -> Vec<u8> {
        self.failures.keys().copied().collect()
    }
}

/// Transient read retries left in the current cycle
#[derive(Debug, Clone, Copy)]
pub struct RetryBudget {
    limit: u32,
    used: u32,
}

impl RetryBudget {
    pub fn new(limit: u32) -> Self {
        Self { limit, used: 0 }
    }

    /// Consume one retry, returning its 1-based number
    pub fn take(&mut self) -> Option<u32> {
        if self.used >= self.limit {
            return None;
        }
        self.used += 1;
        Some(self.used)
    }

    pub fn reset(&mut self) {
        self.used = 0;
    }
}

/// The series a slot records into
#[derive(Debug, Clone)]
pub struct SeriesHandle {
    pub series: PathBuf,
    pub chart: PathBuf,
    pub samples: u64,
    pub failure: SlotFailure,
}

impl SeriesHandle {
    pub fn record_update_failure(&mut self, error: &ChargeError) {
        self.failure.failed_updates += 1;
        self.failure.last_error = Some(error.to_string());
    }

    pub fn record_chart_failure(&mut self, error: &ChargeError) {
        self.failure.chart_failed = true;
        self.failure.last_error = Some(error.to_string());
    }

    pub fn record_create_failure(&mut self, error: &ChargeError) {
        self.failure.create_failed = true;
        self.failure.last_error = Some(error.to_string());
    }
}

/// State owned by the monitor for the whole run
#[derive(Debug)]
pub struct MonitoringSession {
    start_timestamp: i64,
    started_at: Instant,
    handles: BTreeMap<u8, SeriesHandle>,
    probe: Snapshot,
    latest: Option<Snapshot>,
    pub(crate) retry_budget: RetryBudget,
    cycles: u64,
    skipped_cycles: u64,
}

impl MonitoringSession {
    /// `probe` is the snapshot read before polling began
    pub fn new(start_timestamp: i64, probe: Snapshot, read_retries: u32) -> Self {
        Self {
            start_timestamp,
            started_at: Instant::now(),
            handles: BTreeMap::new(),
            probe,
            latest: None,
            retry_budget: RetryBudget::new(read_retries),
            cycles: 0,
            skipped_cycles: 0,
        }
    }

    pub fn start_timestamp(&self) -> i64 {
        self.start_timestamp
    }

    /// Seconds since the epoch, advancing with the monotonic clock
    pub fn now(&self) -> i64 {
        let elapsed = i64::try_from(self.started_at.elapsed().as_secs()).unwrap_or(i64::MAX);
        self.start_timestamp.saturating_add(elapsed)
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn add_handle(&mut self, slot_index: u8, series: PathBuf, chart: PathBuf) -> &mut SeriesHandle {
        self.handles.entry(slot_index).or_insert(SeriesHandle {
            series,
            chart,
            samples: 0,
            failure: SlotFailure::default(),
        })
    }

    pub fn handle_mut(&mut self, slot_index: u8) -> Option<&mut SeriesHandle> {
        self.handles.get_mut(&slot_index)
    }

    pub fn handles_mut(&mut self) -> impl Iterator<Item = (&u8, &mut SeriesHandle)> {
        self.handles.iter_mut()
    }

    pub fn begin_cycle(&mut self) {
        self.cycles += 1;
        self.retry_budget.reset();
    }

    pub fn skip_cycle(&mut self) {
        self.skipped_cycles += 1;
    }

    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    pub fn remember(&mut self, snapshot: Snapshot) {
        self.latest = Some(snapshot);
    }

    /// Keep polling until a poll cycle has seen every slot leave CHARGING
    pub fn still_charging(&self) -> bool {
        self.latest.as_deref().map_or(true, any_active)
    }

    /// Best available view of the slots, for the final report
    pub fn last_snapshot(&self) -> &[SlotStatus] {
        self.latest.as_deref().unwrap_or(&self.probe)
    }

    pub fn summary(&self, stop_reason: StopReason, end_timestamp: i64) -> RunSummary {
        RunSummary {
            start_timestamp: self.start_timestamp,
            end_timestamp,
            stop_reason,
            cycles: self.cycles,
            skipped_cycles: self.skipped_cycles,
            samples: self
                .handles
                .iter()
                .map(|(slot, handle)| (*slot, handle.samples))
                .collect(),
            failures: self
                .handles
                .iter()
                .filter(|(_, handle)| !handle.failure.is_empty())
                .map(|(slot, handle)| (*slot, handle.failure.clone()))
                .collect(),
        }
    }
}
