//! # Monitor Module
//!
//! The poll, classify, record loop.
//!
//! ## Run Order
//!
//! 1. **Preparation**
//!    - Read a probe snapshot to learn the physical slots
//!    - Create one series per slot, all with the run start as origin
//!    - Write the start section of the report and open the audit log
//! 2. **Polling**
//!    - Start the charger session and let it settle for one interval
//!    - Each cycle: fetch a snapshot (retrying transient read errors),
//!      record every occupied CHARGING slot, then sleep one interval
//!    - Stop once a cycle sees no slot charging, on interruption or when
//!      the optional duration cap elapses
//! 3. **Teardown** (runs on every exit path)
//!    - Close the audit log and the device, render one chart per slot,
//!      append the end section of the report
//!
//! ## Failure Handling
//!
//! Transient read errors are retried up to the per-cycle budget. When the
//! budget runs out the cycle is skipped. A series that refuses a sample only
//! affects its own slot. Anything else aborts the loop, but teardown still
//! runs before the error is returned.

mod session;

pub use session::{MonitoringSession, RetryBudget, RunSummary, SeriesHandle, SlotFailure, StopReason};

use std::io::Write;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::MonitorConfig;
use crate::device::{Snapshot, SlotStatus, StatusSource};
use crate::error::{ChargeError, Result};
use crate::report::{self, audit::AuditLog, RunArtifacts};
use crate::storage::{Sample, SeriesSink};

/// Timing and retry policy of the loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    /// Retries after the first failed read in one cycle
    pub read_retries: u32,
    pub max_duration: Option<Duration>,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            read_retries: 3,
            max_duration: None,
        }
    }
}

impl PollPolicy {
    pub fn from_config(config: &MonitorConfig) -> Self {
        Self {
            interval: config.poll_interval(),
            read_retries: config.read_retries,
            max_duration: config.max_duration(),
        }
    }
}

/// Drives one monitoring run from probe to final report
pub struct Monitor {
    source: Box<dyn StatusSource>,
    sink: Box<dyn SeriesSink>,
    policy: PollPolicy,
    cancel: CancellationToken,
}

impl Monitor {
    /// Create a monitor
    ///
    /// Cancelling `cancel` stops polling at the next cycle boundary or
    /// sleep; the current cycle's samples are still written.
    pub fn new(
        source: Box<dyn StatusSource>,
        sink: Box<dyn SeriesSink>,
        policy: PollPolicy,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            source,
            sink,
            policy,
            cancel,
        }
    }

    /// Monitor the charger until every slot is done
    ///
    /// Artifacts are named after `artifacts.stamp()`, which is also the
    /// origin of every series.
    ///
    /// # Errors
    ///
    /// Returns the first fatal error, after the device has been closed and
    /// whatever was captured has been reported and charted.
    pub async fn run(mut self, artifacts: &RunArtifacts) -> Result<RunSummary> {
        let session = match self.open_session(artifacts).await {
            Ok(session) => session,
            Err(e) => {
                self.close_source().await;
                return Err(e);
            }
        };

        let audit = AuditLog::create(artifacts.audit_log());
        self.run_with_audit(artifacts, session, audit).await
    }

    /// Poll with an opened (or failed) audit log, then tear down
    async fn run_with_audit<W: Write>(
        mut self,
        artifacts: &RunArtifacts,
        mut session: MonitoringSession,
        audit: Result<AuditLog<W>>,
    ) -> Result<RunSummary> {
        let (outcome, rows, audit_closed) = match audit {
            Ok(mut audit) => {
                let outcome = self.start_and_poll(&mut session, &mut audit).await;
                (outcome, audit.rows(), Some(audit))
            }
            Err(e) => (Err(e), 0, None),
        };
        let stop_reason = match &outcome {
            Ok(reason) => *reason,
            Err(e) => {
                error!("Monitoring aborted: {}", e);
                StopReason::Failed
            }
        };

        info!("Terminating...");
        let audit_closed = audit_closed.map_or(Ok(()), |audit| audit.close().map(drop));
        if let Err(e) = &audit_closed {
            error!("Failed to close audit log: {}", e);
        }
        let device_closed = self.source.close().await;
        if let Err(e) = &device_closed {
            error!("Failed to close {}: {}", self.source.describe(), e);
        }

        let end_timestamp = session.now();
        self.render_charts(&mut session, end_timestamp).await;

        let summary = session.summary(stop_reason, end_timestamp);
        let reported = report::append_end(&artifacts.report(), &summary, session.last_snapshot());
        if let Err(e) = &reported {
            error!("Failed to write report: {}", e);
        }

        info!(
            "Finished: {} after {} cycles, {} samples, {} audit rows",
            summary.stop_reason,
            summary.cycles,
            summary.total_samples(),
            rows
        );
        for slot in summary.failed_slots() {
            warn!("Slot #{} had recording failures", u16::from(slot) + 1);
        }

        outcome?;
        audit_closed?;
        device_closed?;
        reported?;
        Ok(summary)
    }

    async fn open_session(&mut self, artifacts: &RunArtifacts) -> Result<MonitoringSession> {
        artifacts.prepare()?;

        let mut budget = RetryBudget::new(self.policy.read_retries);
        let probe = self.fetch(&mut budget).await?.ok_or_else(|| {
            ChargeError::Device(format!("No status could be read from {}", self.source.describe()))
        })?;

        let start_timestamp = artifacts.stamp();
        let mut session = MonitoringSession::new(start_timestamp, probe.clone(), self.policy.read_retries);

        info!("Preparing series for {} battery slots...", probe.len());
        for status in &probe {
            info!(
                "  - Slot #{}: {:?} {}",
                status.slot_number(),
                status.work_state,
                status.battery_type_label
            );
            let handle = session.add_handle(
                status.slot_index,
                artifacts.series(status.slot_number()),
                artifacts.chart(status.slot_number()),
            );
            if let Err(e) = self.sink.create(&handle.series, start_timestamp).await {
                warn!("Slot #{}: {}", status.slot_number(), e);
                handle.record_create_failure(&e);
            }
        }

        report::write_start(&artifacts.report(), start_timestamp, &probe)?;
        Ok(session)
    }

    async fn start_and_poll<W: Write>(
        &mut self,
        session: &mut MonitoringSession,
        audit: &mut AuditLog<W>,
    ) -> Result<StopReason> {
        info!("Starting charging progress on {}...", self.source.describe());
        self.source.start().await?;

        if self.pause().await {
            return Ok(StopReason::Interrupted);
        }

        info!("Monitoring device...");
        self.poll_until_done(session, audit).await
    }

    async fn poll_until_done<W: Write>(
        &mut self,
        session: &mut MonitoringSession,
        audit: &mut AuditLog<W>,
    ) -> Result<StopReason> {
        loop {
            if self.cancel.is_cancelled() {
                info!("Interrupted, stopping before cycle {}", session.cycles() + 1);
                return Ok(StopReason::Interrupted);
            }
            if let Some(limit) = self.policy.max_duration {
                if session.elapsed() >= limit {
                    warn!("Maximum duration of {}s reached", limit.as_secs());
                    return Ok(StopReason::DurationCap);
                }
            }

            session.begin_cycle();
            match self.fetch(&mut session.retry_budget).await? {
                Some(snapshot) => {
                    self.record(session, &snapshot, audit).await?;
                    session.remember(snapshot);
                }
                None => {
                    warn!("Skipping cycle {}, device did not answer", session.cycles());
                    session.skip_cycle();
                }
            }

            if !session.still_charging() {
                info!("No slot is charging any more");
                return Ok(StopReason::Completed);
            }

            if self.pause().await {
                info!("Interrupted after cycle {}", session.cycles());
                return Ok(StopReason::Interrupted);
            }
        }
    }

    /// Read a snapshot, retrying transient failures while `budget` lasts
    ///
    /// `Ok(None)` means the budget ran out.
    async fn fetch(&mut self, budget: &mut RetryBudget) -> Result<Option<Snapshot>> {
        loop {
            match self.source.snapshot().await {
                Ok(snapshot) => return Ok(Some(snapshot)),
                Err(e) if e.is_transient() => match budget.take() {
                    Some(retry) => warn!("{}. Retry #{}", e, retry),
                    None => {
                        warn!("{}. Giving up for this cycle", e);
                        return Ok(None);
                    }
                },
                Err(e) => return Err(e),
            }
        }
    }

    /// Record every active slot of `snapshot`
    ///
    /// A series failure is kept on the slot's handle. An audit log failure
    /// is fatal, but only after every slot of the cycle got its update.
    async fn record<W: Write>(
        &mut self,
        session: &mut MonitoringSession,
        snapshot: &[SlotStatus],
        audit: &mut AuditLog<W>,
    ) -> Result<()> {
        let timestamp = session.now();
        let mut audit_error = None;

        for status in snapshot.iter().filter(|status| status.is_active()) {
            let Some(handle) = session.handle_mut(status.slot_index) else {
                warn!("Slot #{} was not reported at start, ignoring it", status.slot_number());
                continue;
            };

            let sample = Sample::from_status(status, timestamp);
            debug!("Slot #{}: {:?}", status.slot_number(), sample);
            match self.sink.update(&handle.series, &sample).await {
                Ok(()) => handle.samples += 1,
                Err(e) => {
                    warn!("Slot #{}: {}", status.slot_number(), e);
                    handle.record_update_failure(&e);
                }
            }

            if audit_error.is_none() {
                if let Err(e) = audit.append(status, timestamp) {
                    error!("Failed to append to audit log: {}", e);
                    audit_error = Some(e);
                }
            }
        }

        audit_error.map_or(Ok(()), Err)
    }

    async fn render_charts(&mut self, session: &mut MonitoringSession, end_timestamp: i64) {
        info!("Preparing graphs for battery slots...");
        let start_timestamp = session.start_timestamp();
        for (slot_index, handle) in session.handles_mut() {
            let slot_number = u16::from(*slot_index) + 1;
            info!("  - Slot #{}: Rendering graph...", slot_number);
            if let Err(e) = self
                .sink
                .render(&handle.series, &handle.chart, start_timestamp, end_timestamp)
                .await
            {
                warn!("Slot #{}: {}", slot_number, e);
                handle.record_chart_failure(&e);
            }
        }
    }

    /// Sleep one interval; true when interrupted instead
    async fn pause(&self) -> bool {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => true,
            _ = tokio::time::sleep(self.policy.interval) => false,
        }
    }

    async fn close_source(&mut self) {
        if let Err(e) = self.source.close().await {
            error!("Failed to close {}: {}", self.source.describe(), e);
        }
    }
}
