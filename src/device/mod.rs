//! # Device Module
//!
//! Per-slot charger status and the sources that produce it.
//!
//! This module handles:
//! - The status record reported for each physical slot
//! - Decoding the charger's numeric work code
//! - The [`StatusSource`] contract the monitoring loop polls
//! - Concrete sources: an external driver program and a capture replay

pub mod command;
pub mod replay;
pub mod source;

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::error::{ChargeError, Result};

pub use source::StatusSource;

/// Work code the charger reports for an idle slot
pub const WORK_CODE_IDLE: u8 = 0;
/// Work code the charger reports while a slot is charging
pub const WORK_CODE_CHARGING: u8 = 1;
/// Work code the charger reports once a slot finished
pub const WORK_CODE_DONE: u8 = 2;

/// What a slot is currently doing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "u8", into = "u8")]
pub enum WorkState {
    Idle,
    Charging,
    Done,
    /// Any other code (errors, discharge programs, ...)
    Other(u8),
}

impl From<u8> for WorkState {
    fn from(code: u8) -> Self {
        match code {
            WORK_CODE_IDLE => WorkState::Idle,
            WORK_CODE_CHARGING => WorkState::Charging,
            WORK_CODE_DONE => WorkState::Done,
            other => WorkState::Other(other),
        }
    }
}

impl From<WorkState> for u8 {
    fn from(state: WorkState) -> Self {
        match state {
            WorkState::Idle => WORK_CODE_IDLE,
            WorkState::Charging => WORK_CODE_CHARGING,
            WorkState::Done => WORK_CODE_DONE,
            WorkState::Other(code) => code,
        }
    }
}

impl WorkState {
    pub fn code(self) -> u8 {
        self.into()
    }
}

/// Status of one physical slot as of one poll
///
/// `slot_index` is 0-based and stable for the whole session. A voltage of
/// zero means the slot is empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlotStatus {
    pub slot_index: u8,
    pub work_state: WorkState,
    /// Volts
    pub voltage: f64,
    /// Amps, negative while discharging
    pub current: f64,
    /// Degrees Celsius
    pub battery_temperature: f64,
    /// Seconds the current program has been running
    #[serde(default)]
    pub elapsed_work_time: u32,
    /// mAh moved so far
    #[serde(default)]
    pub capacity_delta: u32,
    #[serde(default)]
    pub capacity_decimal: u32,
    /// Milliohms
    #[serde(default)]
    pub inner_resistance: f64,
    #[serde(default)]
    pub battery_type_label: String,
}

impl SlotStatus {
    pub fn is_occupied(&self) -> bool {
        self.voltage > 0.0
    }

    /// Only occupied, charging slots are recorded
    pub fn is_active(&self) -> bool {
        self.work_state == WorkState::Charging && self.is_occupied()
    }

    /// 1-based number printed on the charger
    pub fn slot_number(&self) -> u16 {
        u16::from(self.slot_index) + 1
    }
}

/// All slots as of one poll, in stable slot order
pub type Snapshot = Vec<SlotStatus>;

/// Whether any slot in the snapshot is still being recorded
pub fn any_active(snapshot: &[SlotStatus]) -> bool {
    snapshot.iter().any(SlotStatus::is_active)
}

/// Reject snapshots that report the same slot twice
///
/// A garbled read is treated like any other link hiccup.
pub fn check_snapshot(snapshot: &[SlotStatus]) -> Result<()> {
    let mut seen = HashSet::new();
    for status in snapshot {
        if !seen.insert(status.slot_index) {
            return Err(ChargeError::DeviceRead(format!(
                "slot {} reported twice in one snapshot",
                status.slot_number()
            )));
        }
    }
    Ok(())
}
