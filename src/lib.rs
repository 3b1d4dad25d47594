//! # Chargewatch Library
//!
//! Watch a multi-slot battery charger until every battery is charged.
//!
//! This library polls the charger for per-slot status, records voltage,
//! current and temperature of every charging slot into a round robin
//! database, and leaves a report, an audit log and one chart per slot
//! behind.

pub mod config;
pub mod device;
pub mod error;
pub mod monitor;
pub mod report;
pub mod storage;
