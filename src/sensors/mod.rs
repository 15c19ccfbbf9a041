//! Sensor polling adapters and the reading data model.
//!
//! Each adapter wraps a bus-master engine with a small state machine:
//! Idle (interval countdown or wake wait) → Acquire (one or more sequential
//! transactions) → Combine → Done. Adapters are thin, but they define the
//! cadence the arbiter sees, and they own the retry-vs-skip policy for
//! engine-level failures: a failed transaction is skipped for the cycle,
//! never retried on the same tick.

pub mod baro;
pub mod motion;
pub mod thermo;

pub use baro::BaroAdapter;
pub use motion::{MotionAdapter, MotionDevice};
pub use thermo::ThermoAdapter;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Identity of each acquisition source, in descending arbitration priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceId {
    Thermo,
    Baro,
    Motion,
}

pub const SOURCE_COUNT: usize = 3;

impl SourceId {
    /// Sources in fixed priority order, highest first.
    pub const PRIORITY_ORDER: [SourceId; SOURCE_COUNT] =
        [SourceId::Thermo, SourceId::Baro, SourceId::Motion];

    /// Queue slot / wire identifier (2 bits on the wire).
    #[must_use]
    pub fn index(self) -> usize {
        match self {
            SourceId::Thermo => 0,
            SourceId::Baro => 1,
            SourceId::Motion => 2,
        }
    }
}

/// One completed sensor measurement.
///
/// Created by an adapter when its final transaction completes; immutable
/// from then on, moved through exactly one queue into exactly one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reading {
    pub source: SourceId,
    pub value: u16,
    pub capture_tick: u64,
}

/// Engine-level failure as seen by an adapter. Sticky until the adapter's
/// next acquisition attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum AdapterError {
    #[error("peer did not acknowledge")]
    Nack,
    #[error("transaction timed out")]
    Timeout,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct AdapterStats {
    pub readings: u32,
    pub nack_errors: u32,
    pub timeout_errors: u32,
    pub skipped_cycles: u32,
    pub wake_events: u32,
}

/// Polling cadence configuration shared by the adapters.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AdapterConfig {
    /// Idle interval in ticks at normal power, before power-mode scaling.
    pub base_interval: u32,
    /// Transaction budget in ticks, converted to an absolute deadline when
    /// a transfer is armed.
    pub transaction_timeout: u64,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            base_interval: 400,
            transaction_timeout: 400,
        }
    }
}
