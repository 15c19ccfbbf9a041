//! Bus-master protocol engines and wire-level line modeling.
//!
//! Both engines are cooperative state machines advanced by an external tick.
//! Nothing here blocks: "waiting" is expressed as remaining in a state, and
//! every transaction carries an absolute deadline tick so no transfer can
//! run forever.

pub mod four_wire;
pub mod two_wire;

pub use four_wire::{FourWireMaster, ShiftDevice};
pub use two_wire::{Direction, RegisterDevice, TwoWireMaster};

use crate::sensors::SourceId;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Drive state of a single open-drain or push-pull bus line.
///
/// Open-drain lines idle high through the pull-up; a driver can only pull
/// them low. Modeling release explicitly (instead of a three-valued signal)
/// lets contention resolve by a plain wired-AND.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LineState {
    Drive(bool),
    Release,
}

impl LineState {
    /// Open-drain encoding of a data bit: ones are released, zeros driven.
    #[must_use]
    pub fn for_bit(bit: bool) -> Self {
        if bit {
            LineState::Release
        } else {
            LineState::Drive(false)
        }
    }

    fn pulls_low(self) -> bool {
        matches!(self, LineState::Drive(false))
    }
}

/// Resolved electrical level of one line given every attached driver.
///
/// Wired-AND: the line reads high unless at least one driver pulls it low.
#[must_use]
pub fn resolve_line(drivers: &[LineState]) -> bool {
    !drivers.iter().any(|d| d.pulls_low())
}

/// Resolved levels of the two-wire bus, sampled by every participant on the
/// following tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineLevels {
    pub clock: bool,
    pub data: bool,
}

impl LineLevels {
    /// Both lines pulled up, nobody driving.
    #[must_use]
    pub fn idle() -> Self {
        Self {
            clock: true,
            data: true,
        }
    }
}

/// Per-line drive outputs of one two-wire bus participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TwoWireOutputs {
    pub clock: LineState,
    pub data: LineState,
}

impl TwoWireOutputs {
    #[must_use]
    pub fn released() -> Self {
        Self {
            clock: LineState::Release,
            data: LineState::Release,
        }
    }
}

/// Resolve the two-wire bus from every participant's drive outputs.
#[must_use]
pub fn resolve_bus(participants: &[TwoWireOutputs]) -> LineLevels {
    let clocks: heapless::Vec<LineState, 8> =
        participants.iter().map(|p| p.clock).collect();
    let datas: heapless::Vec<LineState, 8> =
        participants.iter().map(|p| p.data).collect();
    LineLevels {
        clock: resolve_line(&clocks),
        data: resolve_line(&datas),
    }
}

/// Errors surfaced by the bus-master request APIs.
///
/// Protocol-level failures (no-acknowledge, stretch timeout) are not errors
/// at this level; they are reported in the transaction completion record the
/// way a hardware status register would.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BusError {
    #[error("engine already has an active transaction")]
    Busy,
    #[error("write transaction requires a data byte")]
    MissingData,
    #[error("address exceeds 7-bit range")]
    AddressOutOfRange,
}

/// Exclusive-ownership token for a bus-master engine shared by several
/// adapters.
///
/// Grants are fixed-priority by arrival order within a tick (callers are
/// stepped in priority order) and never preempted: once granted, the owner
/// holds the engine until it releases, normally after the Stop condition of
/// its final transaction.
#[derive(Debug, Default)]
pub struct BusGrant {
    owner: Option<SourceId>,
}

impl BusGrant {
    #[must_use]
    pub fn new() -> Self {
        Self { owner: None }
    }

    /// Try to take ownership. Succeeds if the engine is free or already
    /// owned by `who` (re-acquisition is idempotent).
    pub fn try_acquire(&mut self, who: SourceId) -> bool {
        match self.owner {
            None => {
                self.owner = Some(who);
                true
            }
            Some(current) => current == who,
        }
    }

    /// Release ownership. Ignored unless `who` is the current owner.
    pub fn release(&mut self, who: SourceId) {
        if self.owner == Some(who) {
            self.owner = None;
        }
    }

    #[must_use]
    pub fn owner(&self) -> Option<SourceId> {
        self.owner
    }

    #[must_use]
    pub fn is_held_by(&self, who: SourceId) -> bool {
        self.owner == Some(who)
    }
}
