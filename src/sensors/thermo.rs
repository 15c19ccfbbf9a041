//! Thermometer adapter: source A, highest arbitration priority.
//!
//! A two-wire, multi-register sensor. One acquisition is three sequential
//! engine transactions, each gated on the prior completion: select the value
//! register pointer, read the high byte, read the low byte (the peripheral
//! auto-increments its pointer between reads). The adapter shares the
//! two-wire engine with the barometer behind a [`BusGrant`] token and holds
//! the grant for the whole acquisition.

use super::{AdapterConfig, AdapterError, AdapterStats, Reading, SourceId};
use crate::bus::two_wire::{Direction, TransactionResult, TwoWireMaster};
use crate::bus::BusGrant;
use crate::power::PowerMode;

/// Bus address of the thermometer peripheral.
pub const THERMO_BUS_ADDRESS: u8 = 0x48;
/// Register pointer of the 16-bit temperature value (big-endian pair).
const VALUE_POINTER: u8 = 0x00;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AcquireState {
    Idle,
    SelectPointer,
    ReadHigh,
    ReadLow,
}

#[derive(Debug)]
pub struct ThermoAdapter {
    config: AdapterConfig,
    state: AcquireState,
    remaining: u32,
    high_byte: u8,
    error: Option<AdapterError>,
    stats: AdapterStats,
}

impl ThermoAdapter {
    #[must_use]
    pub fn new(config: AdapterConfig) -> Self {
        Self {
            config,
            state: AcquireState::Idle,
            remaining: config.base_interval,
            high_byte: 0,
            error: None,
            stats: AdapterStats::default(),
        }
    }

    /// Advance one tick. Returns a completed reading on the tick its final
    /// transaction is observed done.
    pub fn step(
        &mut self,
        tick: u64,
        mode: PowerMode,
        master: &mut TwoWireMaster,
        grant: &mut BusGrant,
    ) -> Option<Reading> {
        match self.state {
            AcquireState::Idle => {
                self.step_idle(tick, mode, master, grant);
                None
            }
            AcquireState::SelectPointer => {
                if let Some(result) = master.take_result() {
                    if let Err(()) = self.check(&result, mode, grant) {
                        return None;
                    }
                    self.arm_read(tick, master, AcquireState::ReadHigh, grant, mode);
                }
                None
            }
            AcquireState::ReadHigh => {
                if let Some(result) = master.take_result() {
                    if let Err(()) = self.check(&result, mode, grant) {
                        return None;
                    }
                    self.high_byte = result.data_out.unwrap_or(0);
                    self.arm_read(tick, master, AcquireState::ReadLow, grant, mode);
                }
                None
            }
            AcquireState::ReadLow => {
                let result = master.take_result()?;
                if let Err(()) = self.check(&result, mode, grant) {
                    return None;
                }
                let value =
                    (u16::from(self.high_byte) << 8) | u16::from(result.data_out.unwrap_or(0));
                self.finish_cycle(mode, grant);
                self.stats.readings += 1;
                Some(Reading {
                    source: SourceId::Thermo,
                    value,
                    capture_tick: tick,
                })
            }
        }
    }

    fn step_idle(
        &mut self,
        tick: u64,
        mode: PowerMode,
        master: &mut TwoWireMaster,
        grant: &mut BusGrant,
    ) {
        // Deep power-down gates the bus-based adapters entirely
        if !mode.bus_sensors_enabled() {
            return;
        }
        if self.remaining > 0 {
            self.remaining -= 1;
            return;
        }
        // Engine held by the other adapter: wait, the interval stays expired
        if !grant.try_acquire(SourceId::Thermo) {
            return;
        }
        // Sticky error clears at the next attempt
        self.error = None;
        match master.begin(
            THERMO_BUS_ADDRESS,
            Direction::Write,
            Some(VALUE_POINTER),
            tick + self.config.transaction_timeout,
        ) {
            Ok(()) => self.state = AcquireState::SelectPointer,
            Err(_) => grant.release(SourceId::Thermo),
        }
    }

    fn arm_read(
        &mut self,
        tick: u64,
        master: &mut TwoWireMaster,
        next: AcquireState,
        grant: &mut BusGrant,
        mode: PowerMode,
    ) {
        match master.begin(
            THERMO_BUS_ADDRESS,
            Direction::Read,
            None,
            tick + self.config.transaction_timeout,
        ) {
            Ok(()) => self.state = next,
            Err(_) => {
                // Engine refused a follow-up while we hold the grant; treat
                // as a skipped cycle rather than wedging the acquisition
                self.error = Some(AdapterError::Timeout);
                self.stats.skipped_cycles += 1;
                self.finish_cycle(mode, grant);
            }
        }
    }

    /// Inspect a completion record; on failure record the sticky error,
    /// skip the cycle, and restart the interval without emitting.
    fn check(
        &mut self,
        result: &TransactionResult,
        mode: PowerMode,
        grant: &mut BusGrant,
    ) -> Result<(), ()> {
        if result.is_ok() {
            return Ok(());
        }
        if result.timeout_error {
            self.error = Some(AdapterError::Timeout);
            self.stats.timeout_errors += 1;
        } else {
            self.error = Some(AdapterError::Nack);
            self.stats.nack_errors += 1;
        }
        self.stats.skipped_cycles += 1;
        self.finish_cycle(mode, grant);
        Err(())
    }

    fn finish_cycle(&mut self, mode: PowerMode, grant: &mut BusGrant) {
        grant.release(SourceId::Thermo);
        self.remaining = self.config.base_interval * mode.interval_scale();
        self.state = AcquireState::Idle;
    }

    #[must_use]
    pub fn last_error(&self) -> Option<AdapterError> {
        self.error
    }

    #[must_use]
    pub fn stats(&self) -> &AdapterStats {
        &self.stats
    }
}

/// Slow ambient temperature drift used to fill the peripheral's registers.
#[derive(Debug, Default)]
pub struct ThermoModel;

impl ThermoModel {
    /// Centidegree-style 16-bit raw value: nominal with a slow sinusoidal
    /// ambient drift.
    #[must_use]
    pub fn value_at(&self, tick: u64) -> u16 {
        let phase = (tick as f32) * 0.002;
        (2500.0 + phase.sin() * 300.0) as u16
    }
}
