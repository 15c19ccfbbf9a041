//! Barometer adapter: source B, middle arbitration priority.
//!
//! Second tenant of the shared two-wire engine. Same three-transaction
//! acquisition shape as the thermometer but against its own peripheral and
//! register window; the thermometer wins the grant when both adapters want
//! the engine on the same tick.

use super::{AdapterConfig, AdapterError, AdapterStats, Reading, SourceId};
use crate::bus::two_wire::{Direction, TransactionResult, TwoWireMaster};
use crate::bus::BusGrant;
use crate::power::PowerMode;

/// Bus address of the barometer peripheral.
pub const BARO_BUS_ADDRESS: u8 = 0x76;
/// Register pointer of the 16-bit pressure value (big-endian pair).
pub const PRESSURE_POINTER: u8 = 0x02;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AcquireState {
    Idle,
    SelectPointer,
    ReadHigh,
    ReadLow,
}

#[derive(Debug)]
pub struct BaroAdapter {
    config: AdapterConfig,
    state: AcquireState,
    remaining: u32,
    high_byte: u8,
    error: Option<AdapterError>,
    stats: AdapterStats,
}

impl BaroAdapter {
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

    pub fn step(
        &mut self,
        tick: u64,
        mode: PowerMode,
        master: &mut TwoWireMaster,
        grant: &mut BusGrant,
    ) -> Option<Reading> {
        match self.state {
            AcquireState::Idle => {
                if !mode.bus_sensors_enabled() {
                    return None;
                }
                if self.remaining > 0 {
                    self.remaining -= 1;
                    return None;
                }
                if !grant.try_acquire(SourceId::Baro) {
                    return None;
                }
                self.error = None;
                match master.begin(
                    BARO_BUS_ADDRESS,
                    Direction::Write,
                    Some(PRESSURE_POINTER),
                    tick + self.config.transaction_timeout,
                ) {
                    Ok(()) => self.state = AcquireState::SelectPointer,
                    Err(_) => grant.release(SourceId::Baro),
                }
                None
            }
            AcquireState::SelectPointer => {
                if let Some(result) = master.take_result() {
                    if self.check(&result, mode, grant).is_err() {
                        return None;
                    }
                    self.arm_read(tick, master, AcquireState::ReadHigh, grant, mode);
                }
                None
            }
            AcquireState::ReadHigh => {
                if let Some(result) = master.take_result() {
                    if self.check(&result, mode, grant).is_err() {
                        return None;
                    }
                    self.high_byte = result.data_out.unwrap_or(0);
                    self.arm_read(tick, master, AcquireState::ReadLow, grant, mode);
                }
                None
            }
            AcquireState::ReadLow => {
                let result = master.take_result()?;
                if self.check(&result, mode, grant).is_err() {
                    return None;
                }
                let value =
                    (u16::from(self.high_byte) << 8) | u16::from(result.data_out.unwrap_or(0));
                self.finish_cycle(mode, grant);
                self.stats.readings += 1;
                Some(Reading {
                    source: SourceId::Baro,
                    value,
                    capture_tick: tick,
                })
            }
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
            BARO_BUS_ADDRESS,
            Direction::Read,
            None,
            tick + self.config.transaction_timeout,
        ) {
            Ok(()) => self.state = next,
            Err(_) => {
                self.error = Some(AdapterError::Timeout);
                self.stats.skipped_cycles += 1;
                self.finish_cycle(mode, grant);
            }
        }
    }

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
        grant.release(SourceId::Baro);
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

/// Pressure waveform for the peripheral's register window: nominal with a
/// slow swell plus a faster ripple.
#[derive(Debug, Default)]
pub struct BaroModel;

impl BaroModel {
    #[must_use]
    pub fn value_at(&self, tick: u64) -> u16 {
        let slow = ((tick as f32) * 0.0005).sin() * 120.0;
        let ripple = ((tick as f32) * 0.01).cos() * 15.0;
        (10_132.0 + slow + ripple) as u16
    }
}
