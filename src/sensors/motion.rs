//! Motion adapter: source C, lowest arbitration priority but the only
//! event-driven one.
//!
//! A register-based sensor on the four-wire bus: one fixed-width full-duplex
//! transfer returns the latest sample. Besides interval polling, the
//! peripheral raises a wake line on motion events; a wake short-circuits the
//! idle wait regardless of the remaining interval, and it keeps working in
//! Sleep and DeepSleep while the bus-based adapters are throttled or
//! disabled.

use super::{AdapterConfig, AdapterError, AdapterStats, Reading, SourceId};
use crate::bus::four_wire::{FourWireMaster, FourWireOutputs, ShiftDevice};
use crate::power::PowerMode;

/// Command word shifted out to request the current sample.
pub const READ_SAMPLE_COMMAND: u16 = 0xA000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AcquireState {
    Idle,
    Transfer,
}

#[derive(Debug)]
pub struct MotionAdapter {
    config: AdapterConfig,
    state: AcquireState,
    remaining: u32,
    wake_pending: bool,
    prev_wake_line: bool,
    error: Option<AdapterError>,
    stats: AdapterStats,
}

impl MotionAdapter {
    #[must_use]
    pub fn new(config: AdapterConfig) -> Self {
        Self {
            config,
            state: AcquireState::Idle,
            remaining: config.base_interval,
            wake_pending: false,
            prev_wake_line: false,
            error: None,
            stats: AdapterStats::default(),
        }
    }

    /// Latch a wake regardless of the hardware line, ground-test style.
    pub fn force_wake(&mut self) {
        self.wake_pending = true;
    }

    /// Advance one tick. `wake_line` is the peripheral's event output as
    /// sampled at the end of the previous tick.
    pub fn step(
        &mut self,
        tick: u64,
        mode: PowerMode,
        master: &mut FourWireMaster,
        wake_line: bool,
    ) -> Option<Reading> {
        // Rising edge on the wake line latches a pending wake
        if wake_line && !self.prev_wake_line {
            self.wake_pending = true;
        }
        self.prev_wake_line = wake_line;

        match self.state {
            AcquireState::Idle => {
                self.step_idle(tick, mode, master);
                None
            }
            AcquireState::Transfer => {
                let result = master.take_result()?;
                if result.timeout_error {
                    self.error = Some(AdapterError::Timeout);
                    self.stats.timeout_errors += 1;
                    self.stats.skipped_cycles += 1;
                    self.finish_cycle(mode);
                    return None;
                }
                let value = result.rx_word;
                self.finish_cycle(mode);
                self.stats.readings += 1;
                Some(Reading {
                    source: SourceId::Motion,
                    value,
                    capture_tick: tick,
                })
            }
        }
    }

    fn step_idle(&mut self, tick: u64, mode: PowerMode, master: &mut FourWireMaster) {
        let woken = self.wake_pending;
        if !woken {
            // DeepSleep suspends interval polling; only wakes get through
            if mode == PowerMode::DeepSleep {
                return;
            }
            if self.remaining > 0 {
                self.remaining -= 1;
                return;
            }
        }

        self.error = None;
        if master
            .begin(READ_SAMPLE_COMMAND, tick + self.config.transaction_timeout)
            .is_ok()
        {
            if woken {
                self.wake_pending = false;
                self.stats.wake_events += 1;
            }
            self.state = AcquireState::Transfer;
        }
    }

    fn finish_cycle(&mut self, mode: PowerMode) {
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

/// Four-wire motion peripheral: shift register plus an event line.
///
/// The sample waveform sits near a quiet baseline with periodic activity
/// bursts; the event line asserts for the duration of a burst.
#[derive(Debug)]
pub struct MotionDevice {
    shifter: ShiftDevice,
    burst_period: u64,
    burst_duration: u64,
    event: bool,
}

impl MotionDevice {
    #[must_use]
    pub fn new() -> Self {
        Self {
            shifter: ShiftDevice::new(),
            burst_period: 1500,
            burst_duration: 80,
            event: false,
        }
    }

    /// Refresh the sample register and the event line for this tick.
    pub fn update(&mut self, tick: u64) {
        let in_burst = tick % self.burst_period >= self.burst_period - self.burst_duration;
        let value = if in_burst {
            0x4000 + ((tick * 37) % 0x0800) as u16
        } else {
            0x0100 + ((tick / 16) % 0x20) as u16
        };
        self.shifter.load_word(value);
        self.event = in_burst;
    }

    #[must_use]
    pub fn event_line(&self) -> bool {
        self.event
    }

    pub fn step(&mut self, lines: FourWireOutputs) {
        self.shifter.step(lines);
    }

    #[must_use]
    pub fn data_out(&self) -> bool {
        self.shifter.data_out()
    }

    #[must_use]
    pub fn last_received(&self) -> u16 {
        self.shifter.last_received()
    }
}

impl Default for MotionDevice {
    fn default() -> Self {
        Self::new()
    }
}
