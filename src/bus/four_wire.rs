//! Four-wire full-duplex shift bus-master engine.
//!
//! Select/clock/data-out/data-in with fixed mode-0 convention: data is
//! launched while the clock is low and sampled on the high phase, both
//! directions in the same bit period. There is no acknowledgment concept;
//! once the fixed-width word has shifted, completion is unconditional. The
//! only failure path is the caller-imposed deadline.

use super::BusError;
use serde::{Deserialize, Serialize};

/// Fixed transfer width in bits.
pub const WORD_BITS: u8 = 16;
/// Ticks per bit period, matching the two-wire engine's phase discipline.
pub const TICKS_PER_BIT: u8 = 4;

/// Master-driven lines, sampled by the peripheral on the following tick.
/// Select is active-low.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FourWireOutputs {
    pub select_n: bool,
    pub clock: bool,
    pub data_out: bool,
}

impl FourWireOutputs {
    #[must_use]
    pub fn idle() -> Self {
        Self {
            select_n: true,
            clock: false,
            data_out: false,
        }
    }
}

/// Completion record for one word transfer.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ShiftResult {
    pub rx_word: u16,
    pub timeout_error: bool,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct FourWireStats {
    pub transfers: u32,
    pub timeouts: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ShiftState {
    Idle,
    Select,
    Transfer,
    Deselect,
}

/// The four-wire bus-master engine.
#[derive(Debug)]
pub struct FourWireMaster {
    state: ShiftState,
    phase: u8,
    bit: u8,
    tx_shift: u16,
    rx_shift: u16,
    deadline: u64,
    timeout_error: bool,
    result: Option<ShiftResult>,
    outputs: FourWireOutputs,
    stats: FourWireStats,
}

impl FourWireMaster {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: ShiftState::Idle,
            phase: 0,
            bit: 0,
            tx_shift: 0,
            rx_shift: 0,
            deadline: 0,
            timeout_error: false,
            result: None,
            outputs: FourWireOutputs::idle(),
            stats: FourWireStats::default(),
        }
    }

    /// Arm a full-duplex word transfer with an absolute deadline tick.
    pub fn begin(&mut self, tx_word: u16, deadline: u64) -> Result<(), BusError> {
        if self.state != ShiftState::Idle {
            return Err(BusError::Busy);
        }
        self.tx_shift = tx_word;
        self.rx_shift = 0;
        self.bit = 0;
        self.phase = 0;
        self.deadline = deadline;
        self.timeout_error = false;
        self.result = None;
        self.state = ShiftState::Select;
        Ok(())
    }

    /// Advance one tick. `data_in` is the peripheral's output line as
    /// resolved at the end of the previous tick.
    pub fn step(&mut self, tick: u64, data_in: bool) {
        if self.state == ShiftState::Idle {
            return;
        }

        if tick >= self.deadline && self.state != ShiftState::Deselect {
            // Fatal to the transaction: abort through deselect, no retry
            self.timeout_error = true;
            self.state = ShiftState::Deselect;
            self.phase = 0;
        }

        match self.state {
            ShiftState::Idle => {}
            ShiftState::Select => {
                // Assert select one period before clocking so the peer can
                // load its shift register
                self.outputs.select_n = false;
                self.outputs.clock = false;
                if self.phase + 1 == TICKS_PER_BIT {
                    self.state = ShiftState::Transfer;
                    self.phase = 0;
                } else {
                    self.phase += 1;
                }
            }
            ShiftState::Transfer => self.step_bit(data_in),
            ShiftState::Deselect => {
                self.outputs.clock = false;
                if self.phase + 1 == TICKS_PER_BIT {
                    self.finalize();
                } else {
                    self.outputs.select_n = true;
                    self.phase += 1;
                }
            }
        }
    }

    fn step_bit(&mut self, data_in: bool) {
        match self.phase {
            0 => {
                // Launch phase: clock low, present the next outgoing bit
                self.outputs.clock = false;
                self.outputs.data_out = self.tx_shift & 0x8000 != 0;
                self.phase = 1;
            }
            1 => self.phase = 2,
            2 => {
                // Sample phase: clock high, capture the incoming bit
                self.outputs.clock = true;
                self.rx_shift = (self.rx_shift << 1) | u16::from(data_in);
                self.phase = 3;
            }
            _ => {
                self.outputs.clock = false;
                self.tx_shift <<= 1;
                self.bit += 1;
                self.phase = 0;
                if self.bit == WORD_BITS {
                    self.state = ShiftState::Deselect;
                }
            }
        }
    }

    fn finalize(&mut self) {
        self.stats.transfers += 1;
        if self.timeout_error {
            self.stats.timeouts += 1;
        }
        self.result = Some(ShiftResult {
            rx_word: self.rx_shift,
            timeout_error: self.timeout_error,
        });
        self.outputs = FourWireOutputs::idle();
        self.state = ShiftState::Idle;
        self.phase = 0;
    }

    #[must_use]
    pub fn outputs(&self) -> FourWireOutputs {
        self.outputs
    }

    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.state != ShiftState::Idle
    }

    pub fn take_result(&mut self) -> Option<ShiftResult> {
        self.result.take()
    }

    #[must_use]
    pub fn stats(&self) -> &FourWireStats {
        &self.stats
    }
}

impl Default for FourWireMaster {
    fn default() -> Self {
        Self::new()
    }
}

/// Shift-register peripheral model on the four-wire bus.
///
/// Loads its transmit word when select asserts, launches bits on the
/// observed falling/low clock and samples the master's line on the observed
/// rising edge — the mirror of the master's convention.
#[derive(Debug)]
pub struct ShiftDevice {
    tx_word: u16,
    tx_shift: u16,
    rx_shift: u16,
    last_received: u16,
    selected: bool,
    prev_clock: bool,
    data_out: bool,
}

impl ShiftDevice {
    #[must_use]
    pub fn new() -> Self {
        Self {
            tx_word: 0,
            tx_shift: 0,
            rx_shift: 0,
            last_received: 0,
            selected: false,
            prev_clock: false,
            data_out: false,
        }
    }

    /// Word returned on the next transfer.
    pub fn load_word(&mut self, word: u16) {
        self.tx_word = word;
    }

    /// Word the master shifted out during the most recent transfer.
    #[must_use]
    pub fn last_received(&self) -> u16 {
        self.last_received
    }

    #[must_use]
    pub fn data_out(&self) -> bool {
        self.data_out
    }

    pub fn step(&mut self, lines: FourWireOutputs) {
        let selected = !lines.select_n;

        if selected && !self.selected {
            // Select assertion loads the shift register
            self.tx_shift = self.tx_word;
            self.rx_shift = 0;
            self.data_out = self.tx_shift & 0x8000 != 0;
        }
        if !selected && self.selected {
            self.last_received = self.rx_shift;
        }
        self.selected = selected;

        if selected {
            let rising = !self.prev_clock && lines.clock;
            let falling = self.prev_clock && !lines.clock;
            if rising {
                self.rx_shift = (self.rx_shift << 1) | u16::from(lines.data_out);
            }
            if falling {
                self.tx_shift <<= 1;
                self.data_out = self.tx_shift & 0x8000 != 0;
            }
        }
        self.prev_clock = lines.clock;
    }
}

impl Default for ShiftDevice {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_transfer(
        master: &mut FourWireMaster,
        device: &mut ShiftDevice,
    ) -> (ShiftResult, u64) {
        let mut master_lines = FourWireOutputs::idle();
        let mut device_line = false;
        for tick in 1..=2000 {
            master.step(tick, device_line);
            device.step(master_lines);
            master_lines = master.outputs();
            device_line = device.data_out();
            if let Some(result) = master.take_result() {
                return (result, tick);
            }
        }
        panic!("transfer never completed");
    }

    #[test]
    fn test_full_duplex_word_exchange() {
        let mut master = FourWireMaster::new();
        let mut device = ShiftDevice::new();
        device.load_word(0x5AA5);

        master.begin(0xC310, 5000).unwrap();
        let (result, _) = run_transfer(&mut master, &mut device);
        assert!(!result.timeout_error);
        assert_eq!(result.rx_word, 0x5AA5);
        assert_eq!(device.last_received(), 0xC310);
    }

    #[test]
    fn test_transfer_width_is_fixed() {
        let mut master = FourWireMaster::new();
        let mut device = ShiftDevice::new();
        device.load_word(0xFFFF);

        master.begin(0x0000, 5000).unwrap();
        let (result, ticks) = run_transfer(&mut master, &mut device);
        assert_eq!(result.rx_word, 0xFFFF);
        // Select period + 16 bit periods + deselect period
        assert_eq!(
            ticks,
            u64::from(TICKS_PER_BIT) * (u64::from(WORD_BITS) + 2)
        );
    }

    #[test]
    fn test_deadline_aborts_with_timeout() {
        let mut master = FourWireMaster::new();
        let mut device = ShiftDevice::new();

        master.begin(0x1234, 10).unwrap();
        let (result, _) = run_transfer(&mut master, &mut device);
        assert!(result.timeout_error);
        assert!(!master.is_busy());
        assert_eq!(master.stats().timeouts, 1);
    }

    #[test]
    fn test_rejects_overlapping_transfers() {
        let mut master = FourWireMaster::new();
        master.begin(0x0001, 5000).unwrap();
        assert!(master.begin(0x0002, 5000).is_err());
    }
}
