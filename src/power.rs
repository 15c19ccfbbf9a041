//! Power mode controller.
//!
//! The adapters consume exactly one value from here per tick: the current
//! [`PowerMode`], interpreted purely as an interval-scaling / enable signal.
//! A manually commanded mode always wins; otherwise a small battery model
//! downshifts through the modes as charge depletes and upshifts back with
//! hysteresis as it recovers.

use serde::{Deserialize, Serialize};

const FULL_CHARGE_MV: u16 = 4200;
const REDUCED_THRESHOLD_MV: u16 = 3600;
const SLEEP_THRESHOLD_MV: u16 = 3300;
const DEEP_SLEEP_THRESHOLD_MV: u16 = 3000;
const UPSHIFT_HYSTERESIS_MV: u16 = 100;

// Drain/recovery pacing in ticks per millivolt
const DRAIN_PERIOD_TICKS: u64 = 32;
const RECOVERY_PERIOD_TICKS: u64 = 8;

/// Operating mode sampled once per tick by every adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PowerMode {
    Normal,
    Reduced,
    Sleep,
    DeepSleep,
}

impl PowerMode {
    /// Multiplier applied to each adapter's base polling interval.
    #[must_use]
    pub fn interval_scale(self) -> u32 {
        match self {
            PowerMode::Normal => 1,
            PowerMode::Reduced => 2,
            PowerMode::Sleep | PowerMode::DeepSleep => 4,
        }
    }

    /// Whether the bus-based (two-wire) adapters run at all.
    #[must_use]
    pub fn bus_sensors_enabled(self) -> bool {
        self != PowerMode::DeepSleep
    }

    fn for_battery(battery_mv: u16, current: PowerMode) -> PowerMode {
        // Upshift only once the level clears the threshold plus hysteresis,
        // so the mode does not chatter around a boundary
        let margin = |threshold: u16| match current {
            PowerMode::Normal => threshold,
            _ => threshold.saturating_add(UPSHIFT_HYSTERESIS_MV),
        };
        if battery_mv < DEEP_SLEEP_THRESHOLD_MV {
            PowerMode::DeepSleep
        } else if battery_mv < margin(SLEEP_THRESHOLD_MV) {
            PowerMode::Sleep
        } else if battery_mv < margin(REDUCED_THRESHOLD_MV) {
            PowerMode::Reduced
        } else {
            PowerMode::Normal
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PowerState {
    pub mode: PowerMode,
    pub commanded: Option<PowerMode>,
    pub battery_mv: u16,
    pub mode_changes: u32,
}

/// Tracks the battery model and resolves the effective mode each tick.
#[derive(Debug)]
pub struct PowerManager {
    state: PowerState,
}

impl PowerManager {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: PowerState {
                mode: PowerMode::Normal,
                commanded: None,
                battery_mv: FULL_CHARGE_MV,
                mode_changes: 0,
            },
        }
    }

    /// Pin the mode regardless of battery level, or `None` to return to
    /// automatic selection.
    pub fn command_mode(&mut self, mode: Option<PowerMode>) {
        self.state.commanded = mode;
    }

    /// Advance one tick and return the mode for the adapters to sample.
    pub fn step(&mut self, tick: u64) -> PowerMode {
        // Normal operation drains; the deeper modes recover charge
        match self.state.mode {
            PowerMode::Normal | PowerMode::Reduced => {
                if tick % DRAIN_PERIOD_TICKS == 0 {
                    self.state.battery_mv = self.state.battery_mv.saturating_sub(1);
                }
            }
            PowerMode::Sleep | PowerMode::DeepSleep => {
                if tick % RECOVERY_PERIOD_TICKS == 0 && self.state.battery_mv < FULL_CHARGE_MV
                {
                    self.state.battery_mv += 1;
                }
            }
        }

        let next = self
            .state
            .commanded
            .unwrap_or_else(|| PowerMode::for_battery(self.state.battery_mv, self.state.mode));
        if next != self.state.mode {
            self.state.mode_changes += 1;
            self.state.mode = next;
        }
        self.state.mode
    }

    #[must_use]
    pub fn mode(&self) -> PowerMode {
        self.state.mode
    }

    #[must_use]
    pub fn state(&self) -> &PowerState {
        &self.state
    }
}

impl Default for PowerManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interval_scaling() {
        assert_eq!(PowerMode::Normal.interval_scale(), 1);
        assert_eq!(PowerMode::Reduced.interval_scale(), 2);
        assert_eq!(PowerMode::Sleep.interval_scale(), 4);
        assert!(!PowerMode::DeepSleep.bus_sensors_enabled());
        assert!(PowerMode::Sleep.bus_sensors_enabled());
    }

    #[test]
    fn test_commanded_mode_overrides_battery() {
        let mut manager = PowerManager::new();
        manager.command_mode(Some(PowerMode::DeepSleep));
        assert_eq!(manager.step(1), PowerMode::DeepSleep);

        manager.command_mode(None);
        // Full battery returns to Normal automatically
        assert_eq!(manager.step(2), PowerMode::Normal);
    }

    #[test]
    fn test_battery_depletion_downshifts() {
        let mut manager = PowerManager::new();
        manager.state.battery_mv = SLEEP_THRESHOLD_MV - 1;
        assert_eq!(manager.step(1), PowerMode::Sleep);

        manager.state.battery_mv = DEEP_SLEEP_THRESHOLD_MV - 1;
        assert_eq!(manager.step(2), PowerMode::DeepSleep);
    }

    #[test]
    fn test_upshift_requires_hysteresis_margin() {
        let mut manager = PowerManager::new();
        manager.state.battery_mv = SLEEP_THRESHOLD_MV - 1;
        assert_eq!(manager.step(1), PowerMode::Sleep);

        // Just above the threshold is not enough to leave Sleep
        manager.state.battery_mv = SLEEP_THRESHOLD_MV + 1;
        assert_eq!(manager.step(2), PowerMode::Sleep);

        manager.state.battery_mv = SLEEP_THRESHOLD_MV + UPSHIFT_HYSTERESIS_MV;
        assert_eq!(manager.step(3), PowerMode::Reduced);
    }
}
