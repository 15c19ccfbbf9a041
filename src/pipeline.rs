//! Top-level acquisition pipeline.
//!
//! Owns every state machine — power manager, bus masters, simulated
//! peripherals, polling adapters, arbiter, framer — and advances them all
//! exactly once per [`SensorPipeline::step`] call. There is no true
//! parallelism: components are logically concurrent machines evaluated in a
//! fixed order, and every cross-component read samples prior-tick state
//! (the bus line resolutions and the arbiter→framer skid register are the
//! explicit one-tick boundaries), so the evaluation order cannot create
//! combinational shortcuts.

use crate::arbiter::{ArbiterStats, PriorityArbiter};
use crate::bus::four_wire::{FourWireMaster, FourWireOutputs, FourWireStats};
use crate::bus::two_wire::{
    RegisterDevice, TwoWireConfig, TwoWireMaster, TwoWireStats,
};
use crate::bus::{resolve_bus, BusGrant, LineLevels};
use crate::framer::{ByteSink, FramerStats, PacketFramer};
use crate::power::{PowerManager, PowerMode, PowerState};
use crate::sensors::baro::{BaroAdapter, BaroModel, BARO_BUS_ADDRESS, PRESSURE_POINTER};
use crate::sensors::motion::{MotionAdapter, MotionDevice};
use crate::sensors::thermo::{ThermoAdapter, ThermoModel, THERMO_BUS_ADDRESS};
use crate::sensors::{AdapterConfig, AdapterStats, Reading};
use serde::{Deserialize, Serialize};

/// Aggregate configuration for every component with tunables.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub two_wire: TwoWireConfig,
    pub thermo: AdapterConfig,
    pub baro: AdapterConfig,
    pub motion: AdapterConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        // Staggered base intervals keep the shared two-wire engine from
        // being contended on every cycle
        Self {
            two_wire: TwoWireConfig::default(),
            thermo: AdapterConfig {
                base_interval: 400,
                ..AdapterConfig::default()
            },
            baro: AdapterConfig {
                base_interval: 520,
                ..AdapterConfig::default()
            },
            motion: AdapterConfig {
                base_interval: 640,
                ..AdapterConfig::default()
            },
        }
    }
}

/// Counters from every stage, snapshotted for telemetry-style output.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PipelineStats {
    pub tick: u64,
    pub power: PowerState,
    pub two_wire: TwoWireStats,
    pub four_wire: FourWireStats,
    pub arbiter: ArbiterStats,
    pub framer: FramerStats,
    pub thermo: AdapterStats,
    pub baro: AdapterStats,
    pub motion: AdapterStats,
}

/// Single aggregated status output: one sticky boolean per component,
/// OR-able into one line for a surrounding integration layer.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct PipelineStatus {
    pub thermo_error: bool,
    pub baro_error: bool,
    pub motion_error: bool,
    pub queue_overflow: bool,
}

impl PipelineStatus {
    #[must_use]
    pub fn any(&self) -> bool {
        self.thermo_error || self.baro_error || self.motion_error || self.queue_overflow
    }
}

/// The complete tick-driven acquisition chain.
pub struct SensorPipeline {
    tick: u64,
    power: PowerManager,

    // Shared two-wire bus: one master, two peripherals, one grant token
    two_wire_master: TwoWireMaster,
    two_wire_grant: BusGrant,
    two_wire_levels: LineLevels,
    thermo_device: RegisterDevice,
    baro_device: RegisterDevice,

    // Four-wire bus: master and the motion peripheral
    four_wire_master: FourWireMaster,
    four_wire_lines: FourWireOutputs,
    four_wire_data_in: bool,
    motion_device: MotionDevice,
    motion_event: bool,

    thermo: ThermoAdapter,
    baro: BaroAdapter,
    motion: MotionAdapter,
    thermo_model: ThermoModel,
    baro_model: BaroModel,

    arbiter: PriorityArbiter,
    framer: PacketFramer,
    // One-slot skid register between arbiter and framer; the one-tick
    // pipeline latency downstream consumers derive their data rate from
    pending: Option<Reading>,
}

impl SensorPipeline {
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(PipelineConfig::default())
    }

    #[must_use]
    pub fn with_config(config: PipelineConfig) -> Self {
        Self {
            tick: 0,
            power: PowerManager::new(),
            two_wire_master: TwoWireMaster::new(config.two_wire),
            two_wire_grant: BusGrant::new(),
            two_wire_levels: LineLevels::idle(),
            thermo_device: RegisterDevice::new(THERMO_BUS_ADDRESS),
            baro_device: RegisterDevice::new(BARO_BUS_ADDRESS),
            four_wire_master: FourWireMaster::new(),
            four_wire_lines: FourWireOutputs::idle(),
            four_wire_data_in: false,
            motion_device: MotionDevice::new(),
            motion_event: false,
            thermo: ThermoAdapter::new(config.thermo),
            baro: BaroAdapter::new(config.baro),
            motion: MotionAdapter::new(config.motion),
            thermo_model: ThermoModel,
            baro_model: BaroModel,
            arbiter: PriorityArbiter::new(),
            framer: PacketFramer::new(),
            pending: None,
        }
    }

    /// Advance the whole pipeline by one tick, streaming any due frame byte
    /// into `sink`.
    pub fn step(&mut self, sink: &mut dyn ByteSink) {
        self.tick += 1;
        let tick = self.tick;

        // Power mode is sampled once per tick by everything downstream
        let mode = self.power.step(tick);

        // Sensor physics refresh the peripheral registers
        self.thermo_device.load_value(self.thermo_model.value_at(tick));
        let pressure = self.baro_model.value_at(tick);
        self.baro_device
            .set_register(PRESSURE_POINTER as usize, (pressure >> 8) as u8);
        self.baro_device
            .set_register(PRESSURE_POINTER as usize + 1, (pressure & 0xFF) as u8);
        self.motion_device.update(tick);

        // Framer first: it may only pick up a decision latched on an
        // earlier tick, never one dequeued later in this same tick
        if self.framer.ready() {
            if let Some(reading) = self.pending.take() {
                self.framer.load(&reading);
            }
        }
        self.framer.step(sink);

        // Adapters in priority order; evaluation order doubles as the
        // fixed-priority arbitration for the shared two-wire grant
        if let Some(reading) =
            self.thermo
                .step(tick, mode, &mut self.two_wire_master, &mut self.two_wire_grant)
        {
            self.arbiter.push(reading);
        }
        if let Some(reading) =
            self.baro
                .step(tick, mode, &mut self.two_wire_master, &mut self.two_wire_grant)
        {
            self.arbiter.push(reading);
        }
        if let Some(reading) =
            self.motion
                .step(tick, mode, &mut self.four_wire_master, self.motion_event)
        {
            self.arbiter.push(reading);
        }

        // At most one dequeue system-wide, into the skid register
        let downstream_ready = self.pending.is_none();
        if let Some(reading) = self.arbiter.step(downstream_ready) {
            self.pending = Some(reading);
        }

        // Bus participants sample the prior-tick resolution, then the new
        // levels are resolved for the next tick
        self.two_wire_master.step(tick, self.two_wire_levels);
        self.thermo_device.step(self.two_wire_levels);
        self.baro_device.step(self.two_wire_levels);
        self.two_wire_levels = resolve_bus(&[
            self.two_wire_master.outputs(),
            self.thermo_device.outputs(),
            self.baro_device.outputs(),
        ]);

        self.four_wire_master.step(tick, self.four_wire_data_in);
        self.motion_device.step(self.four_wire_lines);
        self.four_wire_lines = self.four_wire_master.outputs();
        self.four_wire_data_in = self.motion_device.data_out();
        self.motion_event = self.motion_device.event_line();
    }

    /// Run `ticks` steps against the sink.
    pub fn run(&mut self, ticks: u64, sink: &mut dyn ByteSink) {
        for _ in 0..ticks {
            self.step(sink);
        }
    }

    /// Ground-test hook: post a reading directly into its source queue,
    /// bypassing the adapters.
    pub fn inject_reading(&mut self, reading: Reading) {
        self.arbiter.push(reading);
    }

    /// Latch a wake for the event-driven adapter.
    pub fn trigger_wake(&mut self) {
        self.motion.force_wake();
    }

    /// Pin or release the power mode (a commanded mode overrides the
    /// battery model).
    pub fn command_power_mode(&mut self, mode: Option<PowerMode>) {
        self.power.command_mode(mode);
    }

    #[must_use]
    pub fn tick(&self) -> u64 {
        self.tick
    }

    #[must_use]
    pub fn power_mode(&self) -> PowerMode {
        self.power.mode()
    }

    #[must_use]
    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            tick: self.tick,
            power: *self.power.state(),
            two_wire: *self.two_wire_master.stats(),
            four_wire: *self.four_wire_master.stats(),
            arbiter: *self.arbiter.stats(),
            framer: *self.framer.stats(),
            thermo: *self.thermo.stats(),
            baro: *self.baro.stats(),
            motion: *self.motion.stats(),
        }
    }

    /// Aggregated sticky error flags, one boolean per component.
    #[must_use]
    pub fn status(&self) -> PipelineStatus {
        PipelineStatus {
            thermo_error: self.thermo.last_error().is_some(),
            baro_error: self.baro.last_error().is_some(),
            motion_error: self.motion.last_error().is_some(),
            queue_overflow: self.arbiter.overflowed(),
        }
    }
}

impl Default for SensorPipeline {
    fn default() -> Self {
        Self::new()
    }
}
