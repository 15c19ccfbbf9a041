use sensorbus::bus::two_wire::{RegisterDevice, TwoWireConfig, TwoWireMaster};
use sensorbus::bus::four_wire::FourWireMaster;
use sensorbus::bus::{resolve_bus, BusGrant, LineLevels};
use sensorbus::power::PowerMode;
use sensorbus::sensors::baro::{BaroAdapter, BARO_BUS_ADDRESS, PRESSURE_POINTER};
use sensorbus::sensors::motion::{MotionAdapter, MotionDevice, READ_SAMPLE_COMMAND};
use sensorbus::sensors::thermo::{ThermoAdapter, THERMO_BUS_ADDRESS};
use sensorbus::sensors::{AdapterConfig, AdapterError, Reading, SourceId};

fn eager_config() -> AdapterConfig {
    AdapterConfig {
        base_interval: 0,
        transaction_timeout: 400,
    }
}

/// Two adapters, one engine, two peripherals on the same wires.
struct SharedBus {
    master: TwoWireMaster,
    grant: BusGrant,
    thermo: ThermoAdapter,
    baro: BaroAdapter,
    thermo_dev: RegisterDevice,
    baro_dev: RegisterDevice,
    levels: LineLevels,
    readings: Vec<Reading>,
}

impl SharedBus {
    fn new() -> Self {
        let mut thermo_dev = RegisterDevice::new(THERMO_BUS_ADDRESS);
        thermo_dev.load_value(0xBEEF);
        let mut baro_dev = RegisterDevice::new(BARO_BUS_ADDRESS);
        baro_dev.set_register(PRESSURE_POINTER as usize, 0x12);
        baro_dev.set_register(PRESSURE_POINTER as usize + 1, 0x34);
        Self {
            master: TwoWireMaster::new(TwoWireConfig::default()),
            grant: BusGrant::new(),
            thermo: ThermoAdapter::new(eager_config()),
            baro: BaroAdapter::new(eager_config()),
            thermo_dev,
            baro_dev,
            levels: LineLevels::idle(),
            readings: Vec::new(),
        }
    }

    fn run(&mut self, from: u64, to: u64) {
        for tick in from..=to {
            if let Some(r) =
                self.thermo
                    .step(tick, PowerMode::Normal, &mut self.master, &mut self.grant)
            {
                self.readings.push(r);
            }
            if let Some(r) =
                self.baro
                    .step(tick, PowerMode::Normal, &mut self.master, &mut self.grant)
            {
                self.readings.push(r);
            }
            self.master.step(tick, self.levels);
            self.thermo_dev.step(self.levels);
            self.baro_dev.step(self.levels);
            self.levels = resolve_bus(&[
                self.master.outputs(),
                self.thermo_dev.outputs(),
                self.baro_dev.outputs(),
            ]);
        }
    }
}

#[test]
fn test_grant_contention_serializes_acquisitions() {
    let mut bus = SharedBus::new();

    // Both adapters want the engine on tick 1; the thermometer is stepped
    // first and must win
    bus.run(1, 1);
    assert_eq!(bus.grant.owner(), Some(SourceId::Thermo));
    assert!(bus.grant.is_held_by(SourceId::Thermo));
    assert_eq!(bus.baro.stats().readings, 0);

    // Far enough for both acquisitions back to back
    bus.run(2, 800);
    assert!(bus.thermo.stats().readings >= 1);
    assert!(bus.baro.stats().readings >= 1);

    // First completed reading is the thermometer's, and the values came
    // through the register windows intact
    assert_eq!(bus.readings[0].source, SourceId::Thermo);
    assert_eq!(bus.readings[0].value, 0xBEEF);
    let baro = bus
        .readings
        .iter()
        .find(|r| r.source == SourceId::Baro)
        .unwrap();
    assert_eq!(baro.value, 0x1234);
}

#[test]
fn test_silent_peer_skips_cycle_and_frees_the_bus() {
    let mut bus = SharedBus::new();
    bus.thermo_dev.set_respond(false);

    bus.run(1, 800);

    // The thermometer records a sticky no-acknowledge and emits nothing
    assert_eq!(bus.thermo.stats().readings, 0);
    assert!(bus.thermo.stats().nack_errors >= 1);
    assert!(bus.thermo.stats().skipped_cycles >= 1);
    assert_eq!(bus.thermo.last_error(), Some(AdapterError::Nack));

    // The failed acquisition released the grant; the barometer still reads
    assert!(bus.baro.stats().readings >= 1);
    assert!(bus.baro.last_error().is_none());
}

#[test]
fn test_stretching_peer_delays_but_does_not_fail() {
    let mut bus = SharedBus::new();
    bus.thermo_dev.set_stretch(10);

    bus.run(1, 1600);

    assert!(bus.thermo.stats().readings >= 1);
    assert_eq!(bus.thermo.stats().timeout_errors, 0);
    assert!(bus.master.stats().stretched_ticks > 0);
    assert_eq!(bus.readings[0].value, 0xBEEF);
}

struct MotionBus {
    master: FourWireMaster,
    device: MotionDevice,
    adapter: MotionAdapter,
    lines: sensorbus::bus::four_wire::FourWireOutputs,
    data_in: bool,
    readings: Vec<Reading>,
}

impl MotionBus {
    fn new() -> Self {
        let master = FourWireMaster::new();
        Self {
            lines: master.outputs(),
            master,
            device: MotionDevice::new(),
            adapter: MotionAdapter::new(AdapterConfig {
                base_interval: 10_000,
                transaction_timeout: 400,
            }),
            data_in: false,
            readings: Vec::new(),
        }
    }

    fn run(&mut self, from: u64, to: u64) {
        for tick in from..=to {
            // Tick pinned to the quiet stretch so the event line stays low
            self.device.update(tick % 100);
            if let Some(r) = self.adapter.step(
                tick,
                PowerMode::DeepSleep,
                &mut self.master,
                self.device.event_line(),
            ) {
                self.readings.push(r);
            }
            self.master.step(tick, self.data_in);
            self.device.step(self.lines);
            self.lines = self.master.outputs();
            self.data_in = self.device.data_out();
        }
    }
}

#[test]
fn test_motion_wake_short_circuits_deep_sleep() {
    let mut bus = MotionBus::new();

    // Deep sleep with no wake: the adapter never touches the bus
    bus.run(1, 300);
    assert!(bus.readings.is_empty());
    assert_eq!(bus.master.stats().transfers, 0);

    // A latched wake triggers exactly one acquisition
    bus.adapter.force_wake();
    bus.run(301, 500);
    assert_eq!(bus.readings.len(), 1);
    assert_eq!(bus.readings[0].source, SourceId::Motion);
    assert_eq!(bus.adapter.stats().wake_events, 1);
    assert_eq!(bus.device.last_received(), READ_SAMPLE_COMMAND);
}
