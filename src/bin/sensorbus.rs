use clap::{App, Arg};
use colored::*;
use sensorbus::framer::{decode, DecodedFrame, FRAME_LEN};
use sensorbus::pipeline::{PipelineStats, SensorPipeline};
use sensorbus::power::PowerMode;
use sensorbus::ByteSink;
use std::time::Duration;
use tokio::time;
use tracing::{info, warn};

const DEFAULT_TICKS: &str = "20000";
const DEFAULT_TICK_MS: &str = "0";

/// Reassembles the pipeline's byte stream into frames and prints them as
/// they complete.
struct FramePrinter {
    buffer: Vec<u8>,
    verbose: bool,
    format: OutputFormat,
    frames: u64,
    bad_frames: u64,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum OutputFormat {
    Json,
    Table,
}

impl FramePrinter {
    fn new(format: OutputFormat, verbose: bool) -> Self {
        Self {
            buffer: Vec::with_capacity(FRAME_LEN),
            verbose,
            format,
            frames: 0,
            bad_frames: 0,
        }
    }

    fn print_frame(&self, frame: &DecodedFrame) {
        match self.format {
            OutputFormat::Json => {
                if let Ok(json) = serde_json::to_string(frame) {
                    println!("{}", json);
                }
            }
            OutputFormat::Table => {
                println!(
                    "  {} source={:<6} value={:#06x} ts={}",
                    "FRAME".green().bold(),
                    format!("{:?}", frame.source),
                    frame.value,
                    frame.timestamp,
                );
            }
        }
    }
}

impl ByteSink for FramePrinter {
    fn accept(&mut self, byte: u8) -> bool {
        self.buffer.push(byte);
        if self.buffer.len() == FRAME_LEN {
            match decode(&self.buffer) {
                Ok(frame) => {
                    self.frames += 1;
                    self.print_frame(&frame);
                }
                Err(e) => {
                    self.bad_frames += 1;
                    warn!("undecodable frame: {}", e);
                }
            }
            self.buffer.clear();
        } else if self.verbose {
            info!("byte {:#04x}", byte);
        }
        true
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let matches = App::new("sensorbus")
        .version("0.1.0")
        .about("📡 Sensor Acquisition Bus Engine - tick-driven multi-sensor simulation")
        .arg(
            Arg::with_name("ticks")
                .short("t")
                .long("ticks")
                .value_name("TICKS")
                .help("Number of ticks to simulate")
                .takes_value(true)
                .default_value(DEFAULT_TICKS)
                .validator(|v| {
                    v.parse::<u64>()
                        .map(|_| ())
                        .map_err(|_| "Tick count must be a valid number".into())
                }),
        )
        .arg(
            Arg::with_name("tick-ms")
                .long("tick-ms")
                .value_name("MILLIS")
                .help("Wall-clock pacing per tick in milliseconds (0 = free-running)")
                .takes_value(true)
                .default_value(DEFAULT_TICK_MS)
                .validator(|v| {
                    v.parse::<u64>()
                        .map(|_| ())
                        .map_err(|_| "Pacing must be a valid number".into())
                }),
        )
        .arg(
            Arg::with_name("mode")
                .short("m")
                .long("mode")
                .value_name("MODE")
                .help("Pin the power mode instead of following the battery model")
                .takes_value(true)
                .possible_values(&["normal", "reduced", "sleep", "deep-sleep"]),
        )
        .arg(
            Arg::with_name("format")
                .short("f")
                .long("format")
                .value_name("FORMAT")
                .help("Output format")
                .takes_value(true)
                .possible_values(&["json", "table"])
                .default_value("table"),
        )
        .arg(
            Arg::with_name("verbose")
                .short("v")
                .long("verbose")
                .help("Log every emitted byte"),
        )
        .get_matches();

    let ticks: u64 = matches.value_of("ticks").unwrap_or(DEFAULT_TICKS).parse()?;
    let tick_ms: u64 = matches
        .value_of("tick-ms")
        .unwrap_or(DEFAULT_TICK_MS)
        .parse()?;
    let format = match matches.value_of("format") {
        Some("json") => OutputFormat::Json,
        _ => OutputFormat::Table,
    };
    let verbose = matches.is_present("verbose");

    let mut pipeline = SensorPipeline::new();
    if let Some(mode) = matches.value_of("mode") {
        let mode = match mode {
            "reduced" => PowerMode::Reduced,
            "sleep" => PowerMode::Sleep,
            "deep-sleep" => PowerMode::DeepSleep,
            _ => PowerMode::Normal,
        };
        pipeline.command_power_mode(Some(mode));
        info!("power mode pinned to {:?}", mode);
    }

    if format == OutputFormat::Table {
        println!("{}", "📡 Sensor Acquisition Bus Engine".bold());
        println!("================================");
    }

    let mut sink = FramePrinter::new(format, verbose);

    if tick_ms == 0 {
        pipeline.run(ticks, &mut sink);
    } else {
        let mut interval = time::interval(Duration::from_millis(tick_ms));
        let mut remaining = ticks;
        loop {
            if remaining == 0 {
                break;
            }
            tokio::select! {
                _ = interval.tick() => {
                    pipeline.step(&mut sink);
                    remaining -= 1;
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("interrupted, stopping at tick {}", pipeline.tick());
                    break;
                }
            }
        }
    }

    let stats = pipeline.stats();
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&stats)?),
        OutputFormat::Table => print_summary(&stats, &sink),
    }

    let status = pipeline.status();
    if status.any() {
        warn!(
            "sticky status: thermo_error={} baro_error={} motion_error={} queue_overflow={}",
            status.thermo_error, status.baro_error, status.motion_error, status.queue_overflow
        );
    }

    Ok(())
}

fn print_summary(stats: &PipelineStats, sink: &FramePrinter) {
    println!();
    println!("{}", "📊 Run Summary".bold());
    println!("  ticks:            {}", stats.tick);
    println!(
        "  power:            {:?} ({} mV, {} mode changes)",
        stats.power.mode, stats.power.battery_mv, stats.power.mode_changes
    );
    println!(
        "  readings:         thermo={} baro={} motion={}",
        stats.thermo.readings, stats.baro.readings, stats.motion.readings
    );
    println!(
        "  adapter errors:   nack={} timeout={} skipped={}",
        stats.thermo.nack_errors + stats.baro.nack_errors + stats.motion.nack_errors,
        stats.thermo.timeout_errors + stats.baro.timeout_errors + stats.motion.timeout_errors,
        stats.thermo.skipped_cycles + stats.baro.skipped_cycles + stats.motion.skipped_cycles,
    );
    println!(
        "  two-wire:         {} transactions, {} errors",
        stats.two_wire.transactions,
        stats.two_wire.ack_errors + stats.two_wire.timeouts
    );
    println!(
        "  four-wire:        {} transfers, {} aborts",
        stats.four_wire.transfers, stats.four_wire.timeouts
    );
    println!(
        "  arbiter:          {} forwarded, overflows={:?}",
        stats.arbiter.forwarded, stats.arbiter.overflows
    );
    println!(
        "  framer:           {} frames, {} bytes, {} stalled ticks",
        stats.framer.frames_emitted, stats.framer.bytes_emitted, stats.framer.rejected_ticks
    );
    let decoded = if sink.bad_frames == 0 {
        format!("{} decoded, 0 bad", sink.frames).green()
    } else {
        format!("{} decoded, {} bad", sink.frames, sink.bad_frames).red()
    };
    println!("  receiver:         {}", decoded);
}
