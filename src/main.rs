//! CLI Entry Point for sensor-gateway
//!
//! Provides command-line interface for:
//! - Running a synthetic CAN pipeline (read loop, translation stage, consumers)
//! - Validating a configuration file
//! - Printing the effective configuration
//!
//! # Usage
//!
//! Run the demo pipeline for five seconds with three consumers:
//! ```bash
//! sensor-gateway run --seconds 5 --consumers 3
//! ```
//!
//! Check a configuration file:
//! ```bash
//! sensor-gateway check-config --config config/gateway.toml
//! ```

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use sensor_gateway::communication::{CommunicatorEvent, SensorCommunicator};
use sensor_gateway::config::{GatewayConfig, DEFAULT_CONFIG_PATH};
use sensor_gateway::data::source::{DataSource, Subscriber};
use sensor_gateway::hardware::mock::{CanFrame, SyntheticCanBus};
use sensor_gateway::logging;
use sensor_gateway::thread::{HighIntegrityThread, Join, StopSignal};
use sensor_gateway::translation::{MessageTranslationStrategy, Translate, TranslationStage};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::sync::broadcast::error::TryRecvError;
use tracing::info;

#[derive(Parser)]
#[command(name = "sensor-gateway")]
#[command(about = "Sensor data gateway with broadcast ring buffers", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a synthetic CAN source through a translation stage to N consumers
    Run {
        /// Configuration file
        #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,

        /// How long to run
        #[arg(long, default_value = "5")]
        seconds: u64,

        /// Number of consumers reading the translated stream
        #[arg(long, default_value = "2")]
        consumers: usize,

        /// Microseconds between synthetic frames
        #[arg(long, default_value = "500")]
        interval_us: u64,

        /// Fraction of reads that fail with a retryable bus error
        #[arg(long, default_value = "0.01")]
        error_rate: f64,

        /// Seed for the synthetic traffic
        #[arg(long, default_value = "42")]
        seed: u64,
    },

    /// Load and validate a configuration file
    CheckConfig {
        /// Configuration file
        #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,
    },

    /// Print the effective configuration as TOML
    PrintConfig {
        /// Configuration file
        #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            seconds,
            consumers,
            interval_us,
            error_rate,
            seed,
        } => {
            let config = load_config(&config)?;
            logging::init_from_config(&config)?;
            let bus = SyntheticCanBus::new("vcan0", Duration::from_micros(interval_us), seed)
                .with_error_rate(error_rate);
            run_pipeline(&config, bus, Duration::from_secs(seconds), consumers)
        }
        Commands::CheckConfig { config } => {
            let loaded = load_config(&config)?;
            println!("Configuration OK: {}", config.display());
            println!("   Ring capacity: {}", loaded.ring.capacity);
            println!(
                "   Reconnect: {} attempts, {:?} apart",
                loaded.communicator.reconnect_attempts, loaded.communicator.reconnect_backoff
            );
            Ok(())
        }
        Commands::PrintConfig { config } => {
            print!("{}", load_config(&config)?.to_toml_string()?);
            Ok(())
        }
    }
}

fn load_config(path: &Path) -> Result<GatewayConfig> {
    let config = GatewayConfig::load_from(path)
        .with_context(|| format!("loading configuration from {}", path.display()))?;
    config.validate()?;
    Ok(config)
}

/// Engineering value decoded from a CAN frame.
#[derive(Debug, Clone, Default, PartialEq)]
struct Reading {
    id: u32,
    value: f64,
    timestamp_us: u64,
}

/// Decodes the first two payload bytes as a little-endian raw count and applies
/// `value = raw * scale + offset`.
struct LinearScaling {
    scale: f64,
    offset: f64,
}

impl Translate<CanFrame> for LinearScaling {
    type Output = Reading;

    fn translate(&mut self, frame: CanFrame, reading: &mut Reading) {
        let raw = match frame.payload() {
            [lo, hi, ..] => u16::from_le_bytes([*lo, *hi]),
            [lo] => u16::from(*lo),
            // Empty frames keep the previous value.
            [] => {
                reading.id = frame.id;
                reading.timestamp_us = frame.timestamp_us;
                return;
            }
        };
        reading.id = frame.id;
        reading.value = f64::from(raw) * self.scale + self.offset;
        reading.timestamp_us = frame.timestamp_us;
    }
}

#[derive(Debug, Default)]
struct ConsumerTotals {
    received: u64,
    lost: u64,
    sum: f64,
}

impl ConsumerTotals {
    fn drain(&mut self, subscriber: &mut Subscriber<Reading>) {
        let news = subscriber.poll();
        self.lost += news.lost as u64;
        for reading in news {
            self.received += 1;
            self.sum += reading.value;
        }
    }
}

fn run_pipeline(
    config: &GatewayConfig,
    bus: SyntheticCanBus,
    duration: Duration,
    consumers: usize,
) -> Result<()> {
    info!(
        ring_capacity = config.ring.capacity,
        consumers,
        ?duration,
        "Starting synthetic pipeline"
    );

    let mut communicator = SensorCommunicator::from_config(bus, config)?;
    let mut events = communicator.events();

    let scaling = MessageTranslationStrategy::new(
        LinearScaling {
            scale: 0.01,
            offset: -40.0,
        },
        config.ring.capacity,
    )?;
    let mut stage = TranslationStage::from_config(
        "scaling",
        communicator.subscribe(),
        scaling,
        &config.translation,
    )?;

    let stop = StopSignal::new();
    let poll_interval = config.translation.poll_interval;
    let mut workers = Vec::with_capacity(consumers);
    for index in 0..consumers {
        let mut subscriber = stage.subscribe();
        let stop = stop.clone();
        workers.push(HighIntegrityThread::<Join, ConsumerTotals>::spawn(
            format!("consumer-{index}"),
            move || {
                let mut totals = ConsumerTotals::default();
                while !stop.wait_timeout(poll_interval) {
                    totals.drain(&mut subscriber);
                }
                totals.drain(&mut subscriber);
                totals
            },
        )?);
    }

    let started = Instant::now();
    while started.elapsed() < duration && communicator.is_running() {
        std::thread::sleep(Duration::from_millis(50));
    }

    let fatal = communicator.stop();
    stage.stop();
    stop.trigger();

    println!("Pipeline ran for {:.2?}", started.elapsed());
    println!(
        "   Source: {} published, {} advisories, {} reconnects",
        communicator.stats().published(),
        communicator.stats().advisories(),
        communicator.stats().reconnects()
    );
    println!(
        "   Translation: {} translated, {} lost",
        stage.translated(),
        stage.lost()
    );
    for (index, worker) in workers.into_iter().enumerate() {
        let totals = worker.join()?;
        let mean = if totals.received > 0 {
            totals.sum / totals.received as f64
        } else {
            0.0
        };
        println!(
            "   consumer-{index}: {} received, {} lost, mean value {:.3}",
            totals.received, totals.lost, mean
        );
    }

    let mut fatal_events = 0;
    loop {
        match events.try_recv() {
            Ok(CommunicatorEvent::Fatal(_)) => fatal_events += 1,
            Ok(_) | Err(TryRecvError::Lagged(_)) => {}
            Err(_) => break,
        }
    }

    if let Some(err) = fatal {
        bail!("read loop stopped on a fatal error ({fatal_events} reported): {err}");
    }
    Ok(())
}
