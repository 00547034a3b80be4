mod accumulator;
mod adc;
mod analyzer;
mod config;
mod corrector;
mod meter;
mod reader;
mod serial;
mod server;
mod simulate;
mod snapshot;

use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info};
use std::io::BufReader;
use std::sync::Arc;
use std::time::Duration;

use accumulator::{EnergyAccumulator, MonotonicClock};
use adc::AdcSource;
use config::{Calibration, Config, SourceKind};
use corrector::Offsets;
use meter::Meter;
use reader::ChannelReader;
use serial::SerialAdc;
use simulate::SimulatedMains;

fn open_source(config: &Config, calibration: &Calibration) -> Result<Box<dyn AdcSource>> {
    match config.source {
        SourceKind::Simulated => {
            info!(
                "Simulating {} V / {} A at {} Hz, {}° lag",
                config.sim_vrms, config.sim_irms, config.sim_frequency, config.sim_phase_deg
            );
            let profile = config.mains_profile()?;
            Ok(match config.sim_seed {
                Some(seed) => Box::new(SimulatedMains::seeded(profile, calibration, seed)),
                None => Box::new(SimulatedMains::new(profile, calibration)),
            })
        }
        SourceKind::Serial => {
            let timeout = Duration::from_secs(config.timeout_secs);
            match &config.port {
                Some(path) => {
                    info!("Using specified port: {}", path);
                    Ok(Box::new(SerialAdc::open(path, config.baud_rate, timeout)?))
                }
                None => {
                    info!("No port specified, probing for ADC bridge ...");
                    let (path, mut port) = serial::find_adc_port(config.baud_rate)?;
                    port.set_timeout(timeout)
                        .with_context(|| format!("Failed to set timeout on {}", path))?;
                    Ok(Box::new(SerialAdc::new(BufReader::new(port))))
                }
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let config = Config::parse();
    info!("Starting apmeter");

    let calibration = config.calibration()?;
    let window = config.window()?;
    info!("Calibration: {:?}", calibration);

    let source = open_source(&config, &calibration)?;
    let meter = Arc::new(Meter::new(
        ChannelReader::new(source, calibration, window),
        Offsets::from(&calibration),
        EnergyAccumulator::new(Box::new(MonotonicClock::new())),
    ));

    let app = server::create_router(Arc::clone(&meter));
    let listener = tokio::net::TcpListener::bind(config.listen)
        .await
        .with_context(|| format!("Failed to bind {}", config.listen))?;
    info!("Serving readings on http://{}", config.listen);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    // Not persisted; the total restarts from zero
    info!("Shutting down with {:.3} kWh accumulated", meter.kwh());
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}
