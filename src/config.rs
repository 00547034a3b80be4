use anyhow::{ensure, Result};
use clap::{Parser, ValueEnum};
use std::net::SocketAddr;
use std::time::Duration;

use crate::simulate::MainsProfile;

#[derive(Parser, Debug)]
#[command(
    name = "apmeter",
    about = "Single-phase mains energy meter serving live readings over HTTP"
)]
pub struct Config {
    /// Address the HTTP server listens on
    #[arg(long, default_value = "0.0.0.0:80")]
    pub listen: SocketAddr,

    /// Where raw ADC samples come from
    #[arg(long, value_enum, default_value_t = SourceKind::Simulated)]
    pub source: SourceKind,

    /// Serial port path for the ADC bridge (if omitted, probes /dev/ttyUSB* and /dev/ttyACM*)
    #[arg(long)]
    pub port: Option<String>,

    /// Serial baud rate of the ADC bridge
    #[arg(long, default_value_t = 115_200)]
    pub baud_rate: u32,

    /// Serial read timeout in seconds
    #[arg(long, default_value_t = 2)]
    pub timeout_secs: u64,

    /// ADC-to-volts gain of the voltage channel
    #[arg(long, default_value_t = 225.0)]
    pub voltage_scale: f64,

    /// ADC-to-amps gain of the current channel (CT ratio over burden resistor)
    #[arg(long, default_value_t = 48.0)]
    pub current_scale: f64,

    /// Voltage sample interpolation factor compensating multiplexer skew
    #[arg(long, default_value_t = 1.7, allow_negative_numbers = true)]
    pub phase_correction: f64,

    /// Additive correction applied to RMS voltage (V)
    #[arg(long, default_value_t = -3.0, allow_negative_numbers = true)]
    pub voltage_offset: f64,

    /// Additive correction applied to RMS current (A)
    #[arg(long, default_value_t = -0.4, allow_negative_numbers = true)]
    pub current_offset: f64,

    /// ADC resolution in bits
    #[arg(long, default_value_t = 12)]
    pub adc_bits: u32,

    /// ADC reference voltage (V)
    #[arg(long, default_value_t = 3.3)]
    pub supply_voltage: f64,

    /// Half-cycles (voltage crossings) per observation window
    #[arg(long, default_value_t = 20)]
    pub half_cycles: u32,

    /// Upper bound on sample pairs per observation window
    #[arg(long, default_value_t = 200)]
    pub max_samples: usize,

    /// Upper bound on the duration of one observation window in milliseconds
    #[arg(long, default_value_t = 200)]
    pub window_timeout_ms: u64,

    /// Simulated mains RMS voltage (V)
    #[arg(long, default_value_t = 230.0)]
    pub sim_vrms: f64,

    /// Simulated load RMS current (A)
    #[arg(long, default_value_t = 2.5)]
    pub sim_irms: f64,

    /// Simulated load phase angle, current lagging voltage (degrees)
    #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
    pub sim_phase_deg: f64,

    /// Simulated mains frequency (Hz)
    #[arg(long, default_value_t = 50.0)]
    pub sim_frequency: f64,

    /// Simulated ADC pair rate (samples per second per channel)
    #[arg(long, default_value_t = 5000.0)]
    pub sim_sample_rate: f64,

    /// Simulated additive noise amplitude in ADC counts
    #[arg(long, default_value_t = 2.0)]
    pub sim_noise: f64,

    /// Seed for the simulated noise generator (random if omitted)
    #[arg(long)]
    pub sim_seed: Option<u64>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum SourceKind {
    Simulated,
    Serial,
}

/// Immutable calibration fixed at startup.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Calibration {
    pub voltage_scale: f64,
    pub current_scale: f64,
    pub phase_correction: f64,
    pub voltage_offset: f64,
    pub current_offset: f64,
    pub adc_bits: u32,
    pub supply_voltage: f64,
}

impl Calibration {
    /// Full-scale ADC count, e.g. 4096 for a 12-bit converter.
    pub fn adc_counts(&self) -> f64 {
        (1u32 << self.adc_bits) as f64
    }

    pub fn volts_per_count(&self) -> f64 {
        self.voltage_scale * self.supply_voltage / self.adc_counts()
    }

    pub fn amps_per_count(&self) -> f64 {
        self.current_scale * self.supply_voltage / self.adc_counts()
    }
}

impl Default for Calibration {
    fn default() -> Self {
        Self {
            voltage_scale: 225.0,
            current_scale: 48.0,
            phase_correction: 1.7,
            voltage_offset: -3.0,
            current_offset: -0.4,
            adc_bits: 12,
            supply_voltage: 3.3,
        }
    }
}

/// Bounds of one observation window; sampling stops at whichever is hit first.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SamplingWindow {
    pub half_cycles: u32,
    pub max_samples: usize,
    pub timeout: Duration,
}

impl Default for SamplingWindow {
    fn default() -> Self {
        Self {
            half_cycles: 20,
            max_samples: 200,
            timeout: Duration::from_millis(200),
        }
    }
}

impl Config {
    pub fn calibration(&self) -> Result<Calibration> {
        ensure!(
            (8..=16).contains(&self.adc_bits),
            "ADC resolution must be between 8 and 16 bits, got {}",
            self.adc_bits
        );
        ensure!(
            self.supply_voltage > 0.0,
            "Supply voltage must be positive, got {}",
            self.supply_voltage
        );
        Ok(Calibration {
            voltage_scale: self.voltage_scale,
            current_scale: self.current_scale,
            phase_correction: self.phase_correction,
            voltage_offset: self.voltage_offset,
            current_offset: self.current_offset,
            adc_bits: self.adc_bits,
            supply_voltage: self.supply_voltage,
        })
    }

    pub fn window(&self) -> Result<SamplingWindow> {
        ensure!(self.max_samples > 0, "--max-samples must be at least 1");
        ensure!(self.half_cycles > 0, "--half-cycles must be at least 1");
        Ok(SamplingWindow {
            half_cycles: self.half_cycles,
            max_samples: self.max_samples,
            timeout: Duration::from_millis(self.window_timeout_ms),
        })
    }

    pub fn mains_profile(&self) -> Result<MainsProfile> {
        ensure!(
            self.sim_frequency > 0.0,
            "--sim-frequency must be positive, got {}",
            self.sim_frequency
        );
        ensure!(
            self.sim_sample_rate > 0.0,
            "--sim-sample-rate must be positive, got {}",
            self.sim_sample_rate
        );
        ensure!(self.sim_noise >= 0.0, "--sim-noise must not be negative, got {}", self.sim_noise);
        Ok(MainsProfile {
            vrms: self.sim_vrms,
            irms: self.sim_irms,
            phase_deg: self.sim_phase_deg,
            frequency: self.sim_frequency,
            sample_rate: self.sim_sample_rate,
            noise: self.sim_noise,
        })
    }
}
