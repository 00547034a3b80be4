use anyhow::{anyhow, Result};
use log::debug;
use std::sync::Mutex;

use crate::accumulator::EnergyAccumulator;
use crate::adc::AdcSource;
use crate::analyzer;
use crate::corrector::{self, Offsets};
use crate::reader::ChannelReader;
use crate::snapshot::Snapshot;

/// One corrected observation. Never negative, recreated on every request.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Measurement {
    /// RMS voltage (V)
    pub vrms: f64,
    /// RMS current (A)
    pub irms: f64,
    /// Vrms × Irms after offset correction (W)
    pub power: f64,
}

/// The request-driven measurement pipeline: sample, analyze, correct,
/// integrate, export. Safe to share between concurrent request handlers.
pub struct Meter {
    reader: Mutex<ChannelReader<Box<dyn AdcSource>>>,
    offsets: Offsets,
    energy: EnergyAccumulator,
}

impl Meter {
    pub fn new(reader: ChannelReader<Box<dyn AdcSource>>, offsets: Offsets, energy: EnergyAccumulator) -> Self {
        Self {
            reader: Mutex::new(reader),
            offsets,
            energy,
        }
    }

    /// Run one full measurement cycle. Blocks for the sampling window.
    pub fn measure(&self) -> Result<Snapshot> {
        let window = {
            let mut reader = self
                .reader
                .lock()
                .map_err(|_| anyhow!("ADC reader lock poisoned"))?;
            reader.sample_window()?
        };

        let stats = analyzer::analyze(&window);
        let measurement = corrector::correct(&stats, &self.offsets);
        let kwh = self.energy.observe(measurement.power);

        debug!(
            "Raw Vrms {:.2} V, Irms {:.3} A, real {:.2} W, apparent {:.2} VA, PF {:.2} over {} samples",
            stats.vrms,
            stats.irms,
            stats.real_power,
            stats.apparent_power,
            stats.power_factor,
            stats.samples
        );
        debug!("Measurement: {:?}, total {:.6} kWh", measurement, kwh);

        Ok(Snapshot::new(measurement, kwh))
    }

    pub fn kwh(&self) -> f64 {
        self.energy.kwh()
    }
}
