use anyhow::Result;
use log::debug;
use std::time::{Duration, Instant};

use crate::adc::AdcSource;
use crate::config::{Calibration, SamplingWindow};

/// Calibrated samples of one observation window, in volts and amps.
#[derive(Debug, Clone, Default)]
pub struct CalibratedWindow {
    pub voltage: Vec<f64>,
    pub current: Vec<f64>,
    /// Voltage crossings of the start reference seen during the window.
    pub crossings: u32,
    pub elapsed: Duration,
}

/// Samples both channels of an ADC source and turns raw counts into
/// bias-free, phase-aligned, calibrated values.
///
/// The per-channel DC bias estimate is a slow running mean that persists
/// across windows, so it settles over the first few requests. The previous
/// filtered voltage persists too, so every sample of a window is
/// phase-shifted, the first one included.
pub struct ChannelReader<S> {
    source: S,
    calibration: Calibration,
    window: SamplingWindow,
    offset_v: f64,
    offset_i: f64,
    last_filtered_v: f64,
}

impl<S: AdcSource> ChannelReader<S> {
    pub fn new(source: S, calibration: Calibration, window: SamplingWindow) -> Self {
        let mid_scale = calibration.adc_counts() / 2.0;
        Self {
            source,
            calibration,
            window,
            offset_v: mid_scale,
            offset_i: mid_scale,
            last_filtered_v: 0.0,
        }
    }

    /// Read raw voltage until it sits near mid-scale, i.e. close to a zero
    /// crossing, so windows start at a consistent point of the waveform.
    fn wait_for_start(&mut self) -> Result<f64> {
        let counts = self.calibration.adc_counts();
        let (low, high) = (counts * 0.45, counts * 0.55);
        let started = Instant::now();
        loop {
            let v = self.source.read()?.voltage as f64;
            if (v > low && v < high) || started.elapsed() >= self.window.timeout {
                return Ok(v);
            }
        }
    }

    /// Collect one observation window. Blocks until the half-cycle count, the
    /// sample cap or the timeout is reached, whichever comes first.
    pub fn sample_window(&mut self) -> Result<CalibratedWindow> {
        self.source.begin_window()?;
        let start_v = self.wait_for_start()?;

        let counts = self.calibration.adc_counts();
        let phase_correction = self.calibration.phase_correction;
        let v_ratio = self.calibration.volts_per_count();
        let i_ratio = self.calibration.amps_per_count();

        let mut out = CalibratedWindow {
            voltage: Vec::with_capacity(self.window.max_samples),
            current: Vec::with_capacity(self.window.max_samples),
            ..Default::default()
        };
        let mut last_above: Option<bool> = None;

        let started = Instant::now();
        while out.crossings < self.window.half_cycles
            && out.voltage.len() < self.window.max_samples
            && started.elapsed() < self.window.timeout
        {
            let sample = self.source.read()?;
            let raw_v = sample.voltage as f64;
            let raw_i = sample.current as f64;

            self.offset_v += (raw_v - self.offset_v) / counts;
            self.offset_i += (raw_i - self.offset_i) / counts;
            let filtered_v = raw_v - self.offset_v;
            let filtered_i = raw_i - self.offset_i;

            let prev = self.last_filtered_v;
            let shifted_v = prev + phase_correction * (filtered_v - prev);
            self.last_filtered_v = filtered_v;

            out.voltage.push(shifted_v * v_ratio);
            out.current.push(filtered_i * i_ratio);

            let above = raw_v > start_v;
            if last_above.is_some_and(|prev| prev != above) {
                out.crossings += 1;
            }
            last_above = Some(above);
        }
        out.elapsed = started.elapsed();

        debug!(
            "Sampled {} pairs, {} crossings in {:?}",
            out.voltage.len(),
            out.crossings,
            out.elapsed
        );
        Ok(out)
    }
}
