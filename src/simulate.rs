use anyhow::Result;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::f64::consts::{SQRT_2, TAU};

use crate::adc::{AdcSource, RawSample};
use crate::config::Calibration;

/// Electrical parameters of the simulated circuit.
#[derive(Debug, Clone, Copy)]
pub struct MainsProfile {
    pub vrms: f64,
    pub irms: f64,
    /// Current lag behind voltage in degrees (positive for inductive loads).
    pub phase_deg: f64,
    pub frequency: f64,
    pub sample_rate: f64,
    /// Peak amplitude of uniform additive noise, in ADC counts.
    pub noise: f64,
}

/// Synthetic mains waveform as seen through a biased single-ended ADC.
///
/// Both channels sit on a mid-scale bias and are scaled with the inverse of
/// the calibration ratios, so a calibrated reader recovers `vrms`/`irms`.
/// The current channel is converted `phase_correction - 1` sample periods
/// after the voltage channel, mimicking multiplexer skew.
pub struct SimulatedMains {
    profile: MainsProfile,
    v_peak_counts: f64,
    i_peak_counts: f64,
    bias: f64,
    max_count: f64,
    step: f64,
    skew: f64,
    phase: f64,
    rng: StdRng,
}

impl SimulatedMains {
    pub fn new(profile: MainsProfile, calibration: &Calibration) -> Self {
        Self::with_rng(profile, calibration, StdRng::from_entropy())
    }

    pub fn seeded(profile: MainsProfile, calibration: &Calibration, seed: u64) -> Self {
        Self::with_rng(profile, calibration, StdRng::seed_from_u64(seed))
    }

    fn with_rng(profile: MainsProfile, calibration: &Calibration, rng: StdRng) -> Self {
        let counts = calibration.adc_counts();
        Self {
            profile,
            v_peak_counts: profile.vrms * SQRT_2 / calibration.volts_per_count(),
            i_peak_counts: profile.irms * SQRT_2 / calibration.amps_per_count(),
            bias: counts / 2.0,
            max_count: counts - 1.0,
            step: TAU * profile.frequency / profile.sample_rate,
            skew: calibration.phase_correction - 1.0,
            phase: 0.0,
            rng,
        }
    }

    fn to_counts(&mut self, value: f64) -> i32 {
        let noise = if self.profile.noise > 0.0 {
            self.rng.gen_range(-self.profile.noise..=self.profile.noise)
        } else {
            0.0
        };
        (self.bias + value + noise).round().clamp(0.0, self.max_count) as i32
    }
}

impl AdcSource for SimulatedMains {
    fn read(&mut self) -> Result<RawSample> {
        let lag = self.profile.phase_deg.to_radians();
        let v = self.v_peak_counts * self.phase.sin();
        let i = self.i_peak_counts * (self.phase + self.skew * self.step - lag).sin();
        self.phase = (self.phase + self.step) % TAU;

        Ok(RawSample {
            voltage: self.to_counts(v),
            current: self.to_counts(i),
        })
    }
}
