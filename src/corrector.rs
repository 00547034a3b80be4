use crate::analyzer::WaveformStats;
use crate::config::Calibration;
use crate::meter::Measurement;

/// Fixed additive corrections for burden-resistor and ADC-reference bias
/// observed at idle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Offsets {
    pub voltage: f64,
    pub current: f64,
}

impl From<&Calibration> for Offsets {
    fn from(calibration: &Calibration) -> Self {
        Self {
            voltage: calibration.voltage_offset,
            current: calibration.current_offset,
        }
    }
}

/// Apply offsets, clamp below-floor readings to zero and recompute power
/// from the corrected RMS values. The analyzer's real power is not used.
pub fn correct(stats: &WaveformStats, offsets: &Offsets) -> Measurement {
    // f64::max returns the non-NaN operand, so NaN also clamps to zero
    let vrms = (stats.vrms + offsets.voltage).max(0.0);
    let irms = (stats.irms + offsets.current).max(0.0);
    Measurement {
        vrms,
        irms,
        power: vrms * irms,
    }
}
