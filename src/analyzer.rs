use crate::reader::CalibratedWindow;

/// RMS and power figures reduced from one observation window.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct WaveformStats {
    pub vrms: f64,
    pub irms: f64,
    /// Mean instantaneous V×I (W); correct for non-unity power factor.
    pub real_power: f64,
    /// Vrms × Irms (VA)
    pub apparent_power: f64,
    pub power_factor: f64,
    pub samples: usize,
}

/// Reduce synchronized voltage and current samples to RMS values and real
/// power by accumulating squares and cross products, then averaging.
pub fn analyze(window: &CalibratedWindow) -> WaveformStats {
    let mut sum_v = 0.0;
    let mut sum_i = 0.0;
    let mut sum_p = 0.0;
    let mut samples = 0usize;

    for (&v, &i) in window.voltage.iter().zip(&window.current) {
        sum_v += v * v;
        sum_i += i * i;
        sum_p += v * i;
        samples += 1;
    }

    if samples == 0 {
        return WaveformStats::default();
    }

    let n = samples as f64;
    let vrms = (sum_v / n).sqrt();
    let irms = (sum_i / n).sqrt();
    let real_power = sum_p / n;
    let apparent_power = vrms * irms;

    WaveformStats {
        vrms,
        irms,
        real_power,
        apparent_power,
        power_factor: power_factor(real_power, apparent_power),
        samples,
    }
}

fn power_factor(real_power: f64, apparent_power: f64) -> f64 {
    if apparent_power > 0.0 {
        (real_power / apparent_power).clamp(-1.0, 1.0)
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::{PI, SQRT_2, TAU};

    fn sine_window(vrms: f64, irms: f64, lag: f64, samples: usize, per_cycle: usize) -> CalibratedWindow {
        let mut window = CalibratedWindow::default();
        for k in 0..samples {
            let theta = TAU * k as f64 / per_cycle as f64;
            window.voltage.push(vrms * SQRT_2 * theta.sin());
            window.current.push(irms * SQRT_2 * (theta - lag).sin());
        }
        window
    }

    #[test]
    fn empty_window_is_all_zero() {
        assert_eq!(analyze(&CalibratedWindow::default()), WaveformStats::default());
    }

    #[test]
    fn resistive_load() {
        let stats = analyze(&sine_window(230.0, 5.0, 0.0, 200, 100));
        assert_eq!(stats.samples, 200);
        assert!((stats.vrms - 230.0).abs() < 1e-6);
        assert!((stats.irms - 5.0).abs() < 1e-6);
        assert!((stats.real_power - 1150.0).abs() < 1e-6);
        assert!((stats.power_factor - 1.0).abs() < 1e-9);
    }

    #[test]
    fn reactive_load_has_reduced_real_power() {
        let stats = analyze(&sine_window(230.0, 5.0, PI / 3.0, 200, 100));
        // cos(60°) = 0.5
        assert!((stats.real_power - 575.0).abs() < 1e-6);
        assert!((stats.apparent_power - 1150.0).abs() < 1e-6);
        assert!((stats.power_factor - 0.5).abs() < 1e-9);
    }

    #[test]
    fn quadrature_load_has_no_real_power() {
        let stats = analyze(&sine_window(230.0, 5.0, PI / 2.0, 200, 100));
        assert!(stats.real_power.abs() < 1e-6);
    }

    #[test]
    fn mismatched_lengths_use_shorter_channel() {
        let window = CalibratedWindow {
            voltage: vec![2.0, -2.0, 2.0],
            current: vec![1.0, -1.0],
            ..Default::default()
        };
        let stats = analyze(&window);
        assert_eq!(stats.samples, 2);
        assert_eq!(stats.vrms, 2.0);
        assert_eq!(stats.irms, 1.0);
        assert_eq!(stats.real_power, 2.0);
    }
}
