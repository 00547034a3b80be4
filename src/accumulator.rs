use std::sync::{Mutex, PoisonError};
use std::time::Instant;

const MS_PER_HOUR: f64 = 3_600_000.0;
const W_PER_KW: f64 = 1000.0;

/// Millisecond time source for energy integration. Must not go backwards.
pub trait Clock: Send + Sync {
    fn now_millis(&self) -> u64;
}

/// Monotonic milliseconds since the clock was created.
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now_millis(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }
}

#[derive(Debug)]
struct AccumulatorState {
    kwh: f64,
    last_observation_ms: u64,
}

/// Running energy total, integrated from power readings over wall-clock time.
///
/// All mutation goes through [`EnergyAccumulator::observe`], which reads the
/// clock, integrates and advances the timestamp under a single lock, so
/// concurrent measurement cycles never lose an update or count an interval
/// twice. State is in-memory only and starts at zero.
pub struct EnergyAccumulator {
    clock: Box<dyn Clock>,
    state: Mutex<AccumulatorState>,
}

impl EnergyAccumulator {
    pub fn new(clock: Box<dyn Clock>) -> Self {
        let last_observation_ms = clock.now_millis();
        Self {
            clock,
            state: Mutex::new(AccumulatorState {
                kwh: 0.0,
                last_observation_ms,
            }),
        }
    }

    /// Integrate `power_w` over the time since the previous observation
    /// (left-endpoint rule) and return the new total in kWh.
    pub fn observe(&self, power_w: f64) -> f64 {
        // Plain floats cannot be left half-updated, so a poisoned lock is still usable
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let now = self.clock.now_millis();
        let elapsed_hours = now.saturating_sub(state.last_observation_ms) as f64 / MS_PER_HOUR;
        state.last_observation_ms = now;

        let delta = power_w * elapsed_hours / W_PER_KW;
        if delta > 0.0 {
            state.kwh += delta;
        }
        state.kwh
    }

    /// Current total without integrating.
    pub fn kwh(&self) -> f64 {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).kwh
    }
}
