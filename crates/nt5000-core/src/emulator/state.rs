//! Simulated inverter state

use chrono::{DateTime, Local};
use std::sync::{Arc, Mutex};

/// Milliseconds per hour; kW times ms divided by this gives kWh
const MILLIS_PER_HOUR: f64 = 3_600_000.0;

/// Source of wall-clock time for the emulator
pub trait TimeSource: Send {
    /// Current local time
    fn now(&self) -> DateTime<Local>;
}

/// The local system clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTime;

impl TimeSource for SystemTime {
    fn now(&self) -> DateTime<Local> {
        Local::now()
    }
}

/// A clock that only moves when told to; clones share the same time
#[derive(Debug, Clone)]
pub struct ManualTime(Arc<Mutex<DateTime<Local>>>);

impl ManualTime {
    /// Clock standing at `start`
    pub fn new(start: DateTime<Local>) -> Self {
        Self(Arc::new(Mutex::new(start)))
    }

    /// Move the clock forward by `by`
    pub fn advance(&self, by: chrono::Duration) {
        if let Ok(mut now) = self.0.lock() {
            *now += by;
        }
    }
}

impl TimeSource for ManualTime {
    fn now(&self) -> DateTime<Local> {
        match self.0.lock() {
            Ok(now) => *now,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

/// Energy counters of the simulated device, kept for the process lifetime
#[derive(Debug, Clone, PartialEq)]
pub struct EmulatedDeviceState {
    energy_today: f64,
    energy_total: f64,
    last_sample: Option<DateTime<Local>>,
}

impl EmulatedDeviceState {
    /// Fresh counters: nothing today, `energy_total` kWh overall
    pub fn new(energy_total: f64) -> Self {
        Self {
            energy_today: 0.0,
            energy_total,
            last_sample: None,
        }
    }

    /// kWh harvested since the emulator started
    pub fn energy_today(&self) -> f64 {
        self.energy_today
    }

    /// kWh harvested in total
    pub fn energy_total(&self) -> f64 {
        self.energy_total
    }

    /// When the last data request was answered
    pub fn last_sample(&self) -> Option<DateTime<Local>> {
        self.last_sample
    }

    /// Add the energy produced at `power_kw` since the previous sample
    ///
    /// The first sample only sets the baseline. Returns the added kWh.
    pub(crate) fn accumulate(&mut self, power_kw: f64, now: DateTime<Local>) -> f64 {
        let delta = match self.last_sample {
            Some(last) => {
                let millis = (now - last).num_milliseconds().max(0);
                power_kw * millis as f64 / MILLIS_PER_HOUR
            }
            None => 0.0,
        };
        self.energy_today += delta;
        self.energy_total += delta;
        self.last_sample = Some(now);
        delta
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_sample_sets_baseline() {
        let mut state = EmulatedDeviceState::new(500.0);
        let now = Local::now();
        assert_eq!(state.accumulate(3.0, now), 0.0);
        assert_eq!(state.energy_today(), 0.0);
        assert_eq!(state.energy_total(), 500.0);
        assert_eq!(state.last_sample(), Some(now));
    }

    #[test]
    fn test_energy_accumulates_per_hour() {
        let mut state = EmulatedDeviceState::new(0.0);
        let start = Local::now();
        state.accumulate(2.0, start);
        let delta = state.accumulate(2.0, start + chrono::Duration::minutes(30));
        assert!((delta - 1.0).abs() < 1e-12);
        assert!((state.energy_today() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_clock_going_backwards_adds_nothing() {
        let mut state = EmulatedDeviceState::new(10.0);
        let start = Local::now();
        state.accumulate(4.0, start);
        assert_eq!(state.accumulate(4.0, start - chrono::Duration::seconds(5)), 0.0);
        assert_eq!(state.energy_total(), 10.0);
    }

    #[test]
    fn test_manual_time_clones_share_time() {
        let start = Local::now();
        let time = ManualTime::new(start);
        let other = time.clone();
        time.advance(chrono::Duration::seconds(90));
        assert_eq!(other.now(), start + chrono::Duration::seconds(90));
    }
}
