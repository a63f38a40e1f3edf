//! Robust distance from repeated ultrasonic samples.

use std::time::Duration;

use crate::config::FusionTunables;

/// Speed of sound in dry air at ~20 °C, m/s.
const SPEED_OF_SOUND_M_S: f64 = 343.0;

/// Ultrasonic ranging driver. The pulse timing itself is out of scope.
pub trait RangeSensor {
    /// One ranging attempt in meters. `None` is a timeout (no echo).
    fn sample(&mut self) -> Option<f64>;
}

/// Convert a round-trip echo duration to a one-way distance in meters.
pub fn echo_to_distance_m(echo: Duration) -> f64 {
    echo.as_secs_f64() * SPEED_OF_SOUND_M_S / 2.0
}

/// Sensor that never hears an echo. Used when no ranging hardware is attached.
#[derive(Debug, Default)]
pub struct NoEchoSensor;

impl RangeSensor for NoEchoSensor {
    fn sample(&mut self) -> Option<f64> {
        None
    }
}

/// Median of the samples inside a plausible physical window, `+inf` when none are.
#[derive(Clone, Debug, PartialEq)]
pub struct DistanceFilter {
    samples: usize,
    min_m: f64,
    max_m: f64,
}

impl DistanceFilter {
    pub fn new(samples: usize, min_m: f64, max_m: f64) -> Self {
        Self {
            samples: samples.max(1),
            min_m,
            max_m,
        }
    }

    pub fn from_tunables(tunables: &FusionTunables) -> Self {
        Self::new(
            tunables.range_samples,
            tunables.range_min_m,
            tunables.range_max_m,
        )
    }

    pub fn samples(&self) -> usize {
        self.samples
    }

    /// Take `samples` readings from `sensor` and filter them.
    pub fn measure(&self, sensor: &mut dyn RangeSensor) -> f64 {
        let readings: Vec<Option<f64>> = (0..self.samples).map(|_| sensor.sample()).collect();
        self.filter(&readings)
    }

    pub fn filter(&self, readings: &[Option<f64>]) -> f64 {
        let mut valid: Vec<f64> = readings
            .iter()
            .flatten()
            .copied()
            .filter(|d| d.is_finite() && *d >= self.min_m && *d <= self.max_m)
            .collect();
        if valid.is_empty() {
            return f64::INFINITY;
        }
        valid.sort_by(|a, b| a.total_cmp(b));
        let mid = valid.len() / 2;
        if valid.len() % 2 == 1 {
            valid[mid]
        } else {
            (valid[mid - 1] + valid[mid]) / 2.0
        }
    }
}

impl Default for DistanceFilter {
    fn default() -> Self {
        Self::from_tunables(&FusionTunables::default())
    }
}
