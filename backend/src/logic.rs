use crate::model::{AccidentEvent, AccidentKind, SensorKind, SensorSample};
use log::{debug, info};
use std::collections::VecDeque;

/// Tunable constants of the threshold classifier.
#[derive(Debug, Clone, PartialEq)]
pub struct Thresholds {
    /// Below this smoothed acceleration (m/s²) nothing is evaluated.
    pub accel_noise_floor: f64,
    /// Below this angular velocity (rad/s) nothing is evaluated.
    pub gyro_noise_floor: f64,
    pub medium_accel: f64,
    pub high_accel: f64,
    pub rollover_gyro: f64,
    pub required_samples: u32,
    pub window: usize,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            accel_noise_floor: 10.0,
            gyro_noise_floor: 0.3,
            medium_accel: 15.0,
            high_accel: 20.0,
            rollover_gyro: 3.0,
            required_samples: 2,
            window: 5,
        }
    }
}

/// Turns interleaved accelerometer and gyroscope samples into at most one
/// [`AccidentEvent`] per latch cycle.
pub struct MotionClassifier {
    thresholds: Thresholds,
    window: VecDeque<f64>,
    consecutive_high: u32,
    latched: bool,
    // Latest gyroscope vector magnitude; None until the sensor reports.
    gyro_magnitude: Option<f64>,
    last_accel_ts: Option<i64>,
    last_gyro_ts: Option<i64>,
}

impl MotionClassifier {
    pub fn new(thresholds: Thresholds) -> Self {
        let capacity = thresholds.window.max(1);
        Self {
            thresholds,
            window: VecDeque::with_capacity(capacity + 1),
            consecutive_high: 0,
            latched: false,
            gyro_magnitude: None,
            last_accel_ts: None,
            last_gyro_ts: None,
        }
    }

    pub fn is_latched(&self) -> bool {
        self.latched
    }

    pub fn consecutive_high(&self) -> u32 {
        self.consecutive_high
    }

    /// Clears the window, the hysteresis counter and the latch.
    /// The last gyroscope reading survives: it is sensor state, not episode state.
    pub fn reset(&mut self) {
        self.window.clear();
        self.consecutive_high = 0;
        self.latched = false;
        debug!("classifier reset");
    }

    pub fn observe(&mut self, sample: &SensorSample) -> Option<AccidentEvent> {
        let last_ts = match sample.kind {
            SensorKind::Accelerometer => &mut self.last_accel_ts,
            SensorKind::Gyroscope => &mut self.last_gyro_ts,
        };
        if matches!(*last_ts, Some(prev) if sample.timestamp < prev) {
            debug!(
                "dropping out-of-order {:?} sample at t={}",
                sample.kind, sample.timestamp
            );
            return None;
        }
        *last_ts = Some(sample.timestamp);

        match sample.kind {
            SensorKind::Gyroscope => {
                self.gyro_magnitude = Some(sample.magnitude());
                None
            }
            SensorKind::Accelerometer => self.on_acceleration(sample),
        }
    }

    fn on_acceleration(&mut self, sample: &SensorSample) -> Option<AccidentEvent> {
        let t = &self.thresholds;
        let accel_mag = sample.magnitude();

        // Smoothing window (FIFO)
        self.window.push_back(accel_mag);
        while self.window.len() > t.window.max(1) {
            self.window.pop_front();
        }
        let avg_accel = mean(&self.window)?;

        // Noise floors leave the hysteresis counter untouched.
        // A gyroscope that never reported only rules out rollover.
        if avg_accel < t.accel_noise_floor {
            return None;
        }
        let gyro_mag = match self.gyro_magnitude {
            Some(mag) if mag < t.gyro_noise_floor => return None,
            Some(mag) => mag,
            None => 0.0,
        };

        if avg_accel > t.medium_accel {
            self.consecutive_high += 1;
        } else {
            self.consecutive_high = 0;
        }

        let sustained = self.consecutive_high >= t.required_samples;
        let high_impact = avg_accel > t.high_accel && sustained;
        let rollover = gyro_mag > t.rollover_gyro && sustained;

        if self.latched {
            return None;
        }

        let kind = if high_impact {
            AccidentKind::HighImpact
        } else if rollover {
            AccidentKind::Rollover
        } else {
            return None;
        };

        self.latched = true;
        info!(
            "accident detected: {:?} (avg accel {:.2}, gyro {:.2}, run {})",
            kind, avg_accel, gyro_mag, self.consecutive_high
        );
        Some(AccidentEvent {
            kind,
            at_time: sample.timestamp,
        })
    }
}

fn mean(window: &VecDeque<f64>) -> Option<f64> {
    if window.is_empty() {
        return None;
    }
    Some(window.iter().sum::<f64>() / window.len() as f64)
}
