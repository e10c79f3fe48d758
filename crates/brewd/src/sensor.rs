//! Capability traits for temperature sensing and timekeeping.
//!
//! Mirrors [`power_arbiter::Switch`]'s shape: a narrow trait an
//! implementation can satisfy without inheriting from anything.

use std::collections::BTreeSet;

/// Failure reading a sensor or enumerating the sensor bus.
#[derive(Debug, thiserror::Error)]
#[error("sensor I/O error: {0}")]
pub struct SensorError(pub String);

/// A single temperature probe.
pub trait TemperatureSensor: Send + Sync {
    /// Returns `(milli_celsius, timestamp_ms)` for the current reading.
    fn get_temperature(&self) -> Result<(i64, u64), SensorError>;
}

/// Discovers probes and hands out handles to them.
pub trait TemperatureSensorProvider: Send + Sync {
    /// Enumerates `(manager_id, sensor_id)` pairs currently visible on the bus.
    fn list_temperature_sensors(&self) -> Result<BTreeSet<(String, String)>, SensorError>;

    /// Returns a handle to a previously-discovered sensor, if it still exists.
    fn get_temperature_sensor(
        &self,
        manager_id: &str,
        sensor_id: &str,
    ) -> Option<Box<dyn TemperatureSensor>>;
}

/// Monotonic timekeeping, abstracted so tests can control the clock.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> u64;
}

/// The real clock, backed by [`std::time::Instant`].
pub struct SystemClock {
    start: std::time::Instant,
}

impl Default for SystemClock {
    fn default() -> Self {
        Self { start: std::time::Instant::now() }
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }
}
