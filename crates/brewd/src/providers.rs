//! Concrete [`Switch`] and [`TemperatureSensorProvider`] implementations:
//! real GPIO relays and 1-wire probes, plus in-memory fakes for
//! `--simulate` runs and tests.

use std::collections::BTreeSet;
use std::fs;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use power_arbiter::{Switch, SwitchError};

use crate::sensor::{SensorError, TemperatureSensor, TemperatureSensorProvider};

/// Drives a real GPIO output pin via `rppal`.
pub struct GpioSwitch {
    pin: Mutex<rppal::gpio::OutputPin>,
}

impl GpioSwitch {
    pub fn new(gpio: &rppal::gpio::Gpio, pin_number: u8) -> Result<Self, rppal::gpio::Error> {
        let pin = gpio.get(pin_number)?.into_output();
        Ok(Self { pin: Mutex::new(pin) })
    }
}

impl Switch for GpioSwitch {
    fn set_state(&self, state: bool) -> Result<(), SwitchError> {
        let mut pin = self.pin.lock();
        if state {
            pin.set_high();
        } else {
            pin.set_low();
        }
        Ok(())
    }
}

/// Reads a float switch (or other binary input) via `rppal`.
pub struct GpioInput {
    pin: Mutex<rppal::gpio::InputPin>,
}

impl GpioInput {
    pub fn new(gpio: &rppal::gpio::Gpio, pin_number: u8) -> Result<Self, rppal::gpio::Error> {
        let pin = gpio.get(pin_number)?.into_input_pullup();
        Ok(Self { pin: Mutex::new(pin) })
    }
}

impl Switch for GpioInput {
    fn set_state(&self, _state: bool) -> Result<(), SwitchError> {
        Err(SwitchError("input pin is read-only".into()))
    }

    fn get_state(&self) -> Option<bool> {
        Some(self.pin.lock().is_high())
    }
}

/// An in-memory [`Switch`] used for `--simulate` runs and tests.
pub struct SimulatedSwitch {
    state: AtomicBool,
}

impl SimulatedSwitch {
    pub fn new() -> Arc<Self> {
        Arc::new(Self { state: AtomicBool::new(false) })
    }
}

impl Switch for SimulatedSwitch {
    fn set_state(&self, state: bool) -> Result<(), SwitchError> {
        self.state.store(state, Ordering::SeqCst);
        Ok(())
    }

    fn get_state(&self) -> Option<bool> {
        Some(self.state.load(Ordering::SeqCst))
    }
}

/// Reads DS18B20-style 1-wire probes off the Linux `w1` sysfs tree.
///
/// There is no ecosystem crate for the `w1` sysfs protocol, so this
/// talks to `/sys/bus/w1/devices` directly, the same way the original
/// OWFS-based implementation walked the bus.
pub struct OneWireSensorProvider {
    manager_id: String,
    base_path: std::path::PathBuf,
}

impl OneWireSensorProvider {
    pub fn new(manager_id: impl Into<String>) -> Self {
        Self {
            manager_id: manager_id.into(),
            base_path: std::path::PathBuf::from("/sys/bus/w1/devices"),
        }
    }
}

impl TemperatureSensorProvider for OneWireSensorProvider {
    fn list_temperature_sensors(&self) -> Result<BTreeSet<(String, String)>, SensorError> {
        let entries = fs::read_dir(&self.base_path)
            .map_err(|e| SensorError(format!("reading {}: {e}", self.base_path.display())))?;

        let mut sensors = BTreeSet::new();
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with("28-") {
                sensors.insert((self.manager_id.clone(), name));
            }
        }
        Ok(sensors)
    }

    fn get_temperature_sensor(
        &self,
        manager_id: &str,
        sensor_id: &str,
    ) -> Option<Box<dyn TemperatureSensor>> {
        if manager_id != self.manager_id {
            return None;
        }
        Some(Box::new(OneWireSensor {
            path: self.base_path.join(sensor_id).join("w1_slave"),
        }))
    }
}

struct OneWireSensor {
    path: std::path::PathBuf,
}

impl TemperatureSensor for OneWireSensor {
    fn get_temperature(&self) -> Result<(i64, u64), SensorError> {
        let contents = fs::read_to_string(&self.path)
            .map_err(|e| SensorError(format!("reading {}: {e}", self.path.display())))?;

        let mut lines = contents.lines();
        let crc_line = lines
            .next()
            .ok_or_else(|| SensorError("w1_slave: empty file".into()))?;
        if !crc_line.trim_end().ends_with("YES") {
            return Err(SensorError("w1_slave: CRC check failed".into()));
        }

        let data_line = lines
            .next()
            .ok_or_else(|| SensorError("w1_slave: missing data line".into()))?;
        let milli_celsius = data_line
            .rsplit("t=")
            .next()
            .and_then(|s| s.trim().parse::<i64>().ok())
            .ok_or_else(|| SensorError("w1_slave: missing t= field".into()))?;

        let now_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);

        Ok((milli_celsius, now_ms))
    }
}

/// A handful of fixed, slowly varying sensors used for `--simulate` runs.
pub struct SimulatedSensorProvider {
    manager_id: String,
    sensor_ids: Vec<String>,
}

impl SimulatedSensorProvider {
    pub fn new(manager_id: impl Into<String>, sensor_ids: Vec<String>) -> Self {
        Self { manager_id: manager_id.into(), sensor_ids }
    }
}

impl TemperatureSensorProvider for SimulatedSensorProvider {
    fn list_temperature_sensors(&self) -> Result<BTreeSet<(String, String)>, SensorError> {
        Ok(self
            .sensor_ids
            .iter()
            .map(|id| (self.manager_id.clone(), id.clone()))
            .collect())
    }

    fn get_temperature_sensor(
        &self,
        manager_id: &str,
        sensor_id: &str,
    ) -> Option<Box<dyn TemperatureSensor>> {
        if manager_id != self.manager_id || !self.sensor_ids.contains(&sensor_id.to_string()) {
            return None;
        }
        Some(Box::new(SimulatedSensor))
    }
}

struct SimulatedSensor;

impl TemperatureSensor for SimulatedSensor {
    fn get_temperature(&self) -> Result<(i64, u64), SensorError> {
        let now_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        Ok((20_000, now_ms))
    }
}
