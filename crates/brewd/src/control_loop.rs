//! Wires a temperature probe's readings through a PID controller into a
//! heater pin's PWM duty on the current limiter.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use power_arbiter::CurrentLimiter;
use thermal::Pid;

use crate::temperature::TemperatureManager;

const TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Drives one heater pin from one temperature probe via a PID controller.
pub struct PidLoop {
    temperature_manager: Arc<TemperatureManager>,
    probe_id: String,
    limiter: Arc<CurrentLimiter>,
    heater_pin: u32,
    pid: Mutex<Pid<f64>>,
    running: Arc<AtomicBool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl PidLoop {
    pub fn new(
        temperature_manager: Arc<TemperatureManager>,
        probe_id: impl Into<String>,
        limiter: Arc<CurrentLimiter>,
        heater_pin: u32,
        pid: Pid<f64>,
    ) -> Self {
        Self {
            temperature_manager,
            probe_id: probe_id.into(),
            limiter,
            heater_pin,
            pid: Mutex::new(pid),
            running: Arc::new(AtomicBool::new(false)),
            handle: Mutex::new(None),
        }
    }

    pub fn start(self: &Arc<Self>) {
        let mut handle = self.handle.lock();
        if handle.is_some() {
            return;
        }
        self.running.store(true, Ordering::SeqCst);
        let this = self.clone();
        *handle = Some(
            thread::Builder::new()
                .name(format!("pid-{}", this.probe_id))
                .spawn(move || this.run())
                .expect("failed to spawn pid loop worker"),
        );
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.lock().take() {
            let _ = handle.join();
        }
    }

    fn run(self: Arc<Self>) {
        let mut last_tick = Instant::now();

        while self.running.load(Ordering::SeqCst) {
            thread::sleep(TICK_INTERVAL);
            let now = Instant::now();
            let dt = now.duration_since(last_tick).as_secs_f64();
            last_tick = now;

            let stats = match self.temperature_manager.get_probe_stats(&self.probe_id) {
                Ok(stats) => stats,
                Err(e) => {
                    tracing::warn!(probe = %self.probe_id, error = %e, "pid loop: probe stats unavailable");
                    continue;
                }
            };

            if stats.last_temp < 0 {
                // No reading has ever arrived for this probe yet.
                continue;
            }

            let measured_celsius = stats.last_temp as f64 / 1000.0;
            let output = self.pid.lock().update(measured_celsius, dt);
            let duty = (output / 100.0).max(0.0);

            let Ok(mut config) = self.limiter.get_pin_configuration(self.heater_pin) else {
                tracing::warn!(pin = self.heater_pin, "pid loop: heater pin not configured");
                continue;
            };
            config.pwm_load = duty;
            if let Err(e) = self.limiter.update_pin_configuration(config) {
                tracing::warn!(pin = self.heater_pin, error = %e, "pid loop: failed to push duty");
            }
        }
    }
}
