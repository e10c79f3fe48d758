//! Software PWM: a dedicated worker thread that cycles a [`Switch`] on and
//! off to approximate a fractional duty cycle on binary GPIO.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;

use crate::provider::Switch;

#[derive(Debug, Clone, Copy)]
struct CycleParams {
    frequency_hz: f64,
    duty: f64,
    paused: bool,
}

impl Default for CycleParams {
    fn default() -> Self {
        Self {
            frequency_hz: 1.0,
            duty: 0.0,
            paused: true,
        }
    }
}

/// Drives a single [`Switch`] with a software-generated PWM waveform.
///
/// The worker thread recomputes its on/off split at every cycle boundary,
/// so `set_frequency`/`set_load_cycle` changes take effect on the next
/// cycle rather than immediately.
pub struct PwmEngine {
    params: Arc<Mutex<CycleParams>>,
    running: Arc<AtomicBool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl PwmEngine {
    /// Spawns the worker thread, paused, at `frequency_hz` with duty 0.
    pub fn new(switch: Arc<dyn Switch>, frequency_hz: f64, pin_id: String) -> Self {
        let params = Arc::new(Mutex::new(CycleParams {
            frequency_hz: frequency_hz.max(0.001),
            duty: 0.0,
            paused: true,
        }));
        let running = Arc::new(AtomicBool::new(true));

        let worker_params = params.clone();
        let worker_running = running.clone();
        let handle = thread::Builder::new()
            .name(format!("pwm-{pin_id}"))
            .spawn(move || run_worker(switch, worker_params, worker_running, pin_id))
            .expect("failed to spawn pwm worker thread");

        Self {
            params,
            running,
            handle: Mutex::new(Some(handle)),
        }
    }

    pub fn set_frequency(&self, hz: f64) {
        self.params.lock().frequency_hz = hz.max(0.001);
    }

    pub fn set_load_cycle(&self, duty: f64) {
        self.params.lock().duty = duty.clamp(0.0, 1.0);
    }

    pub fn unpause(&self) {
        self.params.lock().paused = false;
    }

    pub fn pause(&self) {
        self.params.lock().paused = true;
    }

    /// Signals the worker to stop. Idempotent.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Waits for the worker to exit. Idempotent: calling it again, or
    /// after the worker has already been joined, is a no-op.
    pub fn join(&self) {
        if let Some(handle) = self.handle.lock().take() {
            let _ = handle.join();
        }
    }
}

impl Drop for PwmEngine {
    fn drop(&mut self) {
        self.stop();
        self.join();
    }
}

fn run_worker(
    switch: Arc<dyn Switch>,
    params: Arc<Mutex<CycleParams>>,
    running: Arc<AtomicBool>,
    pin_id: String,
) {
    while running.load(Ordering::SeqCst) {
        let (period, duty, paused) = {
            let p = params.lock();
            (Duration::from_secs_f64(1.0 / p.frequency_hz), p.duty, p.paused)
        };

        if paused || duty <= 0.0 {
            if let Err(e) = switch.set_state(false) {
                tracing::warn!(pin = %pin_id, error = %e, "pwm: failed to drive switch low");
            }
            thread::sleep(period.min(Duration::from_millis(50)));
            continue;
        }

        if duty >= 1.0 {
            if let Err(e) = switch.set_state(true) {
                tracing::warn!(pin = %pin_id, error = %e, "pwm: failed to drive switch high");
            }
            thread::sleep(period.min(Duration::from_millis(50)));
            continue;
        }

        let on_time = period.mul_f64(duty);
        let off_time = period.saturating_sub(on_time);

        if let Err(e) = switch.set_state(true) {
            tracing::warn!(pin = %pin_id, error = %e, "pwm: failed to drive switch high");
        }
        thread::sleep(on_time);

        if !running.load(Ordering::SeqCst) {
            break;
        }
        if params.lock().paused {
            continue;
        }

        if let Err(e) = switch.set_state(false) {
            tracing::warn!(pin = %pin_id, error = %e, "pwm: failed to drive switch low");
        }
        thread::sleep(off_time);
    }

    if let Err(e) = switch.set_state(false) {
        tracing::warn!(pin = %pin_id, error = %e, "pwm: failed final drive-low on exit");
    }
}
