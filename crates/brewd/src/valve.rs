//! Three-state valve control driven by a float switch.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;
use power_arbiter::{CurrentLimiter, Switch};
use serde::Serialize;

const TICK_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ValveMode {
    Off,
    On,
    Float,
}

impl ValveMode {
    fn to_u8(self) -> u8 {
        match self {
            ValveMode::Off => 0,
            ValveMode::On => 1,
            ValveMode::Float => 2,
        }
    }

    fn from_u8(v: u8) -> Self {
        match v {
            1 => ValveMode::On,
            2 => ValveMode::Float,
            _ => ValveMode::Off,
        }
    }
}

/// Drives a valve pin through the limiter based on an operating mode,
/// reading a float switch input to decide the `Float` mode's output.
pub struct ValveController {
    limiter: Arc<CurrentLimiter>,
    valve_pin: u32,
    float_switch: Arc<dyn Switch>,
    mode: AtomicU8,
    running: Arc<AtomicBool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl ValveController {
    pub fn new(limiter: Arc<CurrentLimiter>, valve_pin: u32, float_switch: Arc<dyn Switch>) -> Self {
        Self {
            limiter,
            valve_pin,
            float_switch,
            mode: AtomicU8::new(ValveMode::Off.to_u8()),
            running: Arc::new(AtomicBool::new(false)),
            handle: Mutex::new(None),
        }
    }

    pub fn mode(&self) -> ValveMode {
        ValveMode::from_u8(self.mode.load(Ordering::SeqCst))
    }

    /// Sets the operating mode. Takes effect on the controller's next tick.
    pub fn set_mode(&self, mode: ValveMode) {
        self.mode.store(mode.to_u8(), Ordering::SeqCst);
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
                .name("valve-controller".into())
                .spawn(move || this.run())
                .expect("failed to spawn valve controller worker"),
        );
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.lock().take() {
            let _ = handle.join();
        }
    }

    fn run(self: Arc<Self>) {
        // Debounce buffer: the last two float readings observed.
        let mut history: [bool; 2] = [false, false];
        let mut have_history = 0u8;

        while self.running.load(Ordering::SeqCst) {
            match self.mode() {
                ValveMode::Off => {
                    if let Err(e) = self.limiter.disable_pin(self.valve_pin) {
                        tracing::warn!(pin = self.valve_pin, error = %e, "valve: failed to disable");
                    }
                }
                ValveMode::On => {
                    if let Err(e) = self.limiter.enable_pin(self.valve_pin) {
                        tracing::warn!(pin = self.valve_pin, error = %e, "valve: failed to enable");
                    }
                }
                ValveMode::Float => {
                    let reading = self.float_switch.get_state().unwrap_or(false);
                    history[0] = history[1];
                    history[1] = reading;
                    have_history = (have_history + 1).min(2);

                    if have_history == 2 && history[0] == history[1] {
                        let result = if history[1] {
                            self.limiter.enable_pin(self.valve_pin)
                        } else {
                            self.limiter.disable_pin(self.valve_pin)
                        };
                        if let Err(e) = result {
                            tracing::warn!(pin = self.valve_pin, error = %e, "valve: failed to apply float reading");
                        }
                    }
                }
            }

            thread::sleep(TICK_INTERVAL);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool as StdAtomicBool;

    struct FakeSwitch {
        state: StdAtomicBool,
        readable: StdAtomicBool,
    }

    impl Switch for FakeSwitch {
        fn set_state(&self, state: bool) -> Result<(), power_arbiter::SwitchError> {
            self.state.store(state, Ordering::SeqCst);
            Ok(())
        }

        fn get_state(&self) -> Option<bool> {
            if self.readable.load(Ordering::SeqCst) {
                Some(self.state.load(Ordering::SeqCst))
            } else {
                None
            }
        }
    }

    #[test]
    fn mode_change_is_observed() {
        let limiter = Arc::new(CurrentLimiter::new(700.0, 35000.0));
        let switch: Arc<dyn Switch> = Arc::new(FakeSwitch {
            state: StdAtomicBool::new(false),
            readable: StdAtomicBool::new(false),
        });
        let controller = ValveController::new(limiter, 22, switch);
        assert_eq!(controller.mode(), ValveMode::Off);
        controller.set_mode(ValveMode::On);
        assert_eq!(controller.mode(), ValveMode::On);
    }
}
