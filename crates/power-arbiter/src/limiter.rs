//! The current limiter: a priority-and-proportional arbiter that reconciles
//! desired pin states against a global milliamp budget.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;

use crate::error::LimiterError;
use crate::provider::Switch;
use crate::pwm::PwmEngine;

/// Below this, a current or duty quantity is treated as zero. Guards
/// against floating-point noise in the budget comparisons below.
const CURRENT_EPSILON_MA: f64 = 0.001;

/// Caller-supplied policy for a single configured pin.
#[derive(Debug, Clone, Serialize)]
pub struct PinConfiguration {
    pub name: String,
    pub id: String,
    pub pin_number: u32,
    pub milli_amps: f64,
    pub critical: bool,
    pub pwm: bool,
    pub pwm_frequency: f64,
    pub pwm_load: f64,
}

/// The limiter's view of a pin's effective state after arbitration.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct PinState {
    pub pin_number: u32,
    pub desired_state: bool,
    pub overridden: bool,
    pub enabled: bool,
    pub pwm_load: f64,
}

struct PinResources {
    switch: Arc<dyn Switch>,
    pwm: Option<PwmEngine>,
}

struct LimiterInner {
    configs: BTreeMap<u32, PinConfiguration>,
    states: BTreeMap<u32, PinState>,
    resources: BTreeMap<u32, PinResources>,
    id_to_pin: std::collections::HashMap<String, u32>,
}

/// Arbitrates a global current budget across configured pins.
pub struct CurrentLimiter {
    base_milli_amps: f64,
    max_milli_amps: f64,
    inner: Mutex<LimiterInner>,
}

impl CurrentLimiter {
    pub fn new(base_milli_amps: f64, max_milli_amps: f64) -> Self {
        Self {
            base_milli_amps,
            max_milli_amps,
            inner: Mutex::new(LimiterInner {
                configs: BTreeMap::new(),
                states: BTreeMap::new(),
                resources: BTreeMap::new(),
                id_to_pin: std::collections::HashMap::new(),
            }),
        }
    }

    /// Registers a new pin. Fails if `pin_number` is already configured.
    pub fn add_pin_configuration(
        &self,
        config: PinConfiguration,
        switch: Arc<dyn Switch>,
    ) -> Result<(), LimiterError> {
        let mut inner = self.inner.lock();
        if inner.configs.contains_key(&config.pin_number) {
            return Err(LimiterError::DuplicatePin(config.pin_number));
        }

        let pin_number = config.pin_number;
        let pwm = if config.pwm {
            Some(PwmEngine::new(switch.clone(), config.pwm_frequency, config.id.clone()))
        } else {
            None
        };

        inner.id_to_pin.insert(config.id.clone(), pin_number);
        inner.states.insert(
            pin_number,
            PinState {
                pin_number,
                desired_state: false,
                overridden: false,
                enabled: false,
                pwm_load: 0.0,
            },
        );
        inner.resources.insert(pin_number, PinResources { switch, pwm });
        inner.configs.insert(pin_number, config);

        tracing::info!(pin = pin_number, "limiter: registered pin");
        evaluate_configuration(&mut inner, self.base_milli_amps, self.max_milli_amps);
        Ok(())
    }

    pub fn get_pin_configuration(&self, pin_number: u32) -> Result<PinConfiguration, LimiterError> {
        self.inner
            .lock()
            .configs
            .get(&pin_number)
            .cloned()
            .ok_or(LimiterError::NoSuchPin(pin_number))
    }

    /// Replaces a pin's configuration. Rejects an attempt to flip the
    /// `pwm` flag; any other change triggers re-arbitration.
    pub fn update_pin_configuration(&self, config: PinConfiguration) -> Result<(), LimiterError> {
        let mut inner = self.inner.lock();
        let pin_number = config.pin_number;
        let existing = inner
            .configs
            .get(&pin_number)
            .ok_or(LimiterError::NoSuchPin(pin_number))?;
        if existing.pwm != config.pwm {
            return Err(LimiterError::PwmFlagChanged(pin_number));
        }
        inner.configs.insert(pin_number, config);
        evaluate_configuration(&mut inner, self.base_milli_amps, self.max_milli_amps);
        Ok(())
    }

    /// Looks up a pin's number by its stable string id.
    pub fn pin_number_for_id(&self, id: &str) -> Option<u32> {
        self.inner.lock().id_to_pin.get(id).copied()
    }

    pub fn get_pin_state(&self, pin_number: u32) -> Result<PinState, LimiterError> {
        self.inner
            .lock()
            .states
            .get(&pin_number)
            .copied()
            .ok_or(LimiterError::NoSuchPin(pin_number))
    }

    pub fn is_enabled(&self, pin_number: u32) -> Result<bool, LimiterError> {
        self.inner
            .lock()
            .states
            .get(&pin_number)
            .map(|s| s.desired_state)
            .ok_or(LimiterError::NoSuchPin(pin_number))
    }

    pub fn enable_pin(&self, pin_number: u32) -> Result<(), LimiterError> {
        self.set_desired_state(pin_number, true)
    }

    pub fn disable_pin(&self, pin_number: u32) -> Result<(), LimiterError> {
        self.set_desired_state(pin_number, false)
    }

    fn set_desired_state(&self, pin_number: u32, desired: bool) -> Result<(), LimiterError> {
        let mut inner = self.inner.lock();
        let state = inner
            .states
            .get_mut(&pin_number)
            .ok_or(LimiterError::NoSuchPin(pin_number))?;
        if state.desired_state == desired {
            return Ok(());
        }
        state.desired_state = desired;
        evaluate_configuration(&mut inner, self.base_milli_amps, self.max_milli_amps);
        Ok(())
    }

    /// Serializable snapshot of every configured pin's configuration and
    /// effective state, for an out-of-process status surface to serve.
    pub fn snapshot(&self) -> LimiterSnapshot {
        let inner = self.inner.lock();
        let pins = inner
            .configs
            .values()
            .map(|config| PinSnapshot {
                config: config.clone(),
                state: inner.states[&config.pin_number],
            })
            .collect();
        LimiterSnapshot {
            base_milli_amps: self.base_milli_amps,
            max_milli_amps: self.max_milli_amps,
            pins,
        }
    }
}

impl Drop for CurrentLimiter {
    fn drop(&mut self) {
        let inner = self.inner.lock();
        for (pin_number, resources) in inner.resources.iter() {
            if let Some(pwm) = &resources.pwm {
                pwm.stop();
                pwm.join();
            }
            if let Err(e) = resources.switch.set_state(false) {
                tracing::warn!(pin = pin_number, error = %e, "limiter: failed to drive switch low on teardown");
            }
        }
    }
}

fn evaluate_configuration(inner: &mut LimiterInner, base_milli_amps: f64, max_milli_amps: f64) {
    let mut available = (max_milli_amps - base_milli_amps).max(0.0);

    // Phase 1: critical, non-PWM pins. Off-budget pins are driven off
    // immediately; this cannot wait for the apply phase.
    for (pin_number, config) in inner.configs.iter() {
        if !config.critical || config.pwm {
            continue;
        }
        let state = inner.states.get_mut(pin_number).unwrap();
        if !state.desired_state {
            state.enabled = false;
            state.overridden = false;
            state.pwm_load = 0.0;
            continue;
        }
        if available - config.milli_amps > CURRENT_EPSILON_MA {
            state.enabled = true;
            state.overridden = false;
            available -= config.milli_amps;
        } else {
            state.enabled = false;
            state.overridden = true;
            if let Some(res) = inner.resources.get(pin_number) {
                if let Err(e) = res.switch.set_state(false) {
                    tracing::warn!(pin = pin_number, error = %e, "limiter: failed to drive overridden switch low");
                }
            }
        }
    }

    // Phase 2: non-critical PWM pins, proportionally scaled.
    let mut total_desired = 0.0_f64;
    for config in inner.configs.values() {
        if config.critical || !config.pwm {
            continue;
        }
        let state = &inner.states[&config.pin_number];
        if state.desired_state {
            total_desired += config.milli_amps * config.pwm_load;
        }
    }

    let mut budget_scarce = false;
    let ratio = if total_desired < CURRENT_EPSILON_MA {
        0.0
    } else if total_desired <= available + CURRENT_EPSILON_MA {
        1.0
    } else {
        budget_scarce = true;
        available / total_desired
    };

    for config in inner.configs.values() {
        if config.critical || !config.pwm {
            continue;
        }
        let state = inner.states.get_mut(&config.pin_number).unwrap();
        if !state.desired_state {
            state.pwm_load = 0.0;
            state.enabled = false;
            state.overridden = false;
            continue;
        }
        let scaled = config.pwm_load * ratio;
        if budget_scarce && scaled < CURRENT_EPSILON_MA {
            // Scaled to nothing by scarcity: this is genuinely forced off,
            // not just throttled to a lower duty.
            state.pwm_load = 0.0;
            state.enabled = false;
            state.overridden = true;
        } else {
            state.pwm_load = scaled;
            state.enabled = true;
            state.overridden = false;
        }
    }

    // Phase 3: invariant sweep. Every pin not desired on settles at a
    // clean zero, covering the pin classes arbitration above never
    // grants current to (critical PWM, non-critical non-PWM).
    for state in inner.states.values_mut() {
        if !state.desired_state {
            state.enabled = false;
            state.pwm_load = 0.0;
        }
    }

    // Phase 4: apply.
    for (pin_number, config) in inner.configs.iter() {
        let state = inner.states[pin_number];
        let Some(resources) = inner.resources.get(pin_number) else {
            continue;
        };
        if config.pwm {
            if let Some(pwm) = &resources.pwm {
                pwm.set_frequency(config.pwm_frequency);
                pwm.set_load_cycle(state.pwm_load);
                pwm.unpause();
            }
        } else if state.enabled {
            if let Err(e) = resources.switch.set_state(true) {
                tracing::warn!(pin = pin_number, error = %e, "limiter: failed to drive switch high");
            }
        }
    }
}

/// Serializable snapshot of a single pin's configuration and effective state.
#[derive(Debug, Clone, Serialize)]
pub struct PinSnapshot {
    pub config: PinConfiguration,
    pub state: PinState,
}

/// Serializable snapshot of the limiter's full observed state.
#[derive(Debug, Clone, Serialize)]
pub struct LimiterSnapshot {
    pub base_milli_amps: f64,
    pub max_milli_amps: f64,
    pub pins: Vec<PinSnapshot>,
}

