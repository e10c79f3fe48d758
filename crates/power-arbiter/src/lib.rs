//! # Power Arbiter
//!
//! Priority-and-proportional current budget arbitration for the brewing
//! rig's relays, plus the software PWM engine used to drive fractional
//! loads on otherwise binary GPIO.
//!
//! The [`CurrentLimiter`] owns every managed pin's [`Switch`] handle and
//! is the sole writer to it; callers request on/off via `enable_pin` /
//! `disable_pin` and read back the arbitrated result via `get_pin_state`.

pub mod error;
pub mod limiter;
pub mod provider;
pub mod pwm;

pub use error::LimiterError;
pub use limiter::{CurrentLimiter, LimiterSnapshot, PinConfiguration, PinSnapshot, PinState};
pub use provider::{Switch, SwitchError};
pub use pwm::PwmEngine;
