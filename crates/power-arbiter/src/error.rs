use thiserror::Error;

/// Errors raised by [`crate::limiter::CurrentLimiter`]'s public operations.
#[derive(Error, Debug, PartialEq)]
pub enum LimiterError {
    #[error("pin {0} is already configured")]
    DuplicatePin(u32),

    #[error("no such pin: {0}")]
    NoSuchPin(u32),

    #[error("pin {0}: the pwm flag cannot change after registration")]
    PwmFlagChanged(u32),
}
