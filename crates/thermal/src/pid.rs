//! A PID (Proportional-Integral-Derivative) controller.

use num_traits::{Float, Signed};

/// A PID controller for regulating a system.
///
/// The integral term is bounded by an explicit `error_accumulation_cap`
/// rather than being derived from `output_max / ki`, so a loop can be
/// retuned without the anti-windup behavior silently shifting.
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Pid<F: Float + Signed> {
    /// Proportional gain.
    pub kp: F,
    /// Integral gain.
    pub ki: F,
    /// Derivative gain.
    pub kd: F,

    /// The target value for the system.
    pub setpoint: F,

    /// The lower bound of the controller's output.
    pub output_min: F,
    /// The upper bound of the controller's output.
    pub output_max: F,

    /// Maximum magnitude the accumulated integral may reach.
    error_accumulation_cap: F,

    // Internal state
    integral: F,
    last_error: F,
}

impl<F: Float + Signed> Pid<F> {
    /// Creates a new PID controller with an unbounded integral term.
    pub fn new(kp: F, ki: F, kd: F, setpoint: F, output_min: F, output_max: F) -> Self {
        Self {
            kp,
            ki,
            kd,
            setpoint,
            output_min,
            output_max,
            error_accumulation_cap: F::infinity(),
            integral: F::zero(),
            last_error: F::zero(),
        }
    }

    /// Sets the cap on the magnitude of the accumulated integral term.
    pub fn set_error_accumulation_cap(&mut self, cap: F) {
        self.error_accumulation_cap = cap.abs();
    }

    /// Updates the PID controller with a new measurement.
    ///
    /// `dt` is the time delta since the last update, in seconds. A
    /// nonpositive `dt` suppresses the derivative term for this step
    /// (there is no well-defined rate of change) but the integral and
    /// proportional terms still update normally.
    pub fn update(&mut self, measured: F, dt: F) -> F {
        let error = self.setpoint - measured;

        let p_term = self.kp * error;

        self.integral = self.integral + error * dt;
        let cap = self.error_accumulation_cap;
        self.integral = self.integral.max(-cap).min(cap);
        let i_term = self.ki * self.integral;

        let derivative = if dt > F::zero() {
            (error - self.last_error) / dt
        } else {
            F::zero()
        };
        let d_term = self.kd * derivative;

        self.last_error = error;

        let raw = p_term + i_term + d_term;
        raw.max(self.output_min).min(self.output_max)
    }

    /// Resets the internal state of the PID controller.
    pub fn reset(&mut self) {
        self.integral = F::zero();
        self.last_error = F::zero();
    }
}
