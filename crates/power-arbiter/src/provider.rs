//! Capability traits for the GPIO switches the limiter drives.
//!
//! Implementations satisfy these traits without any inheritance hierarchy:
//! a real GPIO relay, a simulated in-memory switch used by tests, and a
//! float-switch input all just need `set_state`/`get_state`.

/// A single binary output (or input) pin.
pub trait Switch: Send + Sync {
    /// Drives the pin high (`true`) or low (`false`). Hardware failures are
    /// logged by the caller and never propagate as a panic.
    fn set_state(&self, state: bool) -> Result<(), SwitchError>;

    /// Reads back the pin's current state, if the underlying hardware
    /// supports it (inputs, and some outputs). Returns `None` when the
    /// pin cannot be read (write-only relay outputs, for instance).
    fn get_state(&self) -> Option<bool> {
        None
    }
}

/// Failure reading or writing a [`Switch`].
#[derive(Debug, thiserror::Error)]
#[error("switch I/O error: {0}")]
pub struct SwitchError(pub String);
