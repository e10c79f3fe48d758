use thiserror::Error;

/// Errors raised by [`crate::temperature::TemperatureManager`]'s public operations.
#[derive(Error, Debug, PartialEq)]
pub enum TemperatureManagerError {
    #[error("unknown probe: {0}")]
    UnknownProbe(String),
}
