//! Error types for the GPIO boot mode control

use thiserror::Error;

/// Linux GPIO control errors
#[derive(Debug, Error)]
pub enum LinuxGpioError {
    /// Failed to request the control line
    #[error("Failed to request GPIO line {line} on '{path}': {source}")]
    LineRequestFailed {
        path: String,
        line: u32,
        #[source]
        source: gpiocdev::Error,
    },

    /// Failed to get the line value
    #[error("Failed to get GPIO line value: {0}")]
    GetValueFailed(#[source] gpiocdev::Error),

    /// Line was read before it was configured
    #[error("GPIO line not configured")]
    NotConfigured,

    /// Line kept changing for the whole debounce window
    #[error("GPIO line did not settle after {0} samples")]
    Unstable(u32),

    /// Invalid parameter
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Missing required parameter
    #[error("Missing required parameter: {0}")]
    MissingParameter(&'static str),

    /// GPIO chip or device not specified
    #[error("No GPIO chip specified. Use dev=/dev/gpiochipN or gpiochip=N")]
    NoDevice,
}

/// Result type for Linux GPIO control operations
pub type Result<T> = std::result::Result<T, LinuxGpioError>;
