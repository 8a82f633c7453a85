//! Error types and handling for pvwallbox
//!
//! Device failures are split into link-level problems (`DeviceUnreachable`,
//! `Timeout`) and per-request refusals (`CommandRejected`) so the control loop
//! can decide between retrying the whole cycle and leaving a single device as
//! it was.

use thiserror::Error;

/// Result type alias for pvwallbox operations
pub type Result<T> = std::result::Result<T, PvWallboxError>;

/// Main error type for pvwallbox
#[derive(Debug, Error)]
pub enum PvWallboxError {
    /// Configuration-related errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Modbus protocol errors not attributable to a specific device
    #[error("Modbus error: {message}")]
    Modbus { message: String },

    /// Communication with a device could not be established
    #[error("Device unreachable: {message}")]
    DeviceUnreachable { message: String },

    /// The link is up but a specific read or write was refused
    #[error("Command rejected: {message}")]
    CommandRejected { message: String },

    /// Timeout errors
    #[error("Timeout error: {message}")]
    Timeout { message: String },

    /// Validation errors
    #[error("Validation error: {field} - {message}")]
    Validation { field: String, message: String },

    /// File I/O errors
    #[error("I/O error: {message}")]
    Io { message: String },

    /// Serialization/deserialization errors
    #[error("Serialization error: {message}")]
    Serialization { message: String },

    /// Network-related errors (telemetry backends)
    #[error("Network error: {message}")]
    Network { message: String },

    /// Telemetry persistence errors
    #[error("Persistence error: {message}")]
    Persistence { message: String },

    /// Generic errors with context
    #[error("Error: {message}")]
    Generic { message: String },
}

impl PvWallboxError {
    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a new Modbus error
    pub fn modbus<S: Into<String>>(message: S) -> Self {
        Self::Modbus {
            message: message.into(),
        }
    }

    /// Create a new device-unreachable error
    pub fn unreachable<S: Into<String>>(message: S) -> Self {
        Self::DeviceUnreachable {
            message: message.into(),
        }
    }

    /// Create a new command-rejected error
    pub fn rejected<S: Into<String>>(message: S) -> Self {
        Self::CommandRejected {
            message: message.into(),
        }
    }

    /// Create a new timeout error
    pub fn timeout<S: Into<String>>(message: S) -> Self {
        Self::Timeout {
            message: message.into(),
        }
    }

    /// Create a new validation error
    pub fn validation<F: Into<String>, M: Into<String>>(field: F, message: M) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create a new I/O error
    pub fn io<S: Into<String>>(message: S) -> Self {
        Self::Io {
            message: message.into(),
        }
    }

    /// Create a new network error
    pub fn network<S: Into<String>>(message: S) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    /// Create a new persistence error
    pub fn persistence<S: Into<String>>(message: S) -> Self {
        Self::Persistence {
            message: message.into(),
        }
    }

    /// Create a new generic error
    pub fn generic<S: Into<String>>(message: S) -> Self {
        Self::Generic {
            message: message.into(),
        }
    }

    /// Whether the error means the device link itself is down
    pub fn is_connection_error(&self) -> bool {
        matches!(self, Self::DeviceUnreachable { .. } | Self::Timeout { .. })
    }
}

impl From<std::io::Error> for PvWallboxError {
    fn from(err: std::io::Error) -> Self {
        Self::io(err.to_string())
    }
}

impl From<serde_yaml::Error> for PvWallboxError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Serialization {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for PvWallboxError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization {
            message: err.to_string(),
        }
    }
}

#[cfg(feature = "influx")]
impl From<reqwest::Error> for PvWallboxError {
    fn from(err: reqwest::Error) -> Self {
        Self::network(err.to_string())
    }
}
