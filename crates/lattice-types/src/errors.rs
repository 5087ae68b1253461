//! Error types for Lattice

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for Lattice operations
#[derive(Debug, Error, Clone, Serialize, Deserialize)]
pub enum LatticeError {
    /// Missing/unparseable configuration or inconsistent configuration values
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Invalid parameters passed across an API boundary
    #[error("Invalid parameter: {message}")]
    InvalidParameter { message: String },

    /// Rank grid or model partition invariant violated
    #[error("Topology error: {message}")]
    Topology { message: String },

    /// Group formation, broadcast, barrier or communicator join failures
    #[error("Communication error: {message}")]
    Communication { message: String },

    /// Device allocation, copy or synchronization errors
    #[error("Device error: {message}")]
    Device { message: String },

    /// Failures inside the decode engine
    #[error("Engine error: {message}")]
    Engine { message: String },

    /// I/O errors
    #[error("I/O error: {message}")]
    IO { message: String },

    /// Serialization/deserialization errors
    #[error("Serialization error: {message}")]
    Serialization { message: String },

    /// Internal errors (should not happen in normal operation)
    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Coarse classification used by the fatal-abort policy and exit codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorClass {
    /// Detected before any collective operation; the run never starts
    Configuration,
    /// Topology or collective failure; the whole process group is unusable
    Communication,
    /// Device or decode engine failure during a pass
    Execution,
    /// Result persistence failure; reported and tolerated
    Io,
}

impl LatticeError {
    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create an invalid parameter error
    pub fn invalid_parameter(message: impl Into<String>) -> Self {
        Self::InvalidParameter {
            message: message.into(),
        }
    }

    /// Create a topology error
    pub fn topology(message: impl Into<String>) -> Self {
        Self::Topology {
            message: message.into(),
        }
    }

    /// Create a communication error
    pub fn communication(message: impl Into<String>) -> Self {
        Self::Communication {
            message: message.into(),
        }
    }

    /// Create a device error
    pub fn device(message: impl Into<String>) -> Self {
        Self::Device {
            message: message.into(),
        }
    }

    /// Create an engine error
    pub fn engine(message: impl Into<String>) -> Self {
        Self::Engine {
            message: message.into(),
        }
    }

    /// Create an I/O error
    pub fn io(message: impl Into<String>) -> Self {
        Self::IO {
            message: message.into(),
        }
    }

    /// Create a serialization error
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Classify this error
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Config { .. }
            | Self::InvalidParameter { .. }
            | Self::Topology { .. }
            | Self::Serialization { .. } => ErrorClass::Configuration,
            Self::Communication { .. } => ErrorClass::Communication,
            Self::Device { .. } | Self::Engine { .. } | Self::Internal { .. } => {
                ErrorClass::Execution
            }
            Self::IO { .. } => ErrorClass::Io,
        }
    }

    /// Whether this error must terminate the whole process group
    pub fn is_fatal(&self) -> bool {
        self.class() != ErrorClass::Io
    }

    /// Whether this error was raised while validating configuration or invariants
    pub fn is_configuration(&self) -> bool {
        self.class() == ErrorClass::Configuration
    }
}

/// Conversion from std::io::Error
impl From<std::io::Error> for LatticeError {
    fn from(err: std::io::Error) -> Self {
        Self::io(format!("{}", err))
    }
}

/// Conversion from serde_json::Error
impl From<serde_json::Error> for LatticeError {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization(format!("{}", err))
    }
}
