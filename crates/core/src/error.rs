//! Core error types

use thiserror::Error;

/// Core error type for ResQ
#[derive(Debug, Error)]
pub enum Error {
    /// Generic error
    #[error("Core error: {0}")]
    Generic(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration file could not be parsed
    #[error("Failed to parse configuration: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// Configuration parsed but failed validation
    #[error("Invalid configuration: {0}")]
    ConfigInvalid(String),

    /// Coordinate outside the WGS84 range
    #[error("Invalid coordinate: {0}")]
    InvalidCoordinate(String),
}

/// Result alias used across the core crate
pub type Result<T> = std::result::Result<T, Error>;
