//! Error types for MargaLink

use thiserror::Error;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by the link stack
#[derive(Debug, Error)]
pub enum Error {
    /// Socket or file I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Operation requires a live session
    #[error("not connected to a device")]
    NotConnected,

    /// Message could not be serialized
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Malformed wire data: undecodable message line, bad polyline
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Configuration load or save failure
    #[error("config error: {0}")]
    Config(String),

    /// Anything else: thread spawn, signal handler registration
    #[error("{0}")]
    Other(String),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for Error {
    fn from(err: toml::ser::Error) -> Self {
        Error::Config(err.to_string())
    }
}
