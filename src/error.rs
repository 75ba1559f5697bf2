//! Error types for Bhumi Station

use thiserror::Error;

/// Bhumi Station error type
#[derive(Error, Debug)]
pub enum StationError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("No session named {0}")]
    SessionNotFound(String),

    #[error("Session {0} has terminated")]
    SessionTerminated(String),

    #[error("Invalid command: {0}")]
    InvalidCommand(String),
}

impl From<toml::de::Error> for StationError {
    fn from(e: toml::de::Error) -> Self {
        StationError::Config(e.to_string())
    }
}

impl From<serde_json::Error> for StationError {
    fn from(e: serde_json::Error) -> Self {
        StationError::Protocol(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, StationError>;
