//! Crate-level error type
//!
//! Request-level failures (`Registry`, `MediaEngine`, `Protocol`) are turned
//! into response messages by the router; the remaining variants belong to the
//! server and bootstrap paths.

use crate::engine::EngineError;
use crate::registry::RegistryError;

/// Error type for relay operations
#[derive(Debug)]
pub enum Error {
    /// Socket-level I/O failure
    Io(std::io::Error),
    /// WebSocket handshake or framing failure
    WebSocket(tokio_tungstenite::tungstenite::Error),
    /// Malformed or unknown control message
    Protocol(String),
    /// Room rule violated (conflict, no presenter, stale continuation)
    Registry(RegistryError),
    /// Remote media engine call failed
    MediaEngine(EngineError),
    /// Invalid configuration value
    Config(String),
}

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Whether this error is a continuation that outlived its session
    pub fn is_stale(&self) -> bool {
        matches!(self, Error::Registry(RegistryError::StaleContinuation(_)))
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::WebSocket(e) => write!(f, "WebSocket error: {}", e),
            Error::Protocol(msg) => write!(f, "{}", msg),
            Error::Registry(e) => write!(f, "{}", e),
            Error::MediaEngine(e) => write!(f, "{}", e),
            Error::Config(msg) => write!(f, "Invalid configuration: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            Error::WebSocket(e) => Some(e),
            Error::Registry(e) => Some(e),
            Error::MediaEngine(e) => Some(e),
            Error::Protocol(_) | Error::Config(_) => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for Error {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        Error::WebSocket(e)
    }
}

impl From<RegistryError> for Error {
    fn from(e: RegistryError) -> Self {
        Error::Registry(e)
    }
}

impl From<EngineError> for Error {
    fn from(e: EngineError) -> Self {
        Error::MediaEngine(e)
    }
}
