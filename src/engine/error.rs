//! Media engine error types

/// Error type for media engine calls
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// Could not reach the media server
    Connect {
        /// Address that was dialed
        uri: String,
        /// Underlying failure
        reason: String,
    },
    /// The engine answered a request with an error
    Rpc {
        /// JSON-RPC error code
        code: i64,
        /// Error message from the engine
        message: String,
    },
    /// The engine connection closed
    Disconnected,
    /// No response within the configured request timeout
    Timeout {
        /// Method that timed out
        method: String,
    },
    /// The engine sent a response we could not interpret
    InvalidResponse(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::Connect { uri, reason } => write!(
                f,
                "Could not find media server at address {}. Exiting with error {}",
                uri, reason
            ),
            EngineError::Rpc { code, message } => {
                write!(f, "Media server error {}: {}", code, message)
            }
            EngineError::Disconnected => write!(f, "Media server connection closed"),
            EngineError::Timeout { method } => {
                write!(f, "Media server did not answer '{}' in time", method)
            }
            EngineError::InvalidResponse(msg) => {
                write!(f, "Invalid media server response: {}", msg)
            }
        }
    }
}

impl std::error::Error for EngineError {}
