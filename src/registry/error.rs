//! Registry error types
//!
//! Error types for room operations.

use crate::session::SessionId;

/// Message shown to clients when there is no presenter to attach to
pub const NO_PRESENTER_MESSAGE: &str = "No active presenter. Try again later...";

/// Message shown to a client that tries to present while someone else is
pub const PRESENTER_CONFLICT_MESSAGE: &str =
    "Another user is currently acting as presenter. Try again later ...";

/// Error type for room operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// Another session already holds the presenter slot
    PresenterConflict {
        /// Session currently presenting
        current: SessionId,
    },
    /// No active presenter to join
    NoPresenter,
    /// A presenter tried to join its own broadcast as a viewer
    AlreadyPresenting(SessionId),
    /// The reservation captured before a suspension point is no longer current
    StaleContinuation(SessionId),
}

impl std::fmt::Display for RegistryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegistryError::PresenterConflict { .. } => write!(f, "{}", PRESENTER_CONFLICT_MESSAGE),
            // A stale continuation reports the same condition as a missing presenter
            RegistryError::NoPresenter | RegistryError::StaleContinuation(_) => {
                write!(f, "{}", NO_PRESENTER_MESSAGE)
            }
            RegistryError::AlreadyPresenting(id) => {
                write!(f, "Session {} is already acting as presenter", id)
            }
        }
    }
}

impl std::error::Error for RegistryError {}
