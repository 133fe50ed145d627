//! Session state machine
//!
//! Tracks the negotiation phase of a presenter or viewer session from the
//! first control message until it leaves the room.

use std::time::Instant;

/// Role a session plays in the room
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionRole {
    /// The single session broadcasting media
    Presenter,
    /// A session receiving the presenter's media
    Viewer,
}

impl std::fmt::Display for SessionRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionRole::Presenter => write!(f, "presenter"),
            SessionRole::Viewer => write!(f, "viewer"),
        }
    }
}

/// Session lifecycle phase
///
/// Phases are ordered; a session only ever moves forward. `Stopped` is
/// terminal and reachable from every other phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SessionPhase {
    /// Created, nothing reserved yet
    New,
    /// Presenter slot reserved, waiting for the media engine connection
    AwaitingEngine,
    /// Waiting for the media pipeline
    AwaitingPipeline,
    /// Waiting for the WebRTC endpoint
    AwaitingEndpoint,
    /// Endpoint attached, SDP negotiation in progress
    Negotiating,
    /// Answer delivered, media flowing
    Active,
    /// Session left the room
    Stopped,
}

/// Phase tracker for one session
#[derive(Debug, Clone)]
pub struct SessionState {
    /// Current phase
    pub phase: SessionPhase,

    /// When the session entered the room
    pub created_at: Instant,

    /// When the session became active
    pub activated_at: Option<Instant>,
}

impl SessionState {
    /// Create a new session state in the `New` phase
    pub fn new() -> Self {
        Self {
            phase: SessionPhase::New,
            created_at: Instant::now(),
            activated_at: None,
        }
    }

    /// Create a session state already in the given phase
    pub fn starting_at(phase: SessionPhase) -> Self {
        let mut state = Self::new();
        state.advance(phase);
        state
    }

    /// Move forward to `next`
    ///
    /// Returns `false` (and leaves the phase untouched) when `next` is not
    /// ahead of the current phase, which includes every move out of `Stopped`.
    pub fn advance(&mut self, next: SessionPhase) -> bool {
        if next <= self.phase {
            return false;
        }

        self.phase = next;
        if next == SessionPhase::Active {
            self.activated_at = Some(Instant::now());
        }
        true
    }

    /// Enter the terminal phase
    pub fn stop(&mut self) {
        self.phase = SessionPhase::Stopped;
    }

    /// Check if the session is active
    pub fn is_active(&self) -> bool {
        self.phase == SessionPhase::Active
    }

    /// Check if the session has stopped
    pub fn is_stopped(&self) -> bool {
        self.phase == SessionPhase::Stopped
    }

    /// Time spent in the room so far
    pub fn duration(&self) -> std::time::Duration {
        self.created_at.elapsed()
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presenter_lifecycle() {
        let mut state = SessionState::new();
        assert_eq!(state.phase, SessionPhase::New);

        assert!(state.advance(SessionPhase::AwaitingEngine));
        assert!(state.advance(SessionPhase::AwaitingPipeline));
        assert!(state.advance(SessionPhase::AwaitingEndpoint));
        assert!(state.advance(SessionPhase::Negotiating));
        assert!(!state.is_active());

        assert!(state.advance(SessionPhase::Active));
        assert!(state.is_active());
        assert!(state.activated_at.is_some());
    }

    #[test]
    fn test_viewer_skips_engine_phases() {
        let state = SessionState::starting_at(SessionPhase::AwaitingEndpoint);
        assert_eq!(state.phase, SessionPhase::AwaitingEndpoint);
    }

    #[test]
    fn test_no_backward_transition() {
        let mut state = SessionState::starting_at(SessionPhase::Negotiating);

        assert!(!state.advance(SessionPhase::AwaitingPipeline));
        assert!(!state.advance(SessionPhase::Negotiating));
        assert_eq!(state.phase, SessionPhase::Negotiating);
    }

    #[test]
    fn test_stopped_is_terminal() {
        let mut state = SessionState::starting_at(SessionPhase::AwaitingEngine);
        state.stop();

        assert!(state.is_stopped());
        assert!(!state.advance(SessionPhase::Active));
        assert_eq!(state.phase, SessionPhase::Stopped);
    }
}
