//! Per-connection session state
//!
//! A session is created when a client connects and lives until the client
//! stops, disconnects, or is evicted with the presenter it was watching.

pub mod context;
pub mod state;

pub use context::{SessionContext, SessionId};
pub use state::{SessionPhase, SessionRole, SessionState};
