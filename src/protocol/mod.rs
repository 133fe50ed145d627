//! Signaling protocol
//!
//! JSON control messages exchanged with browsers, and the router mapping
//! them onto relay operations.

pub mod message;
pub mod router;

pub use message::{ControlMessage, IceCandidate, OutboundMessage, Response, ResponseKind};
pub use router::MessageRouter;
