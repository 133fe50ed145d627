//! Session context
//!
//! Identity and outbound channel of one client connection, handed to the
//! relay with every operation.

use tokio::sync::mpsc;

use crate::protocol::OutboundMessage;

/// Opaque session identifier, unique for the process lifetime
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(String);

impl SessionId {
    /// Create a session id from any string
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the id as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<u64> for SessionId {
    fn from(counter: u64) -> Self {
        Self(counter.to_string())
    }
}

impl From<&str> for SessionId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Handle to a connected client
///
/// Cheap to clone. Sending never blocks and never fails loudly: once the
/// client's transport is gone, outbound messages are dropped.
#[derive(Debug, Clone)]
pub struct SessionContext {
    /// Unique session ID
    pub id: SessionId,

    outbound: mpsc::UnboundedSender<OutboundMessage>,
}

impl SessionContext {
    /// Create a new context around an outbound channel
    pub fn new(id: SessionId, outbound: mpsc::UnboundedSender<OutboundMessage>) -> Self {
        Self { id, outbound }
    }

    /// Create a context together with the receiving half of its channel
    pub fn channel(id: SessionId) -> (Self, mpsc::UnboundedReceiver<OutboundMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(id, tx), rx)
    }

    /// Queue a message for the client
    ///
    /// Returns `false` if the transport has already closed.
    pub fn send(&self, message: OutboundMessage) -> bool {
        match self.outbound.send(message) {
            Ok(()) => true,
            Err(_) => {
                tracing::debug!(session_id = %self.id, "Dropping message for closed transport");
                false
            }
        }
    }

    /// Check if the client's transport has gone away
    pub fn is_closed(&self) -> bool {
        self.outbound.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_id_from_counter() {
        let id = SessionId::from(42u64);
        assert_eq!(id.as_str(), "42");
        assert_eq!(id.to_string(), "42");
    }

    #[tokio::test]
    async fn test_send_after_close_is_dropped() {
        let (ctx, mut rx) = SessionContext::channel(SessionId::new("a"));

        assert!(ctx.send(OutboundMessage::StopCommunication));
        assert_eq!(rx.recv().await, Some(OutboundMessage::StopCommunication));

        drop(rx);
        assert!(ctx.is_closed());
        assert!(!ctx.send(OutboundMessage::StopCommunication));
    }
}
