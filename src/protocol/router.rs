//! Message router
//!
//! Decodes control messages from a session's transport, runs the matching
//! relay operation and turns its outcome into outbound messages.

use std::future::Future;
use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::error::Result;
use crate::relay::SessionRelay;
use crate::session::{SessionContext, SessionId, SessionRole};

use super::message::{ControlMessage, OutboundMessage, Response};

/// Routes control messages to the session relay
#[derive(Clone)]
pub struct MessageRouter {
    relay: Arc<SessionRelay>,
}

impl MessageRouter {
    /// Create a router in front of `relay`
    pub fn new(relay: Arc<SessionRelay>) -> Self {
        Self { relay }
    }

    /// Get the relay
    pub fn relay(&self) -> &Arc<SessionRelay> {
        &self.relay
    }

    /// Handle one inbound text frame
    ///
    /// The relay operation's room mutations happen before this returns, so
    /// frames dispatched in order take effect in order. The engine work runs
    /// in the returned task.
    pub fn dispatch(&self, context: &SessionContext, raw: &str) -> Option<JoinHandle<()>> {
        let message = match ControlMessage::parse(raw) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(session_id = %context.id, error = %e, "Invalid message");
                context.send(OutboundMessage::error(format!("Invalid message {}", raw)));
                return None;
            }
        };

        match message {
            ControlMessage::OnIceCandidate { .. } => {
                tracing::debug!(session_id = %context.id, action = message.action(), "Message received");
            }
            _ => {
                tracing::info!(session_id = %context.id, action = message.action(), "Message received");
            }
        }

        match message {
            ControlMessage::InitPresenter { sdp_offer } => {
                let negotiation = self.relay.init_presenter(context, sdp_offer);
                Some(self.respond(context, SessionRole::Presenter, negotiation))
            }
            ControlMessage::InitViewer { sdp_offer } => {
                let negotiation = self.relay.init_viewer(context, sdp_offer);
                Some(self.respond(context, SessionRole::Viewer, negotiation))
            }
            ControlMessage::OnIceCandidate { candidate } => {
                self.relay.on_ice_candidate(&context.id, candidate);
                None
            }
            ControlMessage::Stop => Some(tokio::spawn(self.relay.stop(&context.id))),
        }
    }

    /// The session's transport closed or failed
    pub fn disconnect(&self, session_id: &SessionId) -> JoinHandle<()> {
        tracing::info!(session_id = %session_id, "Connection closed");
        tokio::spawn(self.relay.stop(session_id))
    }

    /// Await a negotiation, answer the client, then start gathering
    ///
    /// Gathering starts only after the answer is queued so the client sees
    /// the answer before any engine candidate.
    fn respond<F>(&self, context: &SessionContext, role: SessionRole, negotiation: F) -> JoinHandle<()>
    where
        F: Future<Output = Result<String>> + Send + 'static,
    {
        let relay = Arc::clone(&self.relay);
        let context = context.clone();

        tokio::spawn(async move {
            let answer = match negotiation.await {
                Ok(answer) => answer,
                Err(e) => {
                    if e.is_stale() {
                        tracing::debug!(session_id = %context.id, role = %role, "Negotiation abandoned");
                    } else {
                        tracing::info!(session_id = %context.id, role = %role, error = %e, "Negotiation rejected");
                    }
                    context.send(OutboundMessage::response(role, Response::rejected(e.to_string())));
                    return;
                }
            };

            context.send(OutboundMessage::response(role, Response::accepted(answer)));

            if let Err(e) = relay.gather_candidates(&context.id).await {
                context.send(OutboundMessage::response(role, Response::rejected(e.to_string())));
            }
        })
    }
}
