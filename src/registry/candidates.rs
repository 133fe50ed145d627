//! ICE candidate buffering
//!
//! Browsers start trickling candidates as soon as they send their offer, long
//! before the relay has an endpoint to hand them to. Until a session's
//! endpoint exists its candidates wait in the [`CandidateQueue`]; once the
//! endpoint is attached, the backlog moves into a [`CandidateFeed`] which
//! applies it, and every later candidate, strictly in arrival order.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::engine::WebRtcEndpoint;
use crate::protocol::IceCandidate;
use crate::session::SessionId;

/// Per-session FIFO of candidates received before the endpoint existed
#[derive(Debug, Default)]
pub struct CandidateQueue {
    queues: HashMap<SessionId, VecDeque<IceCandidate>>,
}

impl CandidateQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a candidate for `session_id`
    pub fn enqueue(&mut self, session_id: &SessionId, candidate: IceCandidate) {
        self.queues
            .entry(session_id.clone())
            .or_default()
            .push_back(candidate);
    }

    /// Remove and return every queued candidate for `session_id`, oldest first
    pub fn drain(&mut self, session_id: &SessionId) -> Vec<IceCandidate> {
        self.queues
            .remove(session_id)
            .map(Vec::from)
            .unwrap_or_default()
    }

    /// Drop everything queued for `session_id`
    pub fn clear(&mut self, session_id: &SessionId) {
        if let Some(dropped) = self.queues.remove(session_id) {
            if !dropped.is_empty() {
                tracing::debug!(
                    session_id = %session_id,
                    dropped = dropped.len(),
                    "Cleared queued candidates"
                );
            }
        }
    }

    /// Number of candidates queued for `session_id`
    pub fn len(&self, session_id: &SessionId) -> usize {
        self.queues.get(session_id).map_or(0, VecDeque::len)
    }

    /// Number of candidates queued across all sessions
    pub fn total(&self) -> usize {
        self.queues.values().map(VecDeque::len).sum()
    }

    /// Check if nothing is queued
    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }
}

/// Ordered delivery of candidates to one attached endpoint
///
/// A single task applies candidates sequentially. Dropping the feed closes
/// it: anything still buffered is discarded, never applied.
#[derive(Debug)]
pub struct CandidateFeed {
    tx: mpsc::UnboundedSender<IceCandidate>,
    closed: Arc<AtomicBool>,
}

impl CandidateFeed {
    /// Start applying `backlog`, then anything pushed later, to `endpoint`
    pub fn spawn(
        session_id: SessionId,
        endpoint: Arc<dyn WebRtcEndpoint>,
        backlog: Vec<IceCandidate>,
    ) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let closed = Arc::new(AtomicBool::new(false));

        if !backlog.is_empty() {
            tracing::debug!(
                session_id = %session_id,
                queued = backlog.len(),
                "Flushing queued candidates"
            );
        }
        for candidate in backlog {
            let _ = tx.send(candidate);
        }

        let flag = Arc::clone(&closed);
        tokio::spawn(async move {
            while let Some(candidate) = rx.recv().await {
                if flag.load(Ordering::SeqCst) {
                    break;
                }

                if let Err(e) = endpoint.add_ice_candidate(&candidate).await {
                    tracing::warn!(
                        session_id = %session_id,
                        endpoint = %endpoint.id(),
                        error = %e,
                        "Failed to add ICE candidate"
                    );
                }
            }
        });

        Self { tx, closed }
    }

    /// Queue a candidate behind everything pushed before it
    pub fn push(&self, candidate: IceCandidate) -> bool {
        !self.closed.load(Ordering::SeqCst) && self.tx.send(candidate).is_ok()
    }
}

impl Drop for CandidateFeed {
    fn drop(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}
