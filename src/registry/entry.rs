//! Room entry types
//!
//! Per-session state stored in the room, and the reservation tokens that
//! in-flight negotiations use to tell whether the room still belongs to them.

use std::sync::Arc;

use crate::engine::{MediaPipeline, MediaSource, WebRtcEndpoint};
use crate::protocol::IceCandidate;
use crate::session::{SessionContext, SessionId, SessionPhase, SessionRole, SessionState};

use super::candidates::CandidateFeed;

/// Generation number stamped on every room reservation
pub type Epoch = u64;

/// Proof of a room reservation, captured by an in-flight operation
///
/// After each suspension point the operation hands its reservation back to
/// the room; if the room no longer holds the same session at the same epoch,
/// the continuation is stale and must not touch the room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reservation {
    /// The presenter slot
    Presenter {
        /// Session holding the slot
        session: SessionId,
        /// Epoch of the reservation
        epoch: Epoch,
    },
    /// A viewer entry, tied to the presenter it joined
    Viewer {
        /// Viewer session
        session: SessionId,
        /// Epoch of the viewer reservation
        epoch: Epoch,
        /// Epoch of the presenter the viewer attached to
        presenter: Epoch,
    },
}

impl Reservation {
    /// Session the reservation was made for
    pub fn session(&self) -> &SessionId {
        match self {
            Reservation::Presenter { session, .. } | Reservation::Viewer { session, .. } => session,
        }
    }

    /// Role the session reserved
    pub fn role(&self) -> SessionRole {
        match self {
            Reservation::Presenter { .. } => SessionRole::Presenter,
            Reservation::Viewer { .. } => SessionRole::Viewer,
        }
    }

    /// Epoch of this reservation
    pub fn epoch(&self) -> Epoch {
        match self {
            Reservation::Presenter { epoch, .. } | Reservation::Viewer { epoch, .. } => *epoch,
        }
    }
}

/// State common to presenter and viewer entries
pub struct SessionSlot {
    /// Transport handle of the session
    pub context: SessionContext,

    /// Epoch of the reservation that created this slot
    pub epoch: Epoch,

    /// Lifecycle phase
    pub state: SessionState,

    /// WebRTC endpoint, once created and attached
    pub endpoint: Option<Arc<dyn WebRtcEndpoint>>,

    feed: Option<CandidateFeed>,
}

impl SessionSlot {
    pub(super) fn new(context: SessionContext, epoch: Epoch, phase: SessionPhase) -> Self {
        Self {
            context,
            epoch,
            state: SessionState::starting_at(phase),
            endpoint: None,
            feed: None,
        }
    }

    /// Session id
    pub fn id(&self) -> &SessionId {
        &self.context.id
    }

    /// Attach the session's endpoint, applying `backlog` first
    pub fn attach(&mut self, endpoint: Arc<dyn WebRtcEndpoint>, backlog: Vec<IceCandidate>) {
        self.feed = Some(CandidateFeed::spawn(
            self.id().clone(),
            Arc::clone(&endpoint),
            backlog,
        ));
        self.endpoint = Some(endpoint);
    }

    /// Candidate feed of the attached endpoint
    pub fn feed(&self) -> Option<&CandidateFeed> {
        self.feed.as_ref()
    }

    /// Whether an endpoint is attached
    pub fn is_attached(&self) -> bool {
        self.endpoint.is_some()
    }
}

/// The presenter slot
pub struct PresenterEntry {
    /// Session state
    pub slot: SessionSlot,

    /// Pipeline owning every media object of the broadcast
    pub pipeline: Option<Arc<dyn MediaPipeline>>,

    /// Element viewers receive media from, set once the presenter is active
    pub source: Option<MediaSource>,
}

impl PresenterEntry {
    pub(super) fn new(context: SessionContext, epoch: Epoch) -> Self {
        Self {
            slot: SessionSlot::new(context, epoch, SessionPhase::AwaitingEngine),
            pipeline: None,
            source: None,
        }
    }
}

/// A viewer's entry; its endpoint lives on the presenter's pipeline
pub struct ViewerEntry {
    /// Session state
    pub slot: SessionSlot,
}

impl ViewerEntry {
    pub(super) fn new(context: SessionContext, epoch: Epoch) -> Self {
        Self {
            slot: SessionSlot::new(context, epoch, SessionPhase::AwaitingEndpoint),
        }
    }
}

/// What a viewer needs from the room to negotiate
pub struct ViewerTicket {
    /// The viewer's reservation
    pub reservation: Reservation,

    /// Presenter's pipeline, where the viewer endpoint is created
    pub pipeline: Arc<dyn MediaPipeline>,

    /// Element to connect the viewer endpoint to
    pub source: MediaSource,

    /// Earlier participation of the same session, already removed
    pub replaced: Option<ViewerEntry>,
}

/// Snapshot of the room
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoomStats {
    /// Current presenter, if any
    pub presenter: Option<SessionId>,
    /// Phase of the current presenter
    pub presenter_phase: Option<SessionPhase>,
    /// Viewers in the room, negotiating or active
    pub viewers: usize,
    /// Viewers receiving media
    pub active_viewers: usize,
    /// Candidates waiting for an endpoint, across all sessions
    pub queued_candidates: usize,
}
