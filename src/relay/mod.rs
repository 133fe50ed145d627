//! Session relay
//!
//! Drives presenter and viewer negotiations against the media engine and
//! keeps the room consistent while they run.
//!
//! # Ordering
//!
//! Every operation is split in two. The synchronous part runs when the
//! operation is called and performs every room mutation later messages must
//! observe (reservations, removals, viewer notifications). The returned
//! `'static` future holds the engine calls:
//!
//! ```text
//!   init_presenter(ctx, offer)
//!     ├─ now:   clear queue, reserve presenter slot (epoch N)
//!     └─ later: engine ─► pipeline ─► endpoint ─► filters ─► offer ─► Active
//!                 │          │           │           │         │
//!                 └──────────┴───── is_current(N)? ──┴─────────┘
//! ```
//!
//! After every engine call the continuation checks that the room still holds
//! its reservation. If not, it releases whatever it created that the room
//! does not know about and fails with `StaleContinuation`.

pub mod config;

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::engine::{
    release_element, release_endpoint, release_pipeline, CandidateListener, KurentoConnector,
    MediaElement, MediaEngine, MediaEngineConnector, MediaPipeline, MediaSource, WebRtcEndpoint,
};
use crate::error::{Error, Result};
use crate::protocol::{IceCandidate, OutboundMessage};
use crate::registry::{
    CandidateQueue, Epoch, PresenterEntry, RegistryError, Removed, Reservation, Room, RoomStats,
    SessionSlot, ViewerTicket,
};
use crate::session::{SessionContext, SessionId, SessionPhase};

pub use config::RelayConfig;

/// Broadcast relay for a single room
///
/// Shared as `Arc<SessionRelay>` between every connection.
pub struct SessionRelay {
    config: RelayConfig,
    connector: Arc<dyn MediaEngineConnector>,
    engine: tokio::sync::Mutex<Option<Arc<dyn MediaEngine>>>,
    state: Mutex<RelayState>,
}

#[derive(Default)]
struct RelayState {
    room: Room,
    candidates: CandidateQueue,
    next_epoch: Epoch,
}

impl RelayState {
    fn next_epoch(&mut self) -> Epoch {
        self.next_epoch += 1;
        self.next_epoch
    }
}

/// Engine object to release once a session has left the room
enum Release {
    Pipeline(Arc<dyn MediaPipeline>),
    Endpoint(Arc<dyn WebRtcEndpoint>),
}

impl Release {
    async fn run(self) {
        match self {
            Release::Pipeline(pipeline) => release_pipeline(pipeline.as_ref()).await,
            Release::Endpoint(endpoint) => release_endpoint(endpoint.as_ref()).await,
        }
    }
}

impl SessionRelay {
    /// Create a relay using `connector` to reach the media engine
    pub fn new(config: RelayConfig, connector: Arc<dyn MediaEngineConnector>) -> Self {
        Self {
            config,
            connector,
            engine: tokio::sync::Mutex::new(None),
            state: Mutex::new(RelayState::default()),
        }
    }

    /// Create a relay backed by the Kurento server named in `config`
    pub fn with_kurento(config: RelayConfig) -> Self {
        let connector = KurentoConnector::new(config.media_server_uri.clone())
            .request_timeout(config.engine_timeout);
        Self::new(config, Arc::new(connector))
    }

    /// Get the relay configuration
    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Make `context`'s session the presenter
    ///
    /// Resolves to the SDP answer for `sdp_offer`.
    pub fn init_presenter(
        self: &Arc<Self>,
        context: &SessionContext,
        sdp_offer: String,
    ) -> impl Future<Output = Result<String>> + Send + 'static {
        let reserved = {
            let mut state = self.lock_state();
            state.candidates.clear(&context.id);
            let epoch = state.next_epoch();
            state.room.reserve_presenter(context.clone(), epoch)
        };

        let relay = Arc::clone(self);
        let context = context.clone();

        async move {
            let reservation = reserved?;
            let result = relay
                .negotiate_presenter(&reservation, &context, &sdp_offer)
                .await;
            relay.settle(&reservation, result).await
        }
    }

    /// Add `context`'s session as a viewer of the active presenter
    ///
    /// Resolves to the SDP answer for `sdp_offer`.
    pub fn init_viewer(
        self: &Arc<Self>,
        context: &SessionContext,
        sdp_offer: String,
    ) -> impl Future<Output = Result<String>> + Send + 'static {
        let reserved = {
            let mut state = self.lock_state();
            let epoch = state.next_epoch();
            let RelayState {
                room, candidates, ..
            } = &mut *state;

            candidates.clear(&context.id);
            room.reserve_viewer(context.clone(), epoch).map(|mut ticket| {
                let replaced = ticket
                    .replaced
                    .take()
                    .and_then(|entry| dismantle(Removed::Viewer(entry), candidates));
                (ticket, replaced)
            })
        };

        let relay = Arc::clone(self);
        let context = context.clone();

        async move {
            let (ticket, replaced) = reserved?;
            if let Some(release) = replaced {
                release.run().await;
            }

            let reservation = ticket.reservation.clone();
            let result = relay.negotiate_viewer(ticket, &context, &sdp_offer).await;
            relay.settle(&reservation, result).await
        }
    }

    /// Submit a client-side ICE candidate
    ///
    /// Goes straight to the session's endpoint if it exists, otherwise waits
    /// in the candidate queue.
    pub fn on_ice_candidate(&self, session_id: &SessionId, candidate: IceCandidate) {
        let mut state = self.lock_state();
        let RelayState {
            room, candidates, ..
        } = &mut *state;

        match room.slot(session_id).and_then(SessionSlot::feed) {
            Some(feed) => {
                if !feed.push(candidate) {
                    tracing::debug!(session_id = %session_id, "Candidate feed closed");
                }
            }
            None => {
                candidates.enqueue(session_id, candidate);
                tracing::debug!(
                    session_id = %session_id,
                    queued = candidates.len(session_id),
                    "Candidate queued"
                );
            }
        }
    }

    /// Start ICE gathering on the session's endpoint
    ///
    /// No-op for sessions without an attached endpoint. A failure evicts the
    /// session.
    pub fn gather_candidates(
        self: &Arc<Self>,
        session_id: &SessionId,
    ) -> impl Future<Output = Result<()>> + Send + 'static {
        let target = self.lock_state().room.endpoint(session_id);
        let relay = Arc::clone(self);

        async move {
            let Some((reservation, endpoint)) = target else {
                return Ok(());
            };

            let result = endpoint.gather_candidates().await.map_err(Error::from);
            relay.settle(&reservation, result).await
        }
    }

    /// End the session's participation
    ///
    /// The room is updated and viewers of a departing presenter are notified
    /// before this returns; the returned future releases engine objects.
    /// Stopping an unknown or already stopped session is a no-op.
    pub fn stop(&self, session_id: &SessionId) -> impl Future<Output = ()> + Send + 'static {
        let release = {
            let mut state = self.lock_state();
            let RelayState {
                room, candidates, ..
            } = &mut *state;

            candidates.clear(session_id);
            let removed = room.remove_session(session_id);
            dismantle(removed, candidates)
        };

        async move {
            if let Some(release) = release {
                release.run().await;
            }
        }
    }

    /// Current phase of a session in the room
    pub fn phase(&self, session_id: &SessionId) -> Option<SessionPhase> {
        self.lock_state().room.phase(session_id)
    }

    /// Snapshot of the room
    pub fn stats(&self) -> RoomStats {
        let state = self.lock_state();
        RoomStats {
            queued_candidates: state.candidates.total(),
            ..state.room.stats()
        }
    }

    async fn negotiate_presenter(
        &self,
        reservation: &Reservation,
        context: &SessionContext,
        sdp_offer: &str,
    ) -> Result<String> {
        let engine = self.engine().await?;
        self.advance(reservation, SessionPhase::AwaitingPipeline)?;

        let pipeline = engine.create_pipeline().await?;
        let stored = self.with_presenter(reservation, |entry| {
            entry.pipeline = Some(Arc::clone(&pipeline));
            entry.slot.state.advance(SessionPhase::AwaitingEndpoint);
        });
        if stored.is_none() {
            release_pipeline(pipeline.as_ref()).await;
            return Err(stale(reservation));
        }

        let endpoint = pipeline.create_endpoint().await?;
        if !self.attach(reservation, &endpoint) {
            release_endpoint(endpoint.as_ref()).await;
            return Err(stale(reservation));
        }

        let source = self
            .build_chain(reservation, pipeline.as_ref(), &endpoint)
            .await?;

        endpoint
            .on_candidate_discovered(candidate_listener(context))
            .await?;
        let answer = endpoint.process_offer(sdp_offer).await?;

        self.with_presenter(reservation, |entry| {
            entry.source = Some(source);
            entry.slot.state.advance(SessionPhase::Active);
        })
        .ok_or_else(|| stale(reservation))?;

        tracing::info!(
            session_id = %reservation.session(),
            pipeline = %pipeline.id(),
            filters = self.config.chain.filters().len(),
            "Presenter active"
        );

        Ok(answer)
    }

    async fn negotiate_viewer(
        &self,
        ticket: ViewerTicket,
        context: &SessionContext,
        sdp_offer: &str,
    ) -> Result<String> {
        let ViewerTicket {
            reservation,
            pipeline,
            source,
            ..
        } = ticket;

        let endpoint = pipeline.create_endpoint().await?;
        if !self.attach(&reservation, &endpoint) {
            release_endpoint(endpoint.as_ref()).await;
            return Err(stale(&reservation));
        }

        endpoint
            .on_candidate_discovered(candidate_listener(context))
            .await?;
        let answer = endpoint.process_offer(sdp_offer).await?;

        self.ensure_current(&reservation)?;
        source.connect(endpoint.id()).await?;
        self.advance(&reservation, SessionPhase::Active)?;

        tracing::info!(
            session_id = %reservation.session(),
            source = %source.id(),
            endpoint = %endpoint.id(),
            "Viewer active"
        );

        Ok(answer)
    }

    /// Create and link the configured filter stages after `endpoint`
    async fn build_chain(
        &self,
        reservation: &Reservation,
        pipeline: &dyn MediaPipeline,
        endpoint: &Arc<dyn WebRtcEndpoint>,
    ) -> Result<MediaSource> {
        let mut source = MediaSource::Endpoint(Arc::clone(endpoint));

        for filter in self.config.chain.filters() {
            let stage = pipeline.create_filter(filter).await?;

            if let Err(e) = self.link(reservation, &source, stage.as_ref()).await {
                if e.is_stale() {
                    release_element(stage.as_ref()).await;
                }
                return Err(e);
            }

            tracing::debug!(
                session_id = %reservation.session(),
                filter = %stage.id(),
                kind = %filter.kind,
                "Filter stage linked"
            );
            source = MediaSource::Stage(stage);
        }

        Ok(source)
    }

    async fn link(
        &self,
        reservation: &Reservation,
        source: &MediaSource,
        stage: &dyn MediaElement,
    ) -> Result<()> {
        self.ensure_current(reservation)?;
        source.connect(stage.id()).await?;
        self.ensure_current(reservation)
    }

    /// Turn a negotiation failure into an eviction
    ///
    /// Stale continuations leave the room alone; any other error removes the
    /// session if the room still holds its reservation.
    async fn settle<T>(&self, reservation: &Reservation, result: Result<T>) -> Result<T> {
        let error = match result {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };

        if error.is_stale() {
            tracing::debug!(
                session_id = %reservation.session(),
                role = %reservation.role(),
                "Negotiation outlived its session"
            );
            return Err(error);
        }

        let (evicted, release) = {
            let mut state = self.lock_state();
            let RelayState {
                room, candidates, ..
            } = &mut *state;

            let removed = room.take_if_current(reservation);
            let evicted = !matches!(removed, Removed::Absent);
            (evicted, dismantle(removed, candidates))
        };

        tracing::warn!(
            session_id = %reservation.session(),
            role = %reservation.role(),
            evicted = evicted,
            error = %error,
            "Negotiation failed"
        );

        if let Some(release) = release {
            release.run().await;
        }

        Err(error)
    }

    /// Cached engine handle, reconnecting if the last one closed
    async fn engine(&self) -> Result<Arc<dyn MediaEngine>> {
        let mut cached = self.engine.lock().await;

        if let Some(engine) = cached.as_ref() {
            if !engine.is_closed() {
                return Ok(Arc::clone(engine));
            }
            tracing::warn!(
                uri = %self.config.media_server_uri,
                "Media server connection lost, reconnecting"
            );
        }

        let engine = self.connector.connect().await?;
        *cached = Some(Arc::clone(&engine));
        Ok(engine)
    }

    /// Hand `endpoint` to the room and flush the session's queued candidates
    fn attach(&self, reservation: &Reservation, endpoint: &Arc<dyn WebRtcEndpoint>) -> bool {
        let mut state = self.lock_state();
        let RelayState {
            room, candidates, ..
        } = &mut *state;

        match room.slot_mut(reservation) {
            Some(slot) => {
                slot.attach(Arc::clone(endpoint), candidates.drain(reservation.session()));
                slot.state.advance(SessionPhase::Negotiating);
                true
            }
            None => false,
        }
    }

    fn advance(&self, reservation: &Reservation, phase: SessionPhase) -> Result<()> {
        match self.lock_state().room.slot_mut(reservation) {
            Some(slot) => {
                slot.state.advance(phase);
                Ok(())
            }
            None => Err(stale(reservation)),
        }
    }

    fn ensure_current(&self, reservation: &Reservation) -> Result<()> {
        if self.lock_state().room.is_current(reservation) {
            Ok(())
        } else {
            Err(stale(reservation))
        }
    }

    fn with_presenter<R>(
        &self,
        reservation: &Reservation,
        f: impl FnOnce(&mut PresenterEntry) -> R,
    ) -> Option<R> {
        self.lock_state().room.presenter_mut(reservation).map(f)
    }

    fn lock_state(&self) -> MutexGuard<'_, RelayState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn stale(reservation: &Reservation) -> Error {
    Error::Registry(RegistryError::StaleContinuation(
        reservation.session().clone(),
    ))
}

fn candidate_listener(context: &SessionContext) -> CandidateListener {
    let context = context.clone();
    Arc::new(move |candidate| {
        tracing::debug!(session_id = %context.id, "Forwarding engine candidate");
        context.send(OutboundMessage::IceCandidate { candidate });
    })
}

/// Retire entries removed from the room
///
/// Viewers of a departing presenter are told to stop. Returns the engine
/// object whose release covers everything the removed sessions owned.
fn dismantle(removed: Removed, candidates: &mut CandidateQueue) -> Option<Release> {
    match removed {
        Removed::Presenter { mut entry, viewers } => {
            entry.slot.state.stop();
            tracing::info!(
                session_id = %entry.slot.id(),
                viewers = viewers.len(),
                duration_ms = entry.slot.state.duration().as_millis() as u64,
                "Presenter left the room"
            );

            for mut viewer in viewers {
                viewer.slot.state.stop();
                candidates.clear(viewer.slot.id());
                viewer.slot.context.send(OutboundMessage::StopCommunication);
            }

            // Viewer endpoints live on this pipeline
            entry.pipeline.take().map(Release::Pipeline)
        }
        Removed::Viewer(mut viewer) => {
            viewer.slot.state.stop();
            tracing::info!(
                session_id = %viewer.slot.id(),
                duration_ms = viewer.slot.state.duration().as_millis() as u64,
                "Viewer left the room"
            );

            viewer.slot.endpoint.take().map(Release::Endpoint)
        }
        Removed::Absent => None,
    }
}
