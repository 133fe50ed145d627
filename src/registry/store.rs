//! Broadcast room
//!
//! Holds at most one presenter and the viewers attached to it. All methods
//! are synchronous; the relay keeps the room behind a mutex that is never
//! held across an engine call.

use std::collections::HashMap;
use std::sync::Arc;

use crate::engine::WebRtcEndpoint;
use crate::session::{SessionContext, SessionId, SessionPhase};

use super::entry::{
    Epoch, PresenterEntry, Reservation, RoomStats, SessionSlot, ViewerEntry, ViewerTicket,
};
use super::error::RegistryError;

/// Entries taken out of the room
pub enum Removed {
    /// The presenter left, taking every viewer with it
    Presenter {
        /// The presenter's entry
        entry: PresenterEntry,
        /// Viewers that were attached
        viewers: Vec<ViewerEntry>,
    },
    /// A single viewer left
    Viewer(ViewerEntry),
    /// Nothing matched
    Absent,
}

/// Single-presenter broadcast room
///
/// Invariants:
/// - a session id is either the presenter or a viewer, never both
/// - the viewer map is empty whenever the presenter slot is
/// - viewers are only admitted while the presenter is `Active`
#[derive(Default)]
pub struct Room {
    presenter: Option<PresenterEntry>,
    viewers: HashMap<SessionId, ViewerEntry>,
}

impl Room {
    /// Create an empty room
    pub fn new() -> Self {
        Self::default()
    }

    /// Current presenter entry
    pub fn presenter(&self) -> Option<&PresenterEntry> {
        self.presenter.as_ref()
    }

    /// Current presenter's session id
    pub fn presenter_id(&self) -> Option<&SessionId> {
        self.presenter.as_ref().map(|entry| entry.slot.id())
    }

    /// Check if `session_id` holds the presenter slot
    pub fn is_presenter(&self, session_id: &SessionId) -> bool {
        self.presenter_id() == Some(session_id)
    }

    /// Viewer entry for `session_id`
    pub fn viewer(&self, session_id: &SessionId) -> Option<&ViewerEntry> {
        self.viewers.get(session_id)
    }

    /// Number of viewers, negotiating or active
    pub fn viewer_count(&self) -> usize {
        self.viewers.len()
    }

    /// Reserve the presenter slot
    ///
    /// Fails with `PresenterConflict` if anyone holds the slot, including
    /// `context`'s own session. The existing presenter is left untouched.
    pub fn reserve_presenter(
        &mut self,
        context: SessionContext,
        epoch: Epoch,
    ) -> Result<Reservation, RegistryError> {
        if let Some(current) = self.presenter_id() {
            tracing::info!(
                session_id = %context.id,
                presenter = %current,
                "Presenter slot already taken"
            );
            return Err(RegistryError::PresenterConflict {
                current: current.clone(),
            });
        }

        let session = context.id.clone();
        self.presenter = Some(PresenterEntry::new(context, epoch));

        tracing::info!(session_id = %session, epoch = epoch, "Presenter slot reserved");

        Ok(Reservation::Presenter { session, epoch })
    }

    /// Reserve a viewer entry attached to the active presenter
    ///
    /// A session that is already a viewer is re-admitted; its previous entry
    /// is handed back in the ticket for release.
    pub fn reserve_viewer(
        &mut self,
        context: SessionContext,
        epoch: Epoch,
    ) -> Result<ViewerTicket, RegistryError> {
        let presenter = self.presenter.as_ref().ok_or(RegistryError::NoPresenter)?;

        if presenter.slot.id() == &context.id {
            return Err(RegistryError::AlreadyPresenting(context.id));
        }

        let (pipeline, source) = match (&presenter.pipeline, &presenter.source) {
            (Some(pipeline), Some(source)) if presenter.slot.state.is_active() => {
                (Arc::clone(pipeline), source.clone())
            }
            _ => return Err(RegistryError::NoPresenter),
        };

        let reservation = Reservation::Viewer {
            session: context.id.clone(),
            epoch,
            presenter: presenter.slot.epoch,
        };

        let replaced = self
            .viewers
            .insert(context.id.clone(), ViewerEntry::new(context, epoch));

        tracing::info!(
            session_id = %reservation.session(),
            epoch = epoch,
            viewers = self.viewers.len(),
            rejoin = replaced.is_some(),
            "Viewer reserved"
        );

        Ok(ViewerTicket {
            reservation,
            pipeline,
            source,
            replaced,
        })
    }

    /// Check if `reservation` still describes the room
    pub fn is_current(&self, reservation: &Reservation) -> bool {
        match reservation {
            Reservation::Presenter { session, epoch } => self
                .presenter
                .as_ref()
                .is_some_and(|entry| entry.slot.id() == session && entry.slot.epoch == *epoch),
            Reservation::Viewer {
                session,
                epoch,
                presenter,
            } => {
                self.presenter
                    .as_ref()
                    .is_some_and(|entry| entry.slot.epoch == *presenter)
                    && self
                        .viewers
                        .get(session)
                        .is_some_and(|entry| entry.slot.epoch == *epoch)
            }
        }
    }

    /// Slot held by `reservation`, if still current
    pub fn slot_mut(&mut self, reservation: &Reservation) -> Option<&mut SessionSlot> {
        if !self.is_current(reservation) {
            return None;
        }

        match reservation {
            Reservation::Presenter { .. } => self.presenter.as_mut().map(|entry| &mut entry.slot),
            Reservation::Viewer { session, .. } => {
                self.viewers.get_mut(session).map(|entry| &mut entry.slot)
            }
        }
    }

    /// Presenter entry held by `reservation`, if still current
    pub fn presenter_mut(&mut self, reservation: &Reservation) -> Option<&mut PresenterEntry> {
        match reservation {
            Reservation::Presenter { .. } if self.is_current(reservation) => self.presenter.as_mut(),
            _ => None,
        }
    }

    /// Slot of `session_id`, whatever its role
    pub fn slot(&self, session_id: &SessionId) -> Option<&SessionSlot> {
        match &self.presenter {
            Some(entry) if entry.slot.id() == session_id => Some(&entry.slot),
            _ => self.viewers.get(session_id).map(|entry| &entry.slot),
        }
    }

    /// Current phase of `session_id`
    pub fn phase(&self, session_id: &SessionId) -> Option<SessionPhase> {
        self.slot(session_id).map(|slot| slot.state.phase)
    }

    /// Attached endpoint of `session_id` with the reservation that owns it
    pub fn endpoint(&self, session_id: &SessionId) -> Option<(Reservation, Arc<dyn WebRtcEndpoint>)> {
        if let Some(entry) = &self.presenter {
            if entry.slot.id() == session_id {
                let endpoint = entry.slot.endpoint.clone()?;
                let reservation = Reservation::Presenter {
                    session: session_id.clone(),
                    epoch: entry.slot.epoch,
                };
                return Some((reservation, endpoint));
            }

            let viewer = self.viewers.get(session_id)?;
            let endpoint = viewer.slot.endpoint.clone()?;
            let reservation = Reservation::Viewer {
                session: session_id.clone(),
                epoch: viewer.slot.epoch,
                presenter: entry.slot.epoch,
            };
            return Some((reservation, endpoint));
        }

        None
    }

    /// Remove `session_id` from the room
    ///
    /// Removing the presenter also removes every viewer.
    pub fn remove_session(&mut self, session_id: &SessionId) -> Removed {
        if self.is_presenter(session_id) {
            return self.remove_presenter();
        }

        match self.viewers.remove(session_id) {
            Some(entry) => Removed::Viewer(entry),
            None => Removed::Absent,
        }
    }

    /// Remove the session held by `reservation`, if still current
    pub fn take_if_current(&mut self, reservation: &Reservation) -> Removed {
        if !self.is_current(reservation) {
            return Removed::Absent;
        }

        self.remove_session(reservation.session())
    }

    fn remove_presenter(&mut self) -> Removed {
        match self.presenter.take() {
            Some(entry) => Removed::Presenter {
                entry,
                viewers: self.viewers.drain().map(|(_, viewer)| viewer).collect(),
            },
            None => Removed::Absent,
        }
    }

    /// Snapshot of the room (queued candidates are not known here)
    pub fn stats(&self) -> RoomStats {
        RoomStats {
            presenter: self.presenter_id().cloned(),
            presenter_phase: self.presenter.as_ref().map(|entry| entry.slot.state.phase),
            viewers: self.viewers.len(),
            active_viewers: self
                .viewers
                .values()
                .filter(|entry| entry.slot.state.is_active())
                .count(),
            queued_candidates: 0,
        }
    }
}
