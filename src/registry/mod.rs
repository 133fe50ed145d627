//! Session registry
//!
//! The room tracks who presents and who watches; the candidate queue holds
//! ICE candidates that arrived before their session's endpoint.
//!
//! # Architecture
//!
//! ```text
//!                         Room
//!              ┌─────────────────────────────┐
//!              │ presenter: PresenterEntry   │
//!              │   slot (epoch, phase, feed) │
//!              │   pipeline, source ─────────┼──┐
//!              │ viewers: HashMap<Id,        │  │ connect()
//!              │   ViewerEntry { slot }>     │◄─┘
//!              └─────────────────────────────┘
//!
//!   in-flight negotiation holds a Reservation {session, epoch}
//!   and checks Room::is_current() after every engine call
//! ```

pub mod candidates;
pub mod entry;
pub mod error;
pub mod store;

pub use candidates::{CandidateFeed, CandidateQueue};
pub use entry::{
    Epoch, PresenterEntry, Reservation, RoomStats, SessionSlot, ViewerEntry, ViewerTicket,
};
pub use error::{RegistryError, NO_PRESENTER_MESSAGE, PRESENTER_CONFLICT_MESSAGE};
pub use store::{Removed, Room};
