//! RTSP session handling
//!
//! Each accepted connection becomes a [`Session`] running on its own task.
//! Its [`SessionState`] records the phase and a role that, once chosen,
//! never changes: a publisher feeds a Pusher, a viewer drains a Player.

pub mod connection;
pub mod handle;
pub mod state;
pub mod tracks;

pub use connection::Session;
pub use handle::{OfferError, SessionHandle};
pub use state::{PublisherRole, Role, SessionPhase, SessionState, ViewerRole};
pub use tracks::{TrackTable, TrackTransport, UdpPair};
