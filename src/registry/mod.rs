//! Path registry for live streams
//!
//! The registry maps each path to the one Pusher serving it and attaches
//! viewer sessions to it. It is an explicit object owned by the Server and
//! handed to Sessions and Pushers; several can coexist in one process.
//!
//! # Architecture
//!
//! ```text
//!                        Arc<PusherRegistry>
//!                   ┌─────────────────────────────┐
//!                   │ pushers: RwLock<HashMap<    │
//!                   │   path, Arc<Pusher>>>       │
//!                   │ events: broadcast::Sender   │
//!                   └──────────────┬──────────────┘
//!                                  │
//!        ┌─────────────────────────┼──────────────────────────┐
//!        │                         │                          │
//!        ▼                         ▼                          ▼
//!   [Publisher]               [Viewer]                  [Event logger]
//!   add_pusher()              try_attach()              subscribe()
//!   remove_pusher()           → Player                  Added / Removed
//! ```
//!
//! # Lock discipline
//!
//! Each check-then-act (displace-and-insert, compare-id-and-remove,
//! lookup-and-bind) runs in a single critical section. Notifications are
//! sent after the map lock is released.

pub mod events;
pub mod store;

pub use events::RegistryEvent;
pub use store::{AttachResult, PusherRegistry};
