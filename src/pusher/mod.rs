//! Pusher/Player fan-out
//!
//! A Pusher owns one live source (publishing Session or pull Client) and
//! copies every media unit to its Players. Each Player wraps a bounded queue
//! drained by its viewer Session's task.
//!
//! ```text
//!   source ──► PusherFeed ──► [queue] ──► fan-out loop ──┬──► Player ──► Session ──► TCP/UDP
//!                                                         ├──► Player ──► Session ──► TCP/UDP
//!                                                         └──► Player ──► Session ──► TCP/UDP
//! ```
//!
//! Enqueue to a Player never waits. A viewer that cannot keep up is detached
//! and its Session closed so the others are not held back.

pub mod entry;
pub mod feed;
pub mod frame;
pub mod player;
pub mod source;

pub use entry::{Pusher, PusherOptions};
pub use feed::{FeedClosed, PusherFeed};
pub use frame::{MediaUnit, PacketKind};
pub use player::Player;
pub use source::PusherSource;
