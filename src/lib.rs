//! RTSP relay server
//!
//! Publishers push a stream with ANNOUNCE/SETUP/RECORD, or the server pulls
//! one from a remote RTSP source. Viewers DESCRIBE/SETUP/PLAY the same path
//! and receive every RTP/RTCP packet, interleaved on the control connection
//! or over UDP.
//!
//! ```text
//!  publisher ──► Session ─┐                      ┌──► Player ──► viewer Session
//!                         ├──► Pusher (per path) ─┼──► Player ──► viewer Session
//!  RtspClient (pull) ─────┘         ▲             └──► Player ──► viewer Session
//!                                   │
//!                          PusherRegistry (path → Pusher)
//! ```
//!
//! ```no_run
//! use rtsp_relay::{Server, ServerConfig};
//!
//! # async fn run() -> rtsp_relay::Result<()> {
//! let server = Server::new(ServerConfig::with_addr("0.0.0.0:8554".parse().unwrap()));
//! server.start().await?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod error;
pub mod id;
pub mod protocol;
pub mod pusher;
pub mod registry;
pub mod server;
pub mod session;
pub mod stats;

pub use client::{ClientConfig, PullDriver, PullTarget, RtspClient};
pub use error::{Error, ProtocolError, Result};
pub use protocol::TransType;
pub use pusher::{Player, Pusher, PusherOptions, PusherSource};
pub use registry::{PusherRegistry, RegistryEvent};
pub use server::{Server, ServerConfig};
pub use stats::StatsCollector;
