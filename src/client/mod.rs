//! RTSP pull client
//!
//! Pulls streams from upstream RTSP servers and republishes them locally:
//! - [`RtspClient`] performs one DESCRIBE/SETUP/PLAY session and feeds a Pusher
//! - [`PullDriver`] retries configured targets that are not online

pub mod config;
pub mod driver;
pub mod puller;

pub use config::ClientConfig;
pub use driver::{PullDriver, PullTarget};
pub use puller::RtspClient;
