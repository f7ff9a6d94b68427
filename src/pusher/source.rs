//! Where a Pusher's media comes from

use std::fmt;
use std::net::SocketAddr;

use serde::{Serialize, Serializer};

/// Origin of a Pusher's media
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PusherSource {
    /// A publisher connected to this server (ANNOUNCE/RECORD)
    Session { session_id: u64, peer_addr: SocketAddr },
    /// A stream pulled from a remote server
    Pull { url: String },
}

impl PusherSource {
    pub fn is_pull(&self) -> bool {
        matches!(self, PusherSource::Pull { .. })
    }
}

impl fmt::Display for PusherSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PusherSource::Session { peer_addr, .. } => write!(f, "push://{}", peer_addr),
            PusherSource::Pull { url } => f.write_str(url),
        }
    }
}

impl Serialize for PusherSource {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}
