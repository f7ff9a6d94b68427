//! Session state machine
//!
//! Tracks the phase and role of an RTSP session from connection to close.
//!
//! ```text
//!   Init ──ANNOUNCE/DESCRIBE──► Negotiating ──RECORD──► Publishing ──┐
//!                                   │                                ├──► Closed
//!                                   └────────PLAY─────► Viewing ─────┘
//! ```

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use super::tracks::TrackTable;
use crate::error::ProtocolError;
use crate::protocol::{SessionDescription, TransType};
use crate::pusher::{Player, Pusher, PusherFeed};

/// Session lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// Connected, no stream declared yet
    Init,
    /// Path and SDP known, tracks being set up
    Negotiating,
    /// Receiving media for a Pusher
    Publishing,
    /// Attached to a Pusher as a Player
    Viewing,
    /// Session closed
    Closed,
}

/// State of a publishing session
#[derive(Debug)]
pub struct PublisherRole {
    pub sdp: SessionDescription,
    pub pusher: Option<Arc<Pusher>>,
    pub feed: Option<PusherFeed>,
}

/// State of a viewing session
#[derive(Debug)]
pub struct ViewerRole {
    pub sdp: SessionDescription,
    pub pusher: Option<Arc<Pusher>>,
    pub player: Option<Arc<Player>>,
    /// Units are drained but not written while paused
    pub paused: bool,
}

/// What the session does; fixed once chosen
#[derive(Debug, Default)]
pub enum Role {
    #[default]
    Unset,
    Publisher(PublisherRole),
    Viewer(ViewerRole),
}

/// Complete session state
#[derive(Debug)]
pub struct SessionState {
    /// Unique session ID
    pub id: u64,

    /// Remote peer address
    pub peer_addr: SocketAddr,

    /// Current phase
    pub phase: SessionPhase,

    /// Connection start time
    pub connected_at: Instant,

    /// RTSP `Session` token, fixed by the first SETUP
    pub rtsp_session: Option<String>,

    /// Role and the resources it holds
    pub role: Role,

    /// Tracks set up so far
    pub tracks: TrackTable,

    /// Bytes received on the control connection
    pub in_bytes: u64,

    /// Bytes sent to the peer
    pub out_bytes: u64,

    path: Option<String>,
}

impl SessionState {
    /// Create a new session state
    pub fn new(id: u64, peer_addr: SocketAddr) -> Self {
        Self {
            id,
            peer_addr,
            phase: SessionPhase::Init,
            connected_at: Instant::now(),
            rtsp_session: None,
            role: Role::Unset,
            tracks: TrackTable::new(),
            in_bytes: 0,
            out_bytes: 0,
            path: None,
        }
    }

    /// Requested resource path, once declared
    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    /// Set the path; later calls must name the same path
    pub fn set_path(&mut self, path: &str) -> Result<(), ProtocolError> {
        match &self.path {
            Some(current) if current != path => Err(ProtocolError::InvalidState(format!(
                "session is bound to {}",
                current
            ))),
            Some(_) => Ok(()),
            None => {
                self.path = Some(path.to_string());
                Ok(())
            }
        }
    }

    /// ANNOUNCE: declare publish intent
    ///
    /// A second ANNOUNCE before RECORD replaces the description.
    pub fn begin_publish(&mut self, path: &str, sdp: SessionDescription) -> Result<(), ProtocolError> {
        match &mut self.role {
            Role::Unset => {}
            Role::Publisher(publisher) if publisher.pusher.is_none() => {}
            _ => return Err(ProtocolError::InvalidState("ANNOUNCE".into())),
        }

        self.set_path(path)?;
        self.role = Role::Publisher(PublisherRole {
            sdp,
            pusher: None,
            feed: None,
        });
        self.phase = SessionPhase::Negotiating;
        Ok(())
    }

    /// DESCRIBE: declare play intent
    pub fn begin_view(&mut self, path: &str, sdp: SessionDescription) -> Result<(), ProtocolError> {
        match &mut self.role {
            Role::Unset => {}
            Role::Viewer(viewer) if viewer.player.is_none() => {}
            _ => return Err(ProtocolError::InvalidState("DESCRIBE".into())),
        }

        self.set_path(path)?;
        self.role = Role::Viewer(ViewerRole {
            sdp,
            pusher: None,
            player: None,
            paused: false,
        });
        self.phase = SessionPhase::Negotiating;
        Ok(())
    }

    /// RECORD accepted: the session now feeds `pusher`
    pub fn start_publishing(
        &mut self,
        pusher: Arc<Pusher>,
        feed: PusherFeed,
    ) -> Result<(), ProtocolError> {
        match &mut self.role {
            Role::Publisher(publisher) if publisher.pusher.is_none() => {
                publisher.pusher = Some(pusher);
                publisher.feed = Some(feed);
                self.phase = SessionPhase::Publishing;
                Ok(())
            }
            _ => Err(ProtocolError::InvalidState("RECORD".into())),
        }
    }

    /// PLAY accepted: the session now drains `player`
    pub fn start_viewing(
        &mut self,
        pusher: Arc<Pusher>,
        player: Arc<Player>,
    ) -> Result<(), ProtocolError> {
        match &mut self.role {
            Role::Viewer(viewer) => {
                viewer.pusher = Some(pusher);
                viewer.player = Some(player);
                viewer.paused = false;
                self.phase = SessionPhase::Viewing;
                Ok(())
            }
            _ => Err(ProtocolError::InvalidState("PLAY".into())),
        }
    }

    /// Suspend delivery, or resume it with `paused = false`
    pub fn set_paused(&mut self, paused: bool) -> Result<(), ProtocolError> {
        match &mut self.role {
            Role::Viewer(viewer) if viewer.player.is_some() => {
                viewer.paused = paused;
                Ok(())
            }
            _ => Err(ProtocolError::InvalidState("PAUSE".into())),
        }
    }

    /// Description the session's tracks come from
    pub fn sdp(&self) -> Option<&SessionDescription> {
        match &self.role {
            Role::Publisher(p) => Some(&p.sdp),
            Role::Viewer(v) => Some(&v.sdp),
            Role::Unset => None,
        }
    }

    pub fn is_publisher(&self) -> bool {
        matches!(self.role, Role::Publisher(_))
    }

    pub fn is_viewer(&self) -> bool {
        matches!(self.role, Role::Viewer(_))
    }

    /// Transport of the tracks set up so far
    pub fn trans_type(&self) -> Option<TransType> {
        self.tracks.trans_type()
    }

    /// Whether a silent peer should be disconnected
    ///
    /// Viewers and UDP publishers legitimately stay quiet on the control
    /// connection.
    pub fn idle_timeout_applies(&self) -> bool {
        match self.phase {
            SessionPhase::Init | SessionPhase::Negotiating => true,
            SessionPhase::Publishing => self.trans_type() == Some(TransType::Tcp),
            SessionPhase::Viewing | SessionPhase::Closed => false,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.phase == SessionPhase::Closed
    }

    /// Close the session, handing the role's resources to the caller
    ///
    /// Only the first call returns them; later calls get `Role::Unset`.
    pub fn close(&mut self) -> Role {
        if self.phase == SessionPhase::Closed {
            return Role::Unset;
        }
        self.phase = SessionPhase::Closed;
        std::mem::take(&mut self.role)
    }

    /// Get session duration
    pub fn duration(&self) -> std::time::Duration {
        self.connected_at.elapsed()
    }
}
