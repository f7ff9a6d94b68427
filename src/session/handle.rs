//! Handle to a viewing session
//!
//! A Player never owns the connection it writes to. It holds this handle:
//! enough to queue media for the session task and to ask it to close.

use std::net::SocketAddr;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::protocol::TransType;
use crate::pusher::MediaUnit;

/// Why a unit could not be queued for a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfferError {
    /// The session's backlog is at capacity
    Full,
    /// The session task is gone
    Closed,
}

/// Cloneable reference to a viewer Session
#[derive(Debug, Clone)]
pub struct SessionHandle {
    /// Process-unique session ID
    pub session_id: u64,

    /// RTSP `Session` header token; a new connection presenting the same
    /// token resumes the Player bound to it
    pub rtsp_session: String,

    /// Requested resource path
    pub path: String,

    /// Remote peer address
    pub peer_addr: SocketAddr,

    /// Negotiated media transport
    pub trans_type: TransType,

    tx: mpsc::Sender<MediaUnit>,
    closer: CancellationToken,
}

impl SessionHandle {
    pub fn new(
        session_id: u64,
        rtsp_session: impl Into<String>,
        path: impl Into<String>,
        peer_addr: SocketAddr,
        trans_type: TransType,
        tx: mpsc::Sender<MediaUnit>,
        closer: CancellationToken,
    ) -> Self {
        Self {
            session_id,
            rtsp_session: rtsp_session.into(),
            path: path.into(),
            peer_addr,
            trans_type,
            tx,
            closer,
        }
    }

    /// Queue a unit without waiting
    pub fn offer(&self, unit: MediaUnit) -> Result<(), OfferError> {
        self.tx.try_send(unit).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => OfferError::Full,
            mpsc::error::TrySendError::Closed(_) => OfferError::Closed,
        })
    }

    /// Ask the session to close its connection
    pub fn close(&self) {
        self.closer.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.closer.is_cancelled() || self.tx.is_closed()
    }
}
