//! A Pusher's view of one attached viewer

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use super::frame::MediaUnit;
use crate::id;
use crate::protocol::TransType;
use crate::session::{OfferError, SessionHandle};

/// Fan-out target bound to a viewing Session
///
/// Accounting (`in_bytes`, `out_bytes`, `start_at`) belongs to the Player,
/// not the Session, so it survives [`Player::rebind`].
#[derive(Debug)]
pub struct Player {
    id: u64,
    path: String,
    start_at: DateTime<Utc>,
    in_bytes: AtomicU64,
    out_bytes: AtomicU64,
    session: Mutex<SessionHandle>,
}

impl Player {
    pub(crate) fn new(path: impl Into<String>, session: SessionHandle) -> Self {
        Self {
            id: id::next_id(),
            path: path.into(),
            start_at: Utc::now(),
            in_bytes: AtomicU64::new(0),
            out_bytes: AtomicU64::new(0),
            session: Mutex::new(session),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn start_at(&self) -> DateTime<Utc> {
        self.start_at
    }

    /// Transport of the currently bound session
    pub fn trans_type(&self) -> TransType {
        self.session.lock().trans_type
    }

    /// ID of the currently bound session
    pub fn session_id(&self) -> u64 {
        self.session.lock().session_id
    }

    /// RTSP session token of the currently bound session
    pub fn rtsp_session(&self) -> String {
        self.session.lock().rtsp_session.clone()
    }

    pub fn in_bytes(&self) -> u64 {
        self.in_bytes.load(Ordering::Relaxed)
    }

    pub fn out_bytes(&self) -> u64 {
        self.out_bytes.load(Ordering::Relaxed)
    }

    /// Account bytes received from the viewer (RTCP receiver reports)
    pub fn add_in_bytes(&self, n: usize) {
        self.in_bytes.fetch_add(n as u64, Ordering::Relaxed);
    }

    /// Account bytes written to the viewer
    pub fn add_out_bytes(&self, n: usize) {
        self.out_bytes.fetch_add(n as u64, Ordering::Relaxed);
    }

    /// Queue a unit for the bound session without blocking
    pub(crate) fn offer(&self, unit: MediaUnit) -> Result<(), OfferError> {
        self.session.lock().offer(unit)
    }

    /// Swap in a new session, returning the previous one
    pub(crate) fn rebind(&self, session: SessionHandle) -> SessionHandle {
        std::mem::replace(&mut *self.session.lock(), session)
    }

    /// Close the bound session
    pub fn close(&self) {
        self.session.lock().close();
    }
}
