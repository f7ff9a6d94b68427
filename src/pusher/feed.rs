//! Source side of a Pusher
//!
//! Whoever produces media for a Pusher (a publishing Session or a pull
//! Client) holds a `PusherFeed`. Dropping every feed ends the fan-out loop,
//! which in turn removes the Pusher from the registry.

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::frame::MediaUnit;

/// The Pusher behind a feed has stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("pusher stopped")]
pub struct FeedClosed;

/// Sending half of a Pusher's media queue
#[derive(Debug, Clone)]
pub struct PusherFeed {
    tx: mpsc::Sender<MediaUnit>,
    shutdown: CancellationToken,
}

impl PusherFeed {
    pub(crate) fn new(tx: mpsc::Sender<MediaUnit>, shutdown: CancellationToken) -> Self {
        Self { tx, shutdown }
    }

    /// Queue a unit for fan-out
    ///
    /// Waits while the queue is full, so a fast source is slowed to the
    /// pace of the fan-out loop rather than dropping packets here.
    pub async fn send(&self, unit: MediaUnit) -> Result<(), FeedClosed> {
        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => Err(FeedClosed),
            result = self.tx.send(unit) => result.map_err(|_| FeedClosed),
        }
    }

    /// Resolves once the Pusher has stopped
    pub async fn closed(&self) {
        tokio::select! {
            _ = self.shutdown.cancelled() => {}
            _ = self.tx.closed() => {}
        }
    }

    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled() || self.tx.is_closed()
    }
}
