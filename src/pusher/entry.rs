//! Pusher: one live source and the viewers attached to it

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;

use super::feed::PusherFeed;
use super::frame::MediaUnit;
use super::player::Player;
use super::source::PusherSource;
use crate::id;
use crate::protocol::{SessionDescription, TransType};
use crate::registry::PusherRegistry;
use crate::session::{OfferError, SessionHandle};

/// Sizing for a new Pusher
#[derive(Debug, Clone, Copy)]
pub struct PusherOptions {
    /// Bound of the source → fan-out queue
    pub queue_capacity: usize,
    /// Maximum attached players (0 = unlimited)
    pub max_players: usize,
}

impl Default for PusherOptions {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
            max_players: 0,
        }
    }
}

/// A live stream under a path, fanned out to its Players
///
/// Created by a publishing Session at RECORD or by a pull Client. The
/// matching [`PusherFeed`] is the only way media gets in; when every feed is
/// dropped the fan-out loop ends and the Pusher removes itself from the
/// registry.
#[derive(Debug)]
pub struct Pusher {
    id: u64,
    path: String,
    source: PusherSource,
    trans_type: TransType,
    sdp: SessionDescription,
    start_at: DateTime<Utc>,
    in_bytes: AtomicU64,
    out_bytes: AtomicU64,
    max_players: usize,

    players: RwLock<HashMap<u64, Arc<Player>>>,
    feed_rx: Mutex<Option<mpsc::Receiver<MediaUnit>>>,
    stopped: AtomicBool,
    shutdown: CancellationToken,
}

impl Pusher {
    /// Create a Pusher and the feed its source writes into
    pub fn new(
        path: impl Into<String>,
        source: PusherSource,
        trans_type: TransType,
        sdp: SessionDescription,
        options: PusherOptions,
    ) -> (Arc<Self>, PusherFeed) {
        let (tx, rx) = mpsc::channel(options.queue_capacity.max(1));
        let shutdown = CancellationToken::new();

        let pusher = Arc::new(Self {
            id: id::next_id(),
            path: path.into(),
            source,
            trans_type,
            sdp,
            start_at: Utc::now(),
            in_bytes: AtomicU64::new(0),
            out_bytes: AtomicU64::new(0),
            max_players: options.max_players,
            players: RwLock::new(HashMap::new()),
            feed_rx: Mutex::new(Some(rx)),
            stopped: AtomicBool::new(false),
            shutdown: shutdown.clone(),
        });

        (pusher, PusherFeed::new(tx, shutdown))
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn source(&self) -> &PusherSource {
        &self.source
    }

    pub fn trans_type(&self) -> TransType {
        self.trans_type
    }

    pub fn sdp(&self) -> &SessionDescription {
        &self.sdp
    }

    pub fn start_at(&self) -> DateTime<Utc> {
        self.start_at
    }

    /// Bytes received from the source
    pub fn in_bytes(&self) -> u64 {
        self.in_bytes.load(Ordering::Relaxed)
    }

    /// Bytes queued to players
    pub fn out_bytes(&self) -> u64 {
        self.out_bytes.load(Ordering::Relaxed)
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Snapshot of the attached players
    pub async fn players(&self) -> Vec<Arc<Player>> {
        self.players.read().await.values().cloned().collect()
    }

    pub async fn player_count(&self) -> usize {
        self.players.read().await.len()
    }

    /// Bind a viewing session to this Pusher
    ///
    /// An existing Player carrying the same RTSP session token is rebound in
    /// place and its previous session closed; otherwise a new Player is
    /// created. Returns `None` if the Pusher is stopping, the path differs or
    /// the player limit is reached.
    pub async fn rebind_session(&self, handle: &SessionHandle) -> Option<Arc<Player>> {
        if handle.path != self.path {
            return None;
        }

        let mut players = self.players.write().await;
        if self.is_stopped() {
            return None;
        }

        let existing = players
            .values()
            .find(|p| p.rtsp_session() == handle.rtsp_session)
            .cloned();

        if let Some(player) = existing {
            let old = player.rebind(handle.clone());
            if old.session_id != handle.session_id {
                old.close();
            }

            tracing::info!(
                pusher_id = self.id,
                player_id = player.id(),
                old_session = old.session_id,
                new_session = handle.session_id,
                "Player rebound"
            );
            return Some(player);
        }

        if self.max_players > 0 && players.len() >= self.max_players {
            tracing::warn!(
                pusher_id = self.id,
                path = %self.path,
                max_players = self.max_players,
                "Player rejected: limit reached"
            );
            return None;
        }

        let player = Arc::new(Player::new(&self.path, handle.clone()));
        players.insert(player.id(), Arc::clone(&player));

        tracing::info!(
            pusher_id = self.id,
            player_id = player.id(),
            session_id = handle.session_id,
            peer = %handle.peer_addr,
            players = players.len(),
            "Player attached"
        );

        Some(player)
    }

    /// Remove a Player if `session_id` is still its bound session
    ///
    /// A session that has been replaced by a rebind must not detach the
    /// Player now serving its successor.
    pub async fn detach_session(&self, player_id: u64, session_id: u64) -> bool {
        let mut players = self.players.write().await;

        match players.get(&player_id) {
            Some(player) if player.session_id() == session_id => {
                players.remove(&player_id);
                tracing::info!(
                    pusher_id = self.id,
                    player_id = player_id,
                    session_id = session_id,
                    players = players.len(),
                    "Player detached"
                );
                true
            }
            _ => false,
        }
    }

    /// Spawn the fan-out loop
    ///
    /// Only the first call starts anything; later calls return `false`.
    pub fn start(self: &Arc<Self>, registry: Arc<PusherRegistry>) -> bool {
        let Some(rx) = self.feed_rx.lock().take() else {
            return false;
        };

        let pusher = Arc::clone(self);
        tokio::spawn(async move {
            pusher.run(rx, registry).await;
        });
        true
    }

    async fn run(self: Arc<Self>, mut rx: mpsc::Receiver<MediaUnit>, registry: Arc<PusherRegistry>) {
        tracing::debug!(pusher_id = self.id, path = %self.path, "Fan-out loop started");

        let mut seq: u64 = 0;
        loop {
            let mut unit = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                unit = rx.recv() => match unit {
                    Some(unit) => unit,
                    None => {
                        tracing::info!(pusher_id = self.id, path = %self.path, "Source ended");
                        break;
                    }
                },
            };

            seq += 1;
            unit.seq = seq;
            self.in_bytes.fetch_add(unit.len() as u64, Ordering::Relaxed);
            self.broadcast(unit).await;
        }

        registry.remove_pusher(&self).await;
        self.stop().await;

        tracing::debug!(pusher_id = self.id, units = seq, "Fan-out loop finished");
    }

    /// Offer one unit to every Player
    ///
    /// Players whose queue is full or whose session is gone are detached
    /// and closed; the others are unaffected.
    async fn broadcast(&self, unit: MediaUnit) {
        let len = unit.len() as u64;
        let mut failed = Vec::new();

        {
            let players = self.players.read().await;
            for player in players.values() {
                match player.offer(unit.clone()) {
                    Ok(()) => {
                        self.out_bytes.fetch_add(len, Ordering::Relaxed);
                    }
                    Err(reason) => failed.push((player.id(), player.session_id(), reason)),
                }
            }
        }

        if failed.is_empty() {
            return;
        }

        let mut players = self.players.write().await;
        for (player_id, session_id, reason) in failed {
            let Some(player) = players.get(&player_id) else {
                continue;
            };
            // Rebound in the meantime: the new session gets a fresh chance
            if player.session_id() != session_id {
                continue;
            }

            if let Some(player) = players.remove(&player_id) {
                match reason {
                    OfferError::Full => tracing::warn!(
                        pusher_id = self.id,
                        player_id = player_id,
                        session_id = session_id,
                        "Slow player dropped"
                    ),
                    OfferError::Closed => tracing::debug!(
                        pusher_id = self.id,
                        player_id = player_id,
                        session_id = session_id,
                        "Player session gone"
                    ),
                }
                player.close();
            }
        }
    }

    /// Stop fan-out and close every Player's session
    ///
    /// Idempotent. Players get no protocol-level goodbye; their connections
    /// are simply closed.
    pub async fn stop(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shutdown.cancel();

        let players: Vec<Arc<Player>> = self.players.write().await.drain().map(|(_, p)| p).collect();
        for player in &players {
            player.close();
        }

        tracing::info!(
            pusher_id = self.id,
            path = %self.path,
            closed_players = players.len(),
            "Pusher stopped"
        );
    }
}
