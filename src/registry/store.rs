//! Pusher registry implementation
//!
//! Maps each path to the single Pusher currently serving it and routes
//! viewer sessions to it.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{broadcast, RwLock};

use super::events::RegistryEvent;
use crate::pusher::{Player, Pusher};
use crate::session::SessionHandle;

/// Outcome of [`PusherRegistry::try_attach`]
#[derive(Debug, Clone)]
pub enum AttachResult {
    /// No Pusher serves the path
    NotFound,
    /// The session is bound to a Player of this Pusher
    Attached {
        pusher: Arc<Pusher>,
        player: Arc<Player>,
    },
    /// The Pusher exists but refused the session
    Rejected,
}

/// Path → Pusher map
///
/// Every check-then-act happens inside one critical section of the map
/// lock. Events are sent only after the lock is released, on a bounded
/// broadcast channel: sending never blocks, and an observer that falls
/// behind loses the oldest events.
#[derive(Debug)]
pub struct PusherRegistry {
    pushers: RwLock<HashMap<String, Arc<Pusher>>>,
    events: Mutex<Option<broadcast::Sender<RegistryEvent>>>,
    event_capacity: usize,
}

impl PusherRegistry {
    /// Create an empty registry with an open event channel
    pub fn new(event_capacity: usize) -> Self {
        let event_capacity = event_capacity.max(1);
        let (tx, _) = broadcast::channel(event_capacity);

        Self {
            pushers: RwLock::new(HashMap::new()),
            events: Mutex::new(Some(tx)),
            event_capacity,
        }
    }

    /// Register a Pusher under its path and start its fan-out loop
    ///
    /// An incumbent on the same path is displaced (last publisher wins).
    /// Returns `false` without any event if the Pusher is already stopped
    /// or already registered.
    pub async fn add_pusher(self: &Arc<Self>, pusher: Arc<Pusher>) -> bool {
        if pusher.is_stopped() {
            return false;
        }

        let displaced = {
            let mut pushers = self.pushers.write().await;
            if let Some(current) = pushers.get(pusher.path()) {
                if current.id() == pusher.id() {
                    return false;
                }
            }
            pushers.insert(pusher.path().to_string(), Arc::clone(&pusher))
        };

        if let Some(old) = displaced {
            tracing::info!(
                path = %old.path(),
                old_pusher = old.id(),
                new_pusher = pusher.id(),
                "Pusher displaced"
            );
            self.emit(RegistryEvent::Removed {
                pusher_id: old.id(),
                path: old.path().to_string(),
            });
            old.stop().await;
        }

        pusher.start(Arc::clone(self));

        tracing::debug!(
            pusher_id = pusher.id(),
            path = %pusher.path(),
            source = %pusher.source(),
            transport = %pusher.trans_type(),
            "Pusher added"
        );
        self.emit(RegistryEvent::Added {
            pusher_id: pusher.id(),
            path: pusher.path().to_string(),
        });

        true
    }

    /// Remove a Pusher if it is the one registered under its path
    ///
    /// Stale calls (the path now belongs to another Pusher, or to none) do
    /// nothing and return `false`.
    pub async fn remove_pusher(&self, pusher: &Arc<Pusher>) -> bool {
        let removed = {
            let mut pushers = self.pushers.write().await;
            match pushers.get(pusher.path()) {
                Some(current) if current.id() == pusher.id() => {
                    pushers.remove(pusher.path());
                    true
                }
                _ => false,
            }
        };

        if !removed {
            return false;
        }

        tracing::debug!(pusher_id = pusher.id(), path = %pusher.path(), "Pusher removed");
        self.emit(RegistryEvent::Removed {
            pusher_id: pusher.id(),
            path: pusher.path().to_string(),
        });
        pusher.stop().await;

        true
    }

    /// Find the Pusher for a session's path and bind the session to it
    ///
    /// Lookup and bind happen under one read lock, so the Pusher cannot be
    /// swapped out in between.
    pub async fn try_attach(&self, handle: &SessionHandle) -> AttachResult {
        let pushers = self.pushers.read().await;

        let Some(pusher) = pushers.get(&handle.path) else {
            return AttachResult::NotFound;
        };

        match pusher.rebind_session(handle).await {
            Some(player) => AttachResult::Attached {
                pusher: Arc::clone(pusher),
                player,
            },
            None => AttachResult::Rejected,
        }
    }

    /// Pusher serving a path
    pub async fn get(&self, path: &str) -> Option<Arc<Pusher>> {
        self.pushers.read().await.get(path).cloned()
    }

    /// Copy of the current map
    pub async fn snapshot(&self) -> HashMap<String, Arc<Pusher>> {
        self.pushers.read().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.pushers.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.pushers.read().await.is_empty()
    }

    /// Empty the registry, stopping every Pusher
    ///
    /// Returns how many Pushers were removed.
    pub async fn clear(&self) -> usize {
        let drained: Vec<Arc<Pusher>> = {
            let mut pushers = self.pushers.write().await;
            pushers.drain().map(|(_, p)| p).collect()
        };

        for pusher in &drained {
            self.emit(RegistryEvent::Removed {
                pusher_id: pusher.id(),
                path: pusher.path().to_string(),
            });
            pusher.stop().await;
        }

        drained.len()
    }

    /// Subscribe to add/remove events
    ///
    /// When the channel is closed the returned receiver reports
    /// `RecvError::Closed` immediately.
    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        match self.events.lock().as_ref() {
            Some(tx) => tx.subscribe(),
            None => broadcast::channel(1).1,
        }
    }

    /// Reopen the event channel if it was closed
    pub fn open_events(&self) {
        let mut events = self.events.lock();
        if events.is_none() {
            let (tx, _) = broadcast::channel(self.event_capacity);
            *events = Some(tx);
        }
    }

    /// Close the event channel; subscribers see the end of the stream
    pub fn close_events(&self) {
        self.events.lock().take();
    }

    fn emit(&self, event: RegistryEvent) {
        if let Some(tx) = self.events.lock().as_ref() {
            // No subscribers is not an error
            let _ = tx.send(event);
        }
    }
}

impl Default for PusherRegistry {
    fn default() -> Self {
        Self::new(64)
    }
}
