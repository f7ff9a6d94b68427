//! Registry change notifications

use std::fmt;

use serde::Serialize;

/// A Pusher entered or left the registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RegistryEvent {
    Added { pusher_id: u64, path: String },
    Removed { pusher_id: u64, path: String },
}

impl RegistryEvent {
    pub fn path(&self) -> &str {
        match self {
            RegistryEvent::Added { path, .. } | RegistryEvent::Removed { path, .. } => path,
        }
    }

    pub fn pusher_id(&self) -> u64 {
        match self {
            RegistryEvent::Added { pusher_id, .. } | RegistryEvent::Removed { pusher_id, .. } => {
                *pusher_id
            }
        }
    }
}

impl fmt::Display for RegistryEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryEvent::Added { pusher_id, path } => write!(f, "added {} ({})", path, pusher_id),
            RegistryEvent::Removed { pusher_id, path } => {
                write!(f, "removed {} ({})", path, pusher_id)
            }
        }
    }
}
