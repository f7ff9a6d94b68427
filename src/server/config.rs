//! Server configuration

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use crate::protocol::{DEFAULT_MAX_MESSAGE_SIZE, DEFAULT_RTSP_PORT};
use crate::pusher::PusherOptions;

/// Server configuration options
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: SocketAddr,

    /// Maximum concurrent connections (0 = unlimited)
    pub max_connections: usize,

    /// Enable TCP_NODELAY (disable Nagle's algorithm)
    pub tcp_nodelay: bool,

    /// Disconnect a session that sends nothing while negotiating or
    /// publishing over TCP
    pub idle_timeout: Duration,

    /// Bound of each Pusher's source → fan-out queue
    pub pusher_queue_capacity: usize,

    /// Bound of each viewer's backlog; a full backlog drops the viewer
    pub player_queue_capacity: usize,

    /// Maximum viewers per Pusher (0 = unlimited)
    pub max_players_per_pusher: usize,

    /// Registry event channel bound
    pub event_capacity: usize,

    /// Maximum RTSP message size (head + body)
    pub max_message_size: usize,

    /// Timeout advertised in `Session` headers
    pub session_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_RTSP_PORT)),
            max_connections: 0, // Unlimited
            tcp_nodelay: true,
            idle_timeout: Duration::from_secs(60),
            pusher_queue_capacity: 1024,
            player_queue_capacity: 512,
            max_players_per_pusher: 0,
            event_capacity: 64,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            session_timeout: Duration::from_secs(60),
        }
    }
}

impl ServerConfig {
    /// Create a new config with custom bind address
    pub fn with_addr(addr: SocketAddr) -> Self {
        Self {
            bind_addr: addr,
            ..Default::default()
        }
    }

    /// Set the bind address
    pub fn bind(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Set maximum connections
    pub fn max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Set idle timeout
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Set the per-viewer backlog bound
    pub fn player_queue_capacity(mut self, capacity: usize) -> Self {
        self.player_queue_capacity = capacity.max(1);
        self
    }

    /// Set the source queue bound of each Pusher
    pub fn pusher_queue_capacity(mut self, capacity: usize) -> Self {
        self.pusher_queue_capacity = capacity.max(1);
        self
    }

    /// Limit viewers per Pusher
    pub fn max_players_per_pusher(mut self, max: usize) -> Self {
        self.max_players_per_pusher = max;
        self
    }

    /// Set the registry event channel bound
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity.max(1);
        self
    }

    /// Options for Pushers created by this server
    pub fn pusher_options(&self) -> PusherOptions {
        PusherOptions {
            queue_capacity: self.pusher_queue_capacity,
            max_players: self.max_players_per_pusher,
        }
    }
}
