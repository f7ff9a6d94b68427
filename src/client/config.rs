//! Pull client configuration

use std::time::Duration;

use crate::protocol::USER_AGENT;
use crate::pusher::PusherOptions;

/// Pull client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Upstream RTSP URL (e.g., "rtsp://camera.local:554/stream1")
    pub url: String,

    /// Local path to publish under instead of the upstream URL path
    pub custom_path: Option<String>,

    /// Interval between OPTIONS keep-alives (zero disables)
    pub heartbeat_interval: Duration,

    /// Give up when no media arrives for this long (zero disables)
    pub idle_timeout: Duration,

    /// `User-Agent` header value
    pub user_agent: String,

    /// Bound on TCP connect and the DESCRIBE/SETUP/PLAY exchange
    pub connect_timeout: Duration,

    /// Options for the Pusher the client feeds
    pub pusher_options: PusherOptions,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            custom_path: None,
            heartbeat_interval: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(30),
            user_agent: USER_AGENT.to_string(),
            connect_timeout: Duration::from_secs(10),
            pusher_options: PusherOptions::default(),
        }
    }
}

impl ClientConfig {
    /// Create a new config with the given URL
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// Publish under a custom local path
    pub fn custom_path(mut self, path: impl Into<String>) -> Self {
        let path = path.into();
        self.custom_path = if path.is_empty() { None } else { Some(path) };
        self
    }

    /// Set the keep-alive interval
    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Set the media idle timeout
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Set the user agent
    pub fn user_agent(mut self, agent: impl Into<String>) -> Self {
        self.user_agent = agent.into();
        self
    }

    /// Set the connect timeout
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Size the Pusher created by the client
    pub fn pusher_options(mut self, options: PusherOptions) -> Self {
        self.pusher_options = options;
        self
    }
}
