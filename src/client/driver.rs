//! Keeps configured pull targets online
//!
//! Every `retry_interval`, each target whose path has no Pusher gets a fresh
//! [`RtspClient`] attempt. A target that drops (idle timeout, upstream gone)
//! is picked up again on the next round.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::config::ClientConfig;
use super::puller::RtspClient;
use crate::server::Server;

const MIN_RETRY_INTERVAL: Duration = Duration::from_millis(1);

/// One upstream stream to keep pulled
#[derive(Debug, Clone)]
pub struct PullTarget {
    pub url: String,
    pub custom_path: Option<String>,
    pub idle_timeout: Duration,
    pub heartbeat_interval: Duration,
}

impl PullTarget {
    pub fn new(url: impl Into<String>) -> Self {
        let defaults = ClientConfig::default();
        Self {
            url: url.into(),
            custom_path: None,
            idle_timeout: defaults.idle_timeout,
            heartbeat_interval: defaults.heartbeat_interval,
        }
    }

    pub fn custom_path(mut self, path: impl Into<String>) -> Self {
        self.custom_path = Some(path.into());
        self
    }

    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }
}

/// Periodic re-attempt loop over a set of pull targets
pub struct PullDriver {
    server: Arc<Server>,
    targets: Vec<PullTarget>,
    retry_interval: Duration,
}

impl PullDriver {
    pub fn new(server: Arc<Server>, targets: Vec<PullTarget>) -> Self {
        Self {
            server,
            targets,
            retry_interval: Duration::from_secs(10),
        }
    }

    /// Set the re-attempt period; zero is clamped to a millisecond
    pub fn retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval.max(MIN_RETRY_INTERVAL);
        self
    }

    pub fn targets(&self) -> &[PullTarget] {
        &self.targets
    }

    fn client_config(&self, target: &PullTarget) -> ClientConfig {
        let mut config = ClientConfig::new(target.url.clone())
            .idle_timeout(target.idle_timeout)
            .heartbeat_interval(target.heartbeat_interval)
            .pusher_options(self.server.config().pusher_options());
        if let Some(path) = &target.custom_path {
            config = config.custom_path(path.clone());
        }
        config
    }

    /// One pass over the targets; returns how many came online
    pub async fn pull_once(&self) -> usize {
        let mut started = 0;

        for target in &self.targets {
            if self.server.is_stopped() {
                break;
            }

            let client = match RtspClient::new(self.client_config(target)) {
                Ok(client) => client,
                Err(e) => {
                    tracing::warn!(url = %target.url, error = %e, "Invalid pull target");
                    continue;
                }
            };

            if self.server.get_pusher(client.path()).await.is_some() {
                continue;
            }

            let path = client.path().to_string();
            let pusher = match client.start().await {
                Ok(pusher) => pusher,
                Err(e) => {
                    tracing::warn!(url = %target.url, path = %path, error = %e, "Pull attempt failed");
                    continue;
                }
            };

            if self.server.add_pusher(Arc::clone(&pusher)).await {
                started += 1;
            } else {
                tracing::warn!(url = %target.url, path = %path, "Pulled stream could not be registered");
                pusher.stop().await;
            }
        }

        started
    }

    /// Run until `shutdown` is cancelled
    pub async fn run(self, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.retry_interval);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    if !self.server.is_stopped() {
                        self.pull_once().await;
                    }
                }
            }
        }

        tracing::debug!(targets = self.targets.len(), "Pull driver stopped");
    }
}
