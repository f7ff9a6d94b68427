//! RTSP server listener
//!
//! Handles the TCP accept loop and spawns one Session per connection.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::id;
use crate::pusher::Pusher;
use crate::registry::{AttachResult, PusherRegistry, RegistryEvent};
use crate::server::config::ServerConfig;
use crate::session::{Session, SessionHandle};

/// Accept loop lifecycle, guarded by one lock
#[derive(Debug)]
struct Lifecycle {
    /// Token the current (or next) accept loop runs under
    shutdown: CancellationToken,
    /// An accept loop has claimed `shutdown`
    claimed: bool,
    /// Cancelled by the running accept loop once its listener is dropped
    closed: Option<CancellationToken>,
}

impl Lifecycle {
    fn new() -> Self {
        Self {
            shutdown: CancellationToken::new(),
            claimed: false,
            closed: None,
        }
    }
}

/// RTSP relay server
///
/// Owns the path registry. Construct with [`Server::new`], run with
/// [`Server::start`]; [`Server::stop`] ends the accept loop from any task.
#[derive(Debug)]
pub struct Server {
    config: ServerConfig,
    registry: Arc<PusherRegistry>,
    stopped: AtomicBool,
    lifecycle: Mutex<Lifecycle>,
    local_addr: Mutex<Option<SocketAddr>>,
    started_at: DateTime<Utc>,
    connection_semaphore: Option<Arc<Semaphore>>,
}

impl Server {
    /// Create a new server with the given configuration
    pub fn new(config: ServerConfig) -> Arc<Self> {
        let connection_semaphore = if config.max_connections > 0 {
            Some(Arc::new(Semaphore::new(config.max_connections)))
        } else {
            None
        };

        Arc::new(Self {
            registry: Arc::new(PusherRegistry::new(config.event_capacity)),
            config,
            stopped: AtomicBool::new(true),
            lifecycle: Mutex::new(Lifecycle::new()),
            local_addr: Mutex::new(None),
            started_at: Utc::now(),
            connection_semaphore,
        })
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Get a reference to the path registry
    pub fn registry(&self) -> &Arc<PusherRegistry> {
        &self.registry
    }

    /// Bind the configured address
    pub async fn bind(&self) -> Result<TcpListener> {
        TcpListener::bind(self.config.bind_addr)
            .await
            .map_err(|source| Error::Bind {
                addr: self.config.bind_addr.to_string(),
                source,
            })
    }

    /// Bind and run the accept loop until [`Server::stop`]
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        let listener = self.bind().await?;
        self.serve(listener).await
    }

    /// Run the accept loop on an already bound listener
    ///
    /// A [`Server::stop`] issued before this loop got going makes it return
    /// straight away.
    pub async fn serve(self: &Arc<Self>, listener: TcpListener) -> Result<()> {
        let (shutdown, closed) = {
            let mut lifecycle = self.lifecycle.lock();

            if lifecycle.shutdown.is_cancelled() {
                let pending_stop = !lifecycle.claimed;
                lifecycle.shutdown = CancellationToken::new();
                lifecycle.claimed = false;
                if pending_stop {
                    tracing::debug!("Stop requested before the accept loop started");
                    return Ok(());
                }
            }
            if lifecycle.closed.as_ref().is_some_and(|c| !c.is_cancelled()) {
                tracing::warn!("Accept loop already running");
                return Ok(());
            }

            let closed = CancellationToken::new();
            lifecycle.claimed = true;
            lifecycle.closed = Some(closed.clone());

            *self.local_addr.lock() = listener.local_addr().ok();
            self.registry.open_events();
            self.spawn_event_logger();
            self.stopped.store(false, Ordering::Release);

            (lifecycle.shutdown.clone(), closed.drop_guard())
        };

        tracing::info!(addr = ?listener.local_addr().ok(), "RTSP server listening");

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((socket, peer_addr)) => self.handle_connection(socket, peer_addr, &shutdown),
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to accept connection");
                    }
                },
            }
        }

        drop(listener);
        *self.local_addr.lock() = None;
        drop(closed);
        tracing::info!("RTSP server listener closed");

        Ok(())
    }

    fn handle_connection(
        self: &Arc<Self>,
        socket: TcpStream,
        peer_addr: SocketAddr,
        shutdown: &CancellationToken,
    ) {
        // Check connection limit
        let permit = if let Some(ref sem) = self.connection_semaphore {
            match sem.clone().try_acquire_owned() {
                Ok(permit) => Some(permit),
                Err(_) => {
                    tracing::warn!(peer = %peer_addr, "Connection rejected: limit reached");
                    return;
                }
            }
        } else {
            None
        };

        let session_id = id::next_id();

        tracing::debug!(
            session_id = session_id,
            peer = %peer_addr,
            "New connection"
        );

        if self.config.tcp_nodelay {
            if let Err(e) = socket.set_nodelay(true) {
                tracing::warn!(session_id = session_id, error = %e, "Failed to set TCP_NODELAY");
            }
        }

        let session = Session::new(
            session_id,
            socket,
            peer_addr,
            Arc::clone(self),
            shutdown.child_token(),
        );

        tokio::spawn(async move {
            let _permit = permit;

            match session.run().await {
                Ok(()) => {}
                Err(e) if e.is_idle_timeout() => {
                    tracing::info!(session_id = session_id, error = %e, "Session timed out");
                }
                Err(e) => {
                    tracing::debug!(session_id = session_id, error = %e, "Session error");
                }
            }

            tracing::debug!(session_id = session_id, "Connection closed");
        });
    }

    fn spawn_event_logger(&self) {
        let mut events = self.registry.subscribe();

        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(RegistryEvent::Added { pusher_id, path }) => {
                        tracing::info!(pusher_id = pusher_id, path = %path, "Pusher online");
                    }
                    Ok(RegistryEvent::Removed { pusher_id, path }) => {
                        tracing::info!(pusher_id = pusher_id, path = %path, "Pusher offline");
                    }
                    Err(RecvError::Lagged(missed)) => {
                        tracing::warn!(missed = missed, "Registry event observer lagged");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });
    }

    /// Stop accepting, close every session and empty the registry
    ///
    /// Idempotent. Returns once the listener is closed, so the address can
    /// be bound again. Viewers get no TEARDOWN; their connections are
    /// dropped.
    pub async fn stop(&self) {
        let (was_running, closed) = {
            let mut lifecycle = self.lifecycle.lock();
            lifecycle.shutdown.cancel();
            let was_running = !self.stopped.swap(true, Ordering::AcqRel);
            (was_running, lifecycle.closed.take())
        };

        if let Some(closed) = closed {
            closed.cancelled().await;
        }
        if !was_running {
            return;
        }

        let removed = self.registry.clear().await;
        self.registry.close_events();

        tracing::info!(pushers = removed, "RTSP server stopped");
    }

    /// Stop, then listen again on the configured address
    ///
    /// The new accept loop runs on its own task; bind errors are returned.
    pub async fn restart(self: &Arc<Self>) -> Result<()> {
        self.stop().await;
        {
            let mut lifecycle = self.lifecycle.lock();
            lifecycle.shutdown = CancellationToken::new();
            lifecycle.claimed = false;
        }

        let listener = self.bind().await?;
        let server = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = server.serve(listener).await {
                tracing::error!(error = %e, "Accept loop failed after restart");
            }
        });

        tracing::info!("RTSP server restarted");
        Ok(())
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Address of the running listener
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock()
    }

    /// Port viewers connect to
    pub fn port(&self) -> u16 {
        self.local_addr()
            .map(|a| a.port())
            .unwrap_or_else(|| self.config.bind_addr.port())
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Register a Pusher; refused while the server is stopped
    pub async fn add_pusher(&self, pusher: Arc<Pusher>) -> bool {
        if self.is_stopped() {
            return false;
        }
        self.registry.add_pusher(pusher).await
    }

    pub async fn remove_pusher(&self, pusher: &Arc<Pusher>) -> bool {
        self.registry.remove_pusher(pusher).await
    }

    pub async fn try_attach_to_pusher(&self, handle: &SessionHandle) -> AttachResult {
        self.registry.try_attach(handle).await
    }

    pub async fn get_pusher(&self, path: &str) -> Option<Arc<Pusher>> {
        self.registry.get(path).await
    }

    /// Snapshot of all Pushers
    pub async fn pushers(&self) -> Vec<Arc<Pusher>> {
        self.registry.snapshot().await.into_values().collect()
    }

    pub async fn pusher_count(&self) -> usize {
        self.registry.len().await
    }

    /// Total Players across all Pushers
    pub async fn player_count(&self) -> usize {
        let mut total = 0;
        for pusher in self.pushers().await {
            total += pusher.player_count().await;
        }
        total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pusher::entry::tests::test_pusher;
    use crate::pusher::PusherOptions;
    use std::time::Duration;

    fn local_config() -> ServerConfig {
        ServerConfig::with_addr("127.0.0.1:0".parse().unwrap())
    }

    async fn wait_running(server: &Arc<Server>) {
        for _ in 0..100 {
            if !server.is_stopped() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("server did not start");
    }

    #[tokio::test]
    async fn test_bind_error() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = taken.local_addr().unwrap();

        let server = Server::new(ServerConfig::with_addr(addr));
        let err = server.start().await.unwrap_err();
        assert!(matches!(err, Error::Bind { .. }));
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let server = Server::new(local_config());
        let task = tokio::spawn({
            let server = Arc::clone(&server);
            async move { server.start().await }
        });
        wait_running(&server).await;
        assert!(server.local_addr().is_some());

        let (pusher, _feed) = test_pusher("/cam1", PusherOptions::default());
        assert!(server.add_pusher(Arc::clone(&pusher)).await);

        server.stop().await;
        server.stop().await;

        task.await.unwrap().unwrap();
        assert!(server.is_stopped());
        assert_eq!(server.pusher_count().await, 0);
        assert!(pusher.is_stopped());

        let (late, _late_feed) = test_pusher("/cam2", PusherOptions::default());
        assert!(!server.add_pusher(late).await);
    }

    async fn free_port() -> SocketAddr {
        let probe = TcpListener::bind("127.0.0.1:0").await.unwrap();
        probe.local_addr().unwrap()
    }

    #[tokio::test]
    async fn test_restart_on_fixed_port() {
        let addr = free_port().await;
        let server = Server::new(ServerConfig::with_addr(addr));
        let task = tokio::spawn({
            let server = Arc::clone(&server);
            async move { server.start().await }
        });
        wait_running(&server).await;

        server.restart().await.unwrap();
        task.await.unwrap().unwrap();
        wait_running(&server).await;
        assert_eq!(server.local_addr(), Some(addr));
        TcpStream::connect(addr).await.unwrap();

        let (pusher, _feed) = test_pusher("/cam1", PusherOptions::default());
        assert!(server.add_pusher(pusher).await);

        server.stop().await;
    }

    #[tokio::test]
    async fn test_stop_releases_address() {
        let addr = free_port().await;
        let server = Server::new(ServerConfig::with_addr(addr));
        let task = tokio::spawn({
            let server = Arc::clone(&server);
            async move { server.start().await }
        });
        wait_running(&server).await;

        server.stop().await;
        assert!(server.local_addr().is_none());
        drop(TcpListener::bind(addr).await.unwrap());

        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_stop_before_accept_loop_runs() {
        let server = Server::new(local_config());
        let task = tokio::spawn({
            let server = Arc::clone(&server);
            async move { server.start().await }
        });

        server.stop().await;

        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("accept loop kept running")
            .unwrap()
            .unwrap();
        assert!(server.is_stopped());

        // The pending stop is spent; the next start runs normally
        let task = tokio::spawn({
            let server = Arc::clone(&server);
            async move { server.start().await }
        });
        wait_running(&server).await;
        server.stop().await;
        task.await.unwrap().unwrap();
    }
}
