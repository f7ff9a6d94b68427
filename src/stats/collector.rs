//! Telemetry time series
//!
//! Samples the number of live Pushers and Players at a fixed interval and
//! keeps the most recent samples for the admin dashboard.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::server::Server;

const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// One point of a count series
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CountSample {
    /// Unix timestamp (seconds)
    pub time: i64,
    pub total: usize,
}

/// Bounded Pusher/Player count series
#[derive(Debug)]
pub struct StatsCollector {
    interval: Duration,
    limit: usize,
    pushers: Mutex<VecDeque<CountSample>>,
    players: Mutex<VecDeque<CountSample>>,
}

impl StatsCollector {
    /// Collector sampling every `interval`, keeping `limit` samples
    ///
    /// Both are clamped to small positive values.
    pub fn new(interval: Duration, limit: usize) -> Self {
        let limit = limit.max(1);
        Self {
            interval: interval.max(MIN_INTERVAL),
            limit,
            pushers: Mutex::new(VecDeque::with_capacity(limit)),
            players: Mutex::new(VecDeque::with_capacity(limit)),
        }
    }

    /// Take one sample now
    pub async fn sample(&self, server: &Server) {
        let pushers = server.pusher_count().await;
        let players = server.player_count().await;
        let time = Utc::now().timestamp();

        push_bounded(&mut self.pushers.lock(), CountSample { time, total: pushers }, self.limit);
        push_bounded(&mut self.players.lock(), CountSample { time, total: players }, self.limit);

        tracing::trace!(pushers = pushers, players = players, "Stats sampled");
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Pusher counts, oldest first
    pub fn pusher_series(&self) -> Vec<CountSample> {
        self.pushers.lock().iter().copied().collect()
    }

    /// Player counts, oldest first
    pub fn player_series(&self) -> Vec<CountSample> {
        self.players.lock().iter().copied().collect()
    }

    /// Spawn the sampling task
    ///
    /// Runs until `shutdown` is cancelled.
    pub fn spawn_sampler(
        self: &Arc<Self>,
        server: Arc<Server>,
        shutdown: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let collector = Arc::clone(self);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(
                tokio::time::Instant::now() + collector.interval,
                collector.interval,
            );
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => collector.sample(&server).await,
                }
            }
        })
    }
}

impl Default for StatsCollector {
    fn default() -> Self {
        Self::new(Duration::from_secs(5), 30)
    }
}

fn push_bounded(series: &mut VecDeque<CountSample>, sample: CountSample, limit: usize) {
    series.push_back(sample);
    while series.len() > limit {
        series.pop_front();
    }
}
