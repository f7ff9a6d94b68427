//! Admin-facing snapshots of Pushers, Players and the server
//!
//! Everything here serializes with camelCase keys.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::collector::{CountSample, StatsCollector};
use crate::protocol::{format_url, TransType};
use crate::pusher::{Player, Pusher, PusherSource};
use crate::server::Server;

/// One row of the Pusher listing
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PusherInfo {
    pub id: u64,
    pub url: String,
    pub path: String,
    pub source: PusherSource,
    pub trans_type: TransType,
    pub in_bytes: u64,
    pub out_bytes: u64,
    pub start_at: DateTime<Utc>,
    /// Number of attached Players
    pub online: usize,
}

impl PusherInfo {
    async fn collect(pusher: &Pusher, host: &str, port: u16) -> Self {
        Self {
            id: pusher.id(),
            url: format_url(host, port, pusher.path()),
            path: pusher.path().to_string(),
            source: pusher.source().clone(),
            trans_type: pusher.trans_type(),
            in_bytes: pusher.in_bytes(),
            out_bytes: pusher.out_bytes(),
            start_at: pusher.start_at(),
            online: pusher.player_count().await,
        }
    }
}

/// One row of the Player listing
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerInfo {
    pub id: u64,
    pub url: String,
    pub path: String,
    pub trans_type: TransType,
    pub in_bytes: u64,
    pub out_bytes: u64,
    pub start_at: DateTime<Utc>,
}

impl PlayerInfo {
    fn collect(player: &Player, host: &str, port: u16) -> Self {
        Self {
            id: player.id(),
            url: format_url(host, port, player.path()),
            path: player.path().to_string(),
            trans_type: player.trans_type(),
            in_bytes: player.in_bytes(),
            out_bytes: player.out_bytes(),
            start_at: player.start_at(),
        }
    }
}

/// Listing envelope
#[derive(Debug, Clone, Serialize)]
pub struct Listing<T> {
    pub total: usize,
    pub rows: Vec<T>,
}

impl<T> From<Vec<T>> for Listing<T> {
    fn from(rows: Vec<T>) -> Self {
        Self {
            total: rows.len(),
            rows,
        }
    }
}

/// Process-level summary with the count series
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerInfo {
    /// CPU architecture, upper case
    pub hardware: String,
    pub running_time: String,
    pub start_up_time: DateTime<Utc>,
    pub cpu_count: usize,
    pub server: String,
    pub pusher_data: Vec<CountSample>,
    pub player_data: Vec<CountSample>,
}

/// Every Pusher, ordered by path
///
/// `host` is the address viewers use to reach this server.
pub async fn pusher_infos(server: &Server, host: &str) -> Vec<PusherInfo> {
    let port = server.port();
    let mut pushers = server.pushers().await;
    pushers.sort_by(|a, b| a.path().cmp(b.path()));

    let mut rows = Vec::with_capacity(pushers.len());
    for pusher in &pushers {
        rows.push(PusherInfo::collect(pusher, host, port).await);
    }
    rows
}

/// Every Player of every Pusher, ordered by path then start time
pub async fn player_infos(server: &Server, host: &str) -> Vec<PlayerInfo> {
    let port = server.port();
    let mut rows = Vec::new();

    for pusher in server.pushers().await {
        for player in pusher.players().await {
            rows.push(PlayerInfo::collect(&player, host, port));
        }
    }

    rows.sort_by(|a, b| a.path.cmp(&b.path).then(a.start_at.cmp(&b.start_at)));
    rows
}

/// Summary of the running server
pub fn server_info(server: &Server, collector: &StatsCollector) -> ServerInfo {
    let started = server.started_at();
    let running = (Utc::now() - started).to_std().unwrap_or_default();
    let cpu_count = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);

    ServerInfo {
        hardware: std::env::consts::ARCH.to_uppercase(),
        running_time: uptime_string(running),
        start_up_time: started,
        cpu_count,
        server: format!(
            "{} {} for {}",
            env!("CARGO_PKG_NAME"),
            env!("CARGO_PKG_VERSION"),
            std::env::consts::OS
        ),
        pusher_data: collector.pusher_series(),
        player_data: collector.player_series(),
    }
}

/// `"2 Days 3 Hours 4 Mins 5 Secs"`
pub fn uptime_string(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    format!(
        "{} Days {} Hours {} Mins {} Secs",
        secs / 86_400,
        secs % 86_400 / 3_600,
        secs % 3_600 / 60,
        secs % 60
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pusher::entry::tests::{test_pusher, viewer};
    use crate::pusher::PusherOptions;
    use crate::server::ServerConfig;
    use std::sync::Arc;

    #[test]
    fn test_uptime_string() {
        assert_eq!(uptime_string(Duration::ZERO), "0 Days 0 Hours 0 Mins 0 Secs");
        assert_eq!(
            uptime_string(Duration::from_secs(2 * 86_400 + 3 * 3_600 + 4 * 60 + 5)),
            "2 Days 3 Hours 4 Mins 5 Secs"
        );
    }

    #[test]
    fn test_listing_envelope() {
        let listing = Listing::from(vec![1, 2, 3]);
        let json = serde_json::to_value(&listing).unwrap();

        assert_eq!(json["total"], 3);
        assert_eq!(json["rows"], serde_json::json!([1, 2, 3]));
    }

    #[tokio::test]
    async fn test_pusher_and_player_rows() {
        let server = Server::new(ServerConfig::with_addr("127.0.0.1:0".parse().unwrap()));
        let listener = server.bind().await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let task = tokio::spawn({
            let server = Arc::clone(&server);
            async move { server.serve(listener).await }
        });
        while server.is_stopped() {
            tokio::task::yield_now().await;
        }

        let (pusher, _feed) = test_pusher("/cam1", PusherOptions::default());
        assert!(server.add_pusher(Arc::clone(&pusher)).await);
        let (handle, _rx, _closer) = viewer("/cam1", "tok", 8);
        pusher.rebind_session(&handle).await.unwrap();

        let pushers = pusher_infos(&server, "10.0.0.5").await;
        assert_eq!(pushers.len(), 1);
        assert_eq!(pushers[0].url, format!("rtsp://10.0.0.5:{}/cam1", port));
        assert_eq!(pushers[0].online, 1);

        let json = serde_json::to_value(&pushers[0]).unwrap();
        assert_eq!(json["transType"], "TCP");
        assert_eq!(json["inBytes"], 0);
        assert!(json.get("startAt").is_some());

        let players = player_infos(&server, "10.0.0.5").await;
        assert_eq!(players.len(), 1);
        assert_eq!(players[0].path, "/cam1");
        assert_eq!(players[0].url, pushers[0].url);

        server.stop().await;
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_server_info() {
        let server = Server::new(ServerConfig::default());
        let collector = StatsCollector::default();
        collector.sample(&server).await;

        let info = server_info(&server, &collector);
        assert!(info.cpu_count >= 1);
        assert_eq!(info.hardware, std::env::consts::ARCH.to_uppercase());
        assert_eq!(info.pusher_data.len(), 1);

        let json = serde_json::to_value(&info).unwrap();
        assert!(json.get("runningTime").is_some());
        assert!(json.get("startUpTime").is_some());
        assert!(json.get("playerData").is_some());
    }
}
