//! Admin statistics
//!
//! Serializable listings of live Pushers and Players, a server summary, and
//! a sampler that records how many of each were online over time.

pub mod collector;
pub mod report;

pub use collector::{CountSample, StatsCollector};
pub use report::{
    player_infos, pusher_infos, server_info, uptime_string, Listing, PlayerInfo, PusherInfo,
    ServerInfo,
};
