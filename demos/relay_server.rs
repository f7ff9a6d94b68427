//! Relay Server - Accepts RTSP publishers and pulls remote streams
//!
//! Run with: cargo run --example relay_server -- [bind_addr] [pull_url ...]
//!
//! Publish with ffmpeg:
//!
//! ```text
//! ffmpeg -re -i input.mp4 -c copy -f rtsp -rtsp_transport tcp rtsp://localhost:8554/live
//! ```
//!
//! Watch with ffplay:
//!
//! ```text
//! ffplay -rtsp_transport tcp rtsp://localhost:8554/live
//! ```
//!
//! Any extra arguments are remote RTSP URLs kept pulled under their own path.
//! Server stats are printed every 10 seconds.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use rtsp_relay::stats::{player_infos, pusher_infos, server_info};
use rtsp_relay::{PullDriver, PullTarget, Server, ServerConfig, StatsCollector};
use tokio_util::sync::CancellationToken;

fn print_usage() {
    eprintln!("Usage: relay_server [bind_addr] [pull_url ...]");
    eprintln!();
    eprintln!("  bind_addr   Address to listen on (default 0.0.0.0:8554)");
    eprintln!("  pull_url    rtsp:// URL to relay, may be repeated");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().skip(1).collect();

    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_usage();
        return Ok(());
    }

    let (bind_addr, pulls): (SocketAddr, &[String]) = match args.first() {
        Some(first) if !first.starts_with("rtsp://") => (first.parse()?, &args[1..]),
        _ => ("0.0.0.0:8554".parse()?, &args[..]),
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("rtsp_relay=debug".parse()?)
                .add_directive("relay_server=info".parse()?),
        )
        .init();

    let server = Server::new(ServerConfig::with_addr(bind_addr));
    let shutdown = CancellationToken::new();

    println!("Starting RTSP relay on {}", bind_addr);

    let accept = tokio::spawn({
        let server = Arc::clone(&server);
        async move { server.start().await }
    });

    if !pulls.is_empty() {
        let targets = pulls.iter().map(PullTarget::new).collect();
        let driver = PullDriver::new(Arc::clone(&server), targets);
        tokio::spawn(driver.run(shutdown.clone()));
    }

    let collector = Arc::new(StatsCollector::default());
    collector.spawn_sampler(Arc::clone(&server), shutdown.clone());

    let reporter = tokio::spawn({
        let server = Arc::clone(&server);
        let collector = Arc::clone(&collector);
        let shutdown = shutdown.clone();
        async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(10));
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let info = server_info(&server, &collector);
                        println!("[{}] up {}", info.server, info.running_time);
                        for pusher in pusher_infos(&server, "localhost").await {
                            println!(
                                "  {} <- {} ({}, {} bytes in, {} viewers)",
                                pusher.url, pusher.source, pusher.trans_type, pusher.in_bytes, pusher.online
                            );
                        }
                        for player in player_infos(&server, "localhost").await {
                            println!("    viewer {} {} ({} bytes out)", player.id, player.url, player.out_bytes);
                        }
                    }
                }
            }
        }
    });

    tokio::signal::ctrl_c().await?;
    println!("Shutting down");

    shutdown.cancel();
    server.stop().await;
    reporter.await?;
    accept.await??;

    Ok(())
}
