//! Per-track media transport
//!
//! Each SETUP binds one SDP track to either an interleaved channel pair on
//! the control connection or a pair of UDP sockets. All tracks of one
//! session share the same mode.

use std::collections::BTreeMap;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use tokio::net::UdpSocket;

use crate::error::{Error, Result};
use crate::protocol::TransType;
use crate::pusher::PacketKind;

/// Server-side sockets for one UDP track and where the peer listens
#[derive(Debug, Clone)]
pub struct UdpPair {
    pub rtp: Arc<UdpSocket>,
    pub rtcp: Arc<UdpSocket>,
    pub peer_rtp: SocketAddr,
    pub peer_rtcp: SocketAddr,
}

impl UdpPair {
    /// Local RTP/RTCP port pair
    pub fn server_ports(&self) -> io::Result<(u16, u16)> {
        Ok((self.rtp.local_addr()?.port(), self.rtcp.local_addr()?.port()))
    }

    /// Socket and destination for a packet kind
    pub fn route(&self, kind: PacketKind) -> (&Arc<UdpSocket>, SocketAddr) {
        match kind {
            PacketKind::Rtp => (&self.rtp, self.peer_rtp),
            PacketKind::Rtcp => (&self.rtcp, self.peer_rtcp),
        }
    }
}

/// How one track's packets travel
#[derive(Debug, Clone)]
pub enum TrackTransport {
    Interleaved { rtp_channel: u8, rtcp_channel: u8 },
    Udp(UdpPair),
}

impl TrackTransport {
    pub fn trans_type(&self) -> TransType {
        match self {
            TrackTransport::Interleaved { .. } => TransType::Tcp,
            TrackTransport::Udp(_) => TransType::Udp,
        }
    }
}

/// Tracks set up on a session, keyed by SDP track index
#[derive(Debug, Default)]
pub struct TrackTable {
    tracks: BTreeMap<usize, TrackTransport>,
}

impl TrackTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a track, rejecting a transport mode that differs from the
    /// tracks already set up
    pub fn insert(&mut self, track: usize, transport: TrackTransport) -> Result<()> {
        if let Some(mode) = self.trans_type() {
            if mode != transport.trans_type() {
                return Err(Error::TransportMismatch(format!(
                    "track {} requested {} but session uses {}",
                    track,
                    transport.trans_type(),
                    mode
                )));
            }
        }

        if let TrackTransport::Interleaved { rtp_channel, rtcp_channel } = &transport {
            let (rtp_channel, rtcp_channel) = (*rtp_channel, *rtcp_channel);
            let clash = self.tracks.iter().any(|(&other, t)| {
                other != track
                    && matches!(t, TrackTransport::Interleaved { rtp_channel: a, rtcp_channel: b }
                        if [*a, *b].contains(&rtp_channel) || [*a, *b].contains(&rtcp_channel))
            });
            if clash {
                return Err(Error::TransportMismatch(format!(
                    "interleaved channels {}-{} already in use",
                    rtp_channel, rtcp_channel
                )));
            }
        }

        self.tracks.insert(track, transport);
        Ok(())
    }

    pub fn get(&self, track: usize) -> Option<&TrackTransport> {
        self.tracks.get(&track)
    }

    /// Map an interleaved channel back to its track
    pub fn by_channel(&self, channel: u8) -> Option<(usize, PacketKind)> {
        self.tracks.iter().find_map(|(&track, t)| match *t {
            TrackTransport::Interleaved { rtp_channel, .. } if rtp_channel == channel => {
                Some((track, PacketKind::Rtp))
            }
            TrackTransport::Interleaved { rtcp_channel, .. } if rtcp_channel == channel => {
                Some((track, PacketKind::Rtcp))
            }
            _ => None,
        })
    }

    /// Mode shared by all tracks, if any are set up
    pub fn trans_type(&self) -> Option<TransType> {
        self.tracks.values().next().map(TrackTransport::trans_type)
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &TrackTransport)> {
        self.tracks.iter().map(|(&k, v)| (k, v))
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }
}

/// Bind an RTP/RTCP socket pair on consecutive ports, RTP on the even one
///
/// Falls back to any two ports if no consecutive pair turns up after a few
/// tries.
pub async fn bind_udp_pair(ip: IpAddr) -> io::Result<(UdpSocket, UdpSocket)> {
    for _ in 0..16 {
        let rtp = UdpSocket::bind(SocketAddr::new(ip, 0)).await?;
        let port = rtp.local_addr()?.port();
        if port % 2 != 0 || port == u16::MAX {
            continue;
        }

        if let Ok(rtcp) = UdpSocket::bind(SocketAddr::new(ip, port + 1)).await {
            return Ok((rtp, rtcp));
        }
    }

    let rtp = UdpSocket::bind(SocketAddr::new(ip, 0)).await?;
    let rtcp = UdpSocket::bind(SocketAddr::new(ip, 0)).await?;
    Ok((rtp, rtcp))
}
