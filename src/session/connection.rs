//! Per-connection RTSP session
//!
//! One task per accepted TCP connection. It answers control requests,
//! forwards a publisher's media into its Pusher feed, and writes a viewer's
//! queued units back out with the framing negotiated at SETUP.

use std::future;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::Utc;
use futures::{SinkExt, StreamExt};
use tokio::net::{TcpStream, UdpSocket};
use tokio::sync::mpsc;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;

use super::handle::SessionHandle;
use super::state::{PublisherRole, Role, SessionPhase, SessionState, ViewerRole};
use super::tracks::{bind_udp_pair, TrackTransport, UdpPair};
use crate::error::{Error, ProtocolError, Result};
use crate::protocol::{
    status, uri_path, InterleavedFrame, Message, Method, RtspCodec, RtspRequest, RtspResponse,
    SessionDescription, TransType, Transport, PUBLIC_METHODS, USER_AGENT,
};
use crate::pusher::{MediaUnit, PacketKind, Player, Pusher, PusherFeed, PusherSource};
use crate::registry::AttachResult;
use crate::server::Server;

const UDP_RECV_BUFFER: usize = 64 * 1024;

/// RTSP session bound to one TCP connection
pub struct Session {
    state: SessionState,
    framed: Framed<TcpStream, RtspCodec>,
    server: Arc<Server>,
    closer: CancellationToken,
    local_ip: IpAddr,
    media_tx: mpsc::Sender<MediaUnit>,
    media_rx: mpsc::Receiver<MediaUnit>,
}

impl Session {
    /// Wrap an accepted connection
    ///
    /// Cancelling `closer` ends the session; the server hands out child
    /// tokens of its own shutdown token.
    pub fn new(
        id: u64,
        socket: TcpStream,
        peer_addr: SocketAddr,
        server: Arc<Server>,
        closer: CancellationToken,
    ) -> Self {
        let local_ip = socket
            .local_addr()
            .map(|addr| addr.ip())
            .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        let (media_tx, media_rx) = mpsc::channel(server.config().player_queue_capacity.max(1));
        let framed = Framed::new(socket, RtspCodec::new(server.config().max_message_size));

        Self {
            state: SessionState::new(id, peer_addr),
            framed,
            server,
            closer,
            local_ip,
            media_tx,
            media_rx,
        }
    }

    pub fn id(&self) -> u64 {
        self.state.id
    }

    /// Serve the connection until it closes, then release the role
    pub async fn run(mut self) -> Result<()> {
        tracing::debug!(
            session_id = self.state.id,
            peer = %self.state.peer_addr,
            "Session started"
        );

        let result = self.serve().await;
        self.cleanup().await;
        result
    }

    async fn serve(&mut self) -> Result<()> {
        let idle_timeout = self.server.config().idle_timeout;

        loop {
            let idle = (self.state.idle_timeout_applies() && !idle_timeout.is_zero())
                .then_some(idle_timeout);
            let viewing = self.state.phase == SessionPhase::Viewing;

            tokio::select! {
                biased;
                _ = self.closer.cancelled() => {
                    tracing::debug!(session_id = self.state.id, "Session closed by relay");
                    return Ok(());
                }
                unit = recv_media(&mut self.media_rx, viewing) => {
                    if let Some(unit) = unit {
                        self.deliver(unit).await?;
                    }
                }
                message = self.framed.next() => match message {
                    Some(Ok(message)) => {
                        if !self.on_message(message).await? {
                            return Ok(());
                        }
                    }
                    Some(Err(Error::Protocol(e))) => {
                        tracing::warn!(session_id = self.state.id, error = %e, "Malformed message");
                        let reply = RtspResponse::new(status::BAD_REQUEST).header("Server", USER_AGENT);
                        let _ = self.framed.send(Message::Response(reply)).await;
                        return Err(e.into());
                    }
                    Some(Err(e)) => return Err(e),
                    None => {
                        tracing::debug!(session_id = self.state.id, "Peer closed connection");
                        return Ok(());
                    }
                },
                _ = idle_sleep(idle) => return Err(Error::IdleTimeout(idle_timeout)),
            }
        }
    }

    /// Returns `false` when the session should end
    async fn on_message(&mut self, message: Message) -> Result<bool> {
        match message {
            Message::Request(request) => {
                let teardown = request.method == Method::Teardown;
                let response = self.handle_request(&request).await;
                self.send_response(&request, response).await?;
                Ok(!teardown)
            }
            Message::Response(response) => {
                tracing::debug!(
                    session_id = self.state.id,
                    status = response.status,
                    "Ignoring response from peer"
                );
                Ok(true)
            }
            Message::Frame(frame) => self.on_frame(frame).await,
        }
    }

    async fn handle_request(&mut self, request: &RtspRequest) -> RtspResponse {
        tracing::debug!(
            session_id = self.state.id,
            method = %request.method,
            uri = %request.uri,
            "Request"
        );

        if let (Some(ours), Some(theirs)) = (&self.state.rtsp_session, request.session()) {
            if ours != theirs {
                return RtspResponse::new(status::SESSION_NOT_FOUND);
            }
        }

        let result = match &request.method {
            Method::Options => Ok(RtspResponse::ok().header("Public", PUBLIC_METHODS)),
            Method::Announce => self.on_announce(request),
            Method::Describe => self.on_describe(request).await,
            Method::Setup => self.on_setup(request).await,
            Method::Record => self.on_record().await,
            Method::Play => self.on_play().await,
            Method::Pause => self.state.set_paused(true).map(|_| RtspResponse::ok()).map_err(Error::from),
            Method::GetParameter | Method::SetParameter | Method::Teardown => Ok(RtspResponse::ok()),
            Method::Other(name) => {
                tracing::debug!(session_id = self.state.id, method = %name, "Unsupported method");
                Ok(RtspResponse::new(status::NOT_IMPLEMENTED))
            }
        };

        result.unwrap_or_else(|e| {
            let code = status_for(&e);
            tracing::warn!(
                session_id = self.state.id,
                method = %request.method,
                status = code,
                error = %e,
                "Request failed"
            );
            RtspResponse::new(code)
        })
    }

    async fn send_response(&mut self, request: &RtspRequest, mut response: RtspResponse) -> Result<()> {
        if let Some(cseq) = request.cseq() {
            response.headers.insert("CSeq", cseq.to_string());
        }
        response.headers.insert("Server", USER_AGENT);
        if let Some(token) = &self.state.rtsp_session {
            response.headers.insert(
                "Session",
                format!("{};timeout={}", token, self.server.config().session_timeout.as_secs()),
            );
        }

        tracing::debug!(
            session_id = self.state.id,
            method = %request.method,
            status = response.status,
            "Response"
        );
        self.write(Message::Response(response)).await.map(|_| ())
    }

    /// Write one message; returns `false` if the session closed first
    async fn write(&mut self, message: Message) -> Result<bool> {
        tokio::select! {
            biased;
            _ = self.closer.cancelled() => Ok(false),
            sent = self.framed.send(message) => sent.map(|_| true),
        }
    }

    fn on_announce(&mut self, request: &RtspRequest) -> Result<RtspResponse> {
        let path = request_path(&request.uri)?;
        let sdp = SessionDescription::parse(&request.body)?;
        let tracks = sdp.tracks().len();

        self.state.begin_publish(&path, sdp)?;

        tracing::info!(
            session_id = self.state.id,
            path = %path,
            tracks = tracks,
            "Publish announced"
        );
        Ok(RtspResponse::ok())
    }

    async fn on_describe(&mut self, request: &RtspRequest) -> Result<RtspResponse> {
        let path = request_path(&request.uri)?;
        let Some(pusher) = self.server.get_pusher(&path).await else {
            tracing::debug!(session_id = self.state.id, path = %path, "No pusher for path");
            return Ok(RtspResponse::new(status::NOT_FOUND));
        };

        self.state.begin_view(&path, pusher.sdp().clone())?;

        Ok(RtspResponse::ok()
            .header("Content-Base", format!("{}/", request.uri.trim_end_matches('/')))
            .with_body("application/sdp", pusher.sdp().raw().clone()))
    }

    async fn on_setup(&mut self, request: &RtspRequest) -> Result<RtspResponse> {
        if self.state.phase == SessionPhase::Publishing {
            return Err(ProtocolError::InvalidState("SETUP after RECORD".into()).into());
        }

        let track = match self.state.sdp() {
            Some(sdp) => sdp.resolve_track(&request.uri),
            None => return Err(ProtocolError::InvalidState("SETUP before ANNOUNCE/DESCRIBE".into()).into()),
        };
        let Some(track) = track else {
            return Ok(RtspResponse::new(status::NOT_FOUND));
        };

        let header = request
            .headers
            .get("Transport")
            .ok_or_else(|| ProtocolError::InvalidTransport("missing Transport header".into()))?;
        let requested = Transport::parse(header)?;
        if requested.multicast {
            return Err(Error::TransportMismatch("multicast is not supported".into()));
        }

        let mut reply = match requested.trans_type {
            TransType::Tcp => {
                let (rtp_channel, rtcp_channel) = match requested.interleaved {
                    Some(pair) => pair,
                    None => default_channels(track)?,
                };
                self.state.tracks.insert(
                    track,
                    TrackTransport::Interleaved {
                        rtp_channel,
                        rtcp_channel,
                    },
                )?;

                let mut reply = Transport::interleaved(rtp_channel);
                reply.interleaved = Some((rtp_channel, rtcp_channel));
                reply
            }
            TransType::Udp => {
                let (client_rtp, client_rtcp) = requested
                    .client_port
                    .ok_or_else(|| Error::TransportMismatch("client_port is required".into()))?;

                let (rtp, rtcp) = bind_udp_pair(self.local_ip).await?;
                let peer_ip = self.state.peer_addr.ip();
                let pair = UdpPair {
                    rtp: Arc::new(rtp),
                    rtcp: Arc::new(rtcp),
                    peer_rtp: SocketAddr::new(peer_ip, client_rtp),
                    peer_rtcp: SocketAddr::new(peer_ip, client_rtcp),
                };
                let server_port = pair.server_ports()?;
                self.state.tracks.insert(track, TrackTransport::Udp(pair))?;

                let mut reply = Transport::udp((client_rtp, client_rtcp));
                reply.server_port = Some(server_port);
                reply
            }
        };

        if self.state.rtsp_session.is_none() {
            let token = match request.session() {
                Some(token) => token.to_string(),
                None => self.new_session_token(),
            };
            self.state.rtsp_session = Some(token);
        }

        reply.record = requested.record;

        tracing::debug!(
            session_id = self.state.id,
            track = track,
            transport = %reply.trans_type,
            "Track set up"
        );
        Ok(RtspResponse::ok().header("Transport", reply.to_header()))
    }

    async fn on_record(&mut self) -> Result<RtspResponse> {
        let (path, sdp) = match (&self.state.role, self.state.path()) {
            (Role::Publisher(publisher), Some(path)) if publisher.pusher.is_none() => {
                (path.to_string(), publisher.sdp.clone())
            }
            _ => return Err(ProtocolError::InvalidState("RECORD".into()).into()),
        };
        let Some(trans_type) = self.state.trans_type() else {
            return Err(ProtocolError::InvalidState("RECORD before SETUP".into()).into());
        };

        let source = PusherSource::Session {
            session_id: self.state.id,
            peer_addr: self.state.peer_addr,
        };
        let (pusher, feed) = Pusher::new(
            &path,
            source,
            trans_type,
            sdp,
            self.server.config().pusher_options(),
        );

        if !self.server.add_pusher(Arc::clone(&pusher)).await {
            tracing::warn!(session_id = self.state.id, path = %path, "Pusher could not be registered");
            return Ok(RtspResponse::new(status::SERVICE_UNAVAILABLE));
        }

        self.watch_feed(&feed);
        if trans_type == TransType::Udp {
            self.spawn_udp_publisher(&feed);
        }

        let pusher_id = pusher.id();
        self.state.start_publishing(pusher, feed)?;

        tracing::info!(
            session_id = self.state.id,
            pusher_id = pusher_id,
            path = %path,
            transport = %trans_type,
            "Publishing started"
        );
        Ok(RtspResponse::ok())
    }

    async fn on_play(&mut self) -> Result<RtspResponse> {
        let attached = match &self.state.role {
            Role::Viewer(viewer) => viewer.player.is_some(),
            _ => return Err(ProtocolError::InvalidState("PLAY".into()).into()),
        };
        if attached {
            // Resume after PAUSE
            self.state.set_paused(false)?;
            return Ok(RtspResponse::ok().header("Range", "npt=0.000-"));
        }

        let (Some(path), Some(trans_type)) = (self.state.path(), self.state.trans_type()) else {
            return Err(ProtocolError::InvalidState("PLAY before SETUP".into()).into());
        };
        let path = path.to_string();
        let token = match &self.state.rtsp_session {
            Some(token) => token.clone(),
            None => self.new_session_token(),
        };

        let handle = SessionHandle::new(
            self.state.id,
            token,
            &path,
            self.state.peer_addr,
            trans_type,
            self.media_tx.clone(),
            self.closer.clone(),
        );

        match self.server.try_attach_to_pusher(&handle).await {
            AttachResult::NotFound => Ok(RtspResponse::new(status::NOT_FOUND)),
            AttachResult::Rejected => Ok(RtspResponse::new(status::SERVICE_UNAVAILABLE)),
            AttachResult::Attached { pusher, player } => {
                if trans_type == TransType::Udp {
                    self.spawn_udp_viewer(&player);
                }

                tracing::info!(
                    session_id = self.state.id,
                    pusher_id = pusher.id(),
                    player_id = player.id(),
                    path = %path,
                    transport = %trans_type,
                    "Viewer attached"
                );
                self.state.start_viewing(pusher, player)?;
                Ok(RtspResponse::ok().header("Range", "npt=0.000-"))
            }
        }
    }

    /// Returns `false` when the session should end
    async fn on_frame(&mut self, frame: InterleavedFrame) -> Result<bool> {
        let len = frame.payload.len();
        self.state.in_bytes += len as u64;

        match &self.state.role {
            Role::Publisher(PublisherRole { feed: Some(feed), .. }) => {
                let Some((track, kind)) = self.state.tracks.by_channel(frame.channel) else {
                    tracing::trace!(
                        session_id = self.state.id,
                        channel = frame.channel,
                        "Frame on unknown channel"
                    );
                    return Ok(true);
                };

                let unit = MediaUnit {
                    seq: 0,
                    track,
                    kind,
                    data: frame.payload,
                };
                if feed.send(unit).await.is_err() {
                    tracing::info!(session_id = self.state.id, "Pusher stopped, closing publisher");
                    return Ok(false);
                }
            }
            Role::Viewer(ViewerRole { player: Some(player), .. }) => player.add_in_bytes(len),
            _ => {
                tracing::debug!(
                    session_id = self.state.id,
                    channel = frame.channel,
                    "Ignoring frame outside RECORD/PLAY"
                );
            }
        }

        Ok(true)
    }

    /// Write one queued unit to the viewer
    async fn deliver(&mut self, unit: MediaUnit) -> Result<()> {
        let player = match &self.state.role {
            Role::Viewer(ViewerRole {
                player: Some(player),
                paused: false,
                ..
            }) => Arc::clone(player),
            _ => return Ok(()),
        };
        let Some(transport) = self.state.tracks.get(unit.track).cloned() else {
            return Ok(());
        };

        let len = unit.len();
        match transport {
            TrackTransport::Interleaved {
                rtp_channel,
                rtcp_channel,
            } => {
                let channel = match unit.kind {
                    PacketKind::Rtp => rtp_channel,
                    PacketKind::Rtcp => rtcp_channel,
                };
                let frame = InterleavedFrame {
                    channel,
                    payload: unit.data,
                };
                if !self.write(Message::Frame(frame)).await? {
                    return Ok(());
                }
            }
            TrackTransport::Udp(pair) => {
                let (socket, peer) = pair.route(unit.kind);
                if let Err(e) = socket.send_to(&unit.data, peer).await {
                    tracing::debug!(session_id = self.state.id, error = %e, "UDP send failed");
                    return Ok(());
                }
            }
        }

        player.add_out_bytes(len);
        self.state.out_bytes += len as u64;
        Ok(())
    }

    /// Close the session once its Pusher stops (displaced or server stop)
    fn watch_feed(&self, feed: &PusherFeed) {
        let feed = feed.clone();
        let closer = self.closer.clone();

        tokio::spawn(async move {
            tokio::select! {
                _ = feed.closed() => closer.cancel(),
                _ = closer.cancelled() => {}
            }
        });
    }

    fn spawn_udp_publisher(&self, feed: &PusherFeed) {
        for (track, transport) in self.state.tracks.iter() {
            if let TrackTransport::Udp(pair) = transport {
                for (socket, kind) in [(&pair.rtp, PacketKind::Rtp), (&pair.rtcp, PacketKind::Rtcp)] {
                    tokio::spawn(udp_publish_loop(
                        self.state.id,
                        Arc::clone(socket),
                        track,
                        kind,
                        feed.clone(),
                        self.closer.clone(),
                    ));
                }
            }
        }
    }

    fn spawn_udp_viewer(&self, player: &Arc<Player>) {
        for (_, transport) in self.state.tracks.iter() {
            if let TrackTransport::Udp(pair) = transport {
                for socket in [&pair.rtp, &pair.rtcp] {
                    tokio::spawn(udp_drain_loop(
                        Arc::clone(socket),
                        Arc::clone(player),
                        self.closer.clone(),
                    ));
                }
            }
        }
    }

    fn new_session_token(&self) -> String {
        format!("{:X}{:04X}", Utc::now().timestamp_micros(), self.state.id & 0xFFFF)
    }

    /// Release the role exactly once
    async fn cleanup(&mut self) {
        self.closer.cancel();

        match self.state.close() {
            Role::Publisher(publisher) => {
                drop(publisher.feed);
                if let Some(pusher) = publisher.pusher {
                    self.server.remove_pusher(&pusher).await;
                }
            }
            Role::Viewer(viewer) => {
                if let (Some(pusher), Some(player)) = (viewer.pusher, viewer.player) {
                    pusher.detach_session(player.id(), self.state.id).await;
                }
            }
            Role::Unset => {}
        }

        tracing::info!(
            session_id = self.state.id,
            path = self.state.path().unwrap_or("-"),
            in_bytes = self.state.in_bytes,
            out_bytes = self.state.out_bytes,
            duration_secs = self.state.duration().as_secs(),
            "Session closed"
        );
    }
}

async fn recv_media(rx: &mut mpsc::Receiver<MediaUnit>, active: bool) -> Option<MediaUnit> {
    if active {
        rx.recv().await
    } else {
        future::pending().await
    }
}

async fn idle_sleep(timeout: Option<Duration>) {
    match timeout {
        Some(timeout) => tokio::time::sleep(timeout).await,
        None => future::pending().await,
    }
}

/// Forward datagrams from one publisher socket into the feed
async fn udp_publish_loop(
    session_id: u64,
    socket: Arc<UdpSocket>,
    track: usize,
    kind: PacketKind,
    feed: PusherFeed,
    closer: CancellationToken,
) {
    let mut buf = vec![0u8; UDP_RECV_BUFFER];

    loop {
        let n = tokio::select! {
            _ = closer.cancelled() => break,
            received = socket.recv_from(&mut buf) => match received {
                Ok((n, _)) => n,
                Err(e) => {
                    tracing::debug!(session_id = session_id, track = track, error = %e, "UDP receive failed");
                    break;
                }
            },
        };

        let unit = MediaUnit {
            seq: 0,
            track,
            kind,
            data: Bytes::copy_from_slice(&buf[..n]),
        };
        if feed.send(unit).await.is_err() {
            closer.cancel();
            break;
        }
    }
}

/// Count receiver reports arriving from a UDP viewer
async fn udp_drain_loop(socket: Arc<UdpSocket>, player: Arc<Player>, closer: CancellationToken) {
    let mut buf = vec![0u8; UDP_RECV_BUFFER];

    loop {
        tokio::select! {
            _ = closer.cancelled() => break,
            received = socket.recv_from(&mut buf) => match received {
                Ok((n, _)) => player.add_in_bytes(n),
                Err(_) => break,
            },
        }
    }
}

fn request_path(uri: &str) -> std::result::Result<String, ProtocolError> {
    uri_path(uri).ok_or_else(|| ProtocolError::InvalidRequestLine(format!("bad URL {}", uri)))
}

fn default_channels(track: usize) -> Result<(u8, u8)> {
    let rtp = track
        .checked_mul(2)
        .and_then(|c| u8::try_from(c).ok())
        .filter(|c| *c < u8::MAX)
        .ok_or_else(|| Error::TransportMismatch(format!("no interleaved channel for track {}", track)))?;
    Ok((rtp, rtp + 1))
}

/// Status code for a failed request
fn status_for(error: &Error) -> u16 {
    match error {
        Error::Protocol(ProtocolError::InvalidState(_)) => status::METHOD_NOT_VALID_IN_THIS_STATE,
        Error::Protocol(ProtocolError::InvalidTransport(_)) | Error::TransportMismatch(_) => {
            status::UNSUPPORTED_TRANSPORT
        }
        Error::Protocol(_) => status::BAD_REQUEST,
        _ => status::INTERNAL_SERVER_ERROR,
    }
}
