//! End-to-end relay tests over loopback

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;

use rtsp_relay::protocol::{
    InterleavedFrame, Message, Method, RtspCodec, RtspRequest, RtspResponse, Transport,
};
use rtsp_relay::{ClientConfig, PusherSource, RtspClient, Server, ServerConfig, TransType};

const SDP: &str = "v=0\r\n\
o=- 0 0 IN IP4 127.0.0.1\r\n\
s=relay test\r\n\
t=0 0\r\n\
m=video 0 RTP/AVP 96\r\n\
a=rtpmap:96 H264/90000\r\n\
a=control:trackID=0\r\n\
m=audio 0 RTP/AVP 97\r\n\
a=rtpmap:97 MPEG4-GENERIC/44100/2\r\n\
a=control:trackID=1\r\n";

const WAIT: Duration = Duration::from_secs(5);

struct Relay {
    server: Arc<Server>,
    addr: SocketAddr,
    task: JoinHandle<rtsp_relay::Result<()>>,
}

impl Relay {
    async fn start() -> Self {
        Self::with_config(local_config()).await
    }

    async fn with_config(config: ServerConfig) -> Self {
        let server = Server::new(config);
        let listener = server.bind().await.unwrap();
        let addr = listener.local_addr().unwrap();
        let task = tokio::spawn({
            let server = Arc::clone(&server);
            async move { server.serve(listener).await }
        });
        Self { server, addr, task }
    }

    fn url(&self, path: &str) -> String {
        format!("rtsp://{}{}", self.addr, path)
    }

    async fn shutdown(self) {
        self.server.stop().await;
        self.task.await.unwrap().unwrap();
    }
}

fn local_config() -> ServerConfig {
    ServerConfig::with_addr("127.0.0.1:0".parse().unwrap())
}

/// Minimal RTSP peer driving the relay by hand
struct Peer {
    framed: Framed<TcpStream, RtspCodec>,
    cseq: u32,
    session: Option<String>,
}

impl Peer {
    async fn connect(addr: SocketAddr) -> Self {
        let socket = TcpStream::connect(addr).await.unwrap();
        Self {
            framed: Framed::new(socket, RtspCodec::default()),
            cseq: 0,
            session: None,
        }
    }

    async fn send(&mut self, mut request: RtspRequest) -> RtspResponse {
        self.cseq += 1;
        request.headers.insert("CSeq", self.cseq.to_string());
        if let Some(session) = &self.session {
            if request.headers.get("Session").is_none() {
                request.headers.insert("Session", session.clone());
            }
        }
        self.framed.send(Message::Request(request)).await.unwrap();

        loop {
            let message = tokio::time::timeout(WAIT, self.framed.next())
                .await
                .expect("timed out waiting for response")
                .expect("connection closed")
                .unwrap();
            if let Message::Response(response) = message {
                assert_eq!(response.cseq(), Some(self.cseq));
                if let Some(session) = response.session() {
                    self.session = Some(session.to_string());
                }
                return response;
            }
        }
    }

    async fn request(&mut self, method: Method, uri: &str) -> RtspResponse {
        self.send(RtspRequest::new(method, uri)).await
    }

    async fn setup(&mut self, uri: &str, transport: &str) -> RtspResponse {
        self.send(RtspRequest::new(Method::Setup, uri).header("Transport", transport))
            .await
    }

    async fn push(&mut self, channel: u8, payload: &'static [u8]) {
        self.push_bytes(channel, Bytes::from_static(payload)).await;
    }

    async fn push_bytes(&mut self, channel: u8, payload: Bytes) {
        let frame = InterleavedFrame { channel, payload };
        self.framed.send(Message::Frame(frame)).await.unwrap();
    }

    async fn next_frame(&mut self) -> InterleavedFrame {
        loop {
            let message = tokio::time::timeout(WAIT, self.framed.next())
                .await
                .expect("timed out waiting for frame")
                .expect("connection closed")
                .unwrap();
            if let Message::Frame(frame) = message {
                return frame;
            }
        }
    }

    /// Wait for the relay to drop the connection
    async fn closed(&mut self) {
        let deadline = tokio::time::Instant::now() + WAIT;
        loop {
            match tokio::time::timeout_at(deadline, self.framed.next()).await {
                Ok(None) | Ok(Some(Err(_))) => return,
                Ok(Some(Ok(_))) => continue,
                Err(_) => panic!("connection still open"),
            }
        }
    }
}

async fn publish(relay: &Relay, path: &str) -> Peer {
    let url = relay.url(path);
    let mut publisher = Peer::connect(relay.addr).await;

    let announce = RtspRequest::new(Method::Announce, &url).with_body("application/sdp", SDP);
    assert_eq!(publisher.send(announce).await.status, 200);

    let setup = publisher
        .setup(
            &format!("{}/trackID=0", url),
            "RTP/AVP/TCP;unicast;interleaved=0-1;mode=record",
        )
        .await;
    assert_eq!(setup.status, 200);
    assert!(setup.session().is_some());

    let setup = publisher
        .setup(
            &format!("{}/trackID=1", url),
            "RTP/AVP/TCP;unicast;interleaved=2-3;mode=record",
        )
        .await;
    assert_eq!(setup.status, 200);

    assert_eq!(publisher.request(Method::Record, &url).await.status, 200);
    publisher
}

async fn play(addr: SocketAddr, url: &str) -> Peer {
    let mut viewer = Peer::connect(addr).await;

    let describe = viewer.request(Method::Describe, url).await;
    assert_eq!(describe.status, 200);
    assert!(describe.body.starts_with(b"v=0"));

    let setup = viewer
        .setup(&format!("{}/trackID=0", url), "RTP/AVP/TCP;unicast;interleaved=0-1")
        .await;
    assert_eq!(setup.status, 200);
    assert!(setup.headers.get("Transport").unwrap().contains("interleaved=0-1"));

    assert_eq!(viewer.request(Method::Play, url).await.status, 200);
    viewer
}

async fn wait_until_gone(server: &Server, path: &str) {
    for _ in 0..200 {
        if server.get_pusher(path).await.is_none() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("pusher for {} still registered", path);
}

#[tokio::test]
async fn test_publish_and_fan_out() {
    let relay = Relay::start().await;
    let url = relay.url("/cam1");

    let mut publisher = publish(&relay, "/cam1").await;
    let pusher = relay.server.get_pusher("/cam1").await.unwrap();
    assert_eq!(pusher.sdp().tracks().len(), 2);
    assert!(!pusher.source().is_pull());

    let mut viewers = Vec::new();
    for _ in 0..3 {
        viewers.push(play(relay.addr, &url).await);
    }
    assert_eq!(pusher.player_count().await, 3);

    let packets: [&'static [u8]; 4] = [b"rtp-1", b"rtp-2", b"rtp-3", b"rtp-4"];
    for packet in packets {
        publisher.push(0, packet).await;
    }
    // Track 1 was not set up by the viewers
    publisher.push(2, b"audio").await;
    publisher.push(1, b"rtcp").await;

    for viewer in &mut viewers {
        for packet in packets {
            let frame = viewer.next_frame().await;
            assert_eq!(frame.channel, 0);
            assert_eq!(&frame.payload[..], packet);
        }
        let rtcp = viewer.next_frame().await;
        assert_eq!(rtcp.channel, 1);
        assert_eq!(&rtcp.payload[..], b"rtcp");
    }

    assert_eq!(pusher.in_bytes(), 4 * 5 + 5 + 4);

    drop(publisher);
    wait_until_gone(&relay.server, "/cam1").await;
    for viewer in &mut viewers {
        viewer.closed().await;
    }
    assert_eq!(pusher.player_count().await, 0);

    relay.shutdown().await;
}

#[tokio::test]
async fn test_last_publisher_wins() {
    let relay = Relay::start().await;
    let url = relay.url("/cam1");

    let mut first = publish(&relay, "/cam1").await;
    let mut viewer = play(relay.addr, &url).await;
    let old = relay.server.get_pusher("/cam1").await.unwrap();

    let mut second = publish(&relay, "/cam1").await;
    let current = relay.server.get_pusher("/cam1").await.unwrap();
    assert_ne!(current.id(), old.id());
    assert!(old.is_stopped());

    first.closed().await;
    viewer.closed().await;

    // The displaced publisher leaving must not remove its successor
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(relay.server.get_pusher("/cam1").await.unwrap().id(), current.id());

    let mut viewer = play(relay.addr, &url).await;
    second.push(0, b"fresh").await;
    assert_eq!(&viewer.next_frame().await.payload[..], b"fresh");

    relay.shutdown().await;
}

#[tokio::test]
async fn test_error_statuses() {
    let relay = Relay::start().await;
    let url = relay.url("/missing");
    let mut peer = Peer::connect(relay.addr).await;

    let options = peer.request(Method::Options, &url).await;
    assert_eq!(options.status, 200);
    assert!(options.headers.get("Public").unwrap().contains("DESCRIBE"));

    assert_eq!(peer.request(Method::Describe, &url).await.status, 404);
    assert_eq!(peer.request(Method::Play, &url).await.status, 455);
    assert_eq!(
        peer.request(Method::Other("FLY".into()), &url).await.status,
        501
    );

    let announce = RtspRequest::new(Method::Announce, &url).with_body("application/sdp", SDP);
    assert_eq!(peer.send(announce).await.status, 200);
    assert_eq!(
        peer.setup(&format!("{}/trackID=0", url), "RTP/AVP;multicast").await.status,
        461
    );
    assert_eq!(
        peer.setup(&format!("{}/trackID=9", url), "RTP/AVP/TCP;interleaved=0-1")
            .await
            .status,
        404
    );
    assert_eq!(
        peer.setup(&format!("{}/trackID=0", url), "RTP/AVP/TCP;interleaved=0-1")
            .await
            .status,
        200
    );

    let wrong = RtspRequest::new(Method::Record, &url).header("Session", "not-ours");
    assert_eq!(peer.send(wrong).await.status, 454);

    relay.shutdown().await;
}

#[tokio::test]
async fn test_stop_closes_everyone() {
    let relay = Relay::start().await;
    let url = relay.url("/cam1");

    let mut publisher = publish(&relay, "/cam1").await;
    let mut viewer = play(relay.addr, &url).await;
    let pusher = relay.server.get_pusher("/cam1").await.unwrap();

    relay.server.stop().await;
    relay.server.stop().await;

    publisher.closed().await;
    viewer.closed().await;
    assert!(pusher.is_stopped());
    assert_eq!(relay.server.pusher_count().await, 0);

    relay.task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_pull_from_upstream() {
    let upstream = Relay::start().await;
    let edge = Relay::start().await;

    let mut publisher = publish(&upstream, "/cam1").await;

    let config = ClientConfig::new(upstream.url("/cam1"))
        .custom_path("/mirror")
        .heartbeat_interval(Duration::ZERO);
    let client = RtspClient::new(config).unwrap();
    assert_eq!(client.path(), "/mirror");

    let pulled = client.start().await.unwrap();
    assert!(matches!(pulled.source(), PusherSource::Pull { .. }));
    assert!(edge.server.add_pusher(Arc::clone(&pulled)).await);

    let upstream_pusher = upstream.server.get_pusher("/cam1").await.unwrap();
    assert_eq!(upstream_pusher.player_count().await, 1);

    let mut viewer = play(edge.addr, &edge.url("/mirror")).await;
    publisher.push(0, b"relayed").await;

    let frame = viewer.next_frame().await;
    assert_eq!(frame.channel, 0);
    assert_eq!(&frame.payload[..], b"relayed");

    // Upstream going away takes the pulled stream down with it
    drop(publisher);
    wait_until_gone(&edge.server, "/mirror").await;
    viewer.closed().await;

    edge.shutdown().await;
    upstream.shutdown().await;
}

/// True once a fresh connection gets an OPTIONS reply
async fn accepts_connection(addr: SocketAddr) -> bool {
    let Ok(socket) = TcpStream::connect(addr).await else {
        return false;
    };
    let mut framed = Framed::new(socket, RtspCodec::default());
    let options = RtspRequest::new(Method::Options, format!("rtsp://{}/", addr)).header("CSeq", "1");
    if framed.send(Message::Request(options)).await.is_err() {
        return false;
    }
    matches!(
        tokio::time::timeout(Duration::from_secs(1), framed.next()).await,
        Ok(Some(Ok(Message::Response(response)))) if response.status == 200
    )
}

async fn wait_for<F, Fut>(mut check: F, what: &str)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..250 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("timed out waiting for {}", what);
}

#[tokio::test]
async fn test_stalled_viewer_is_released() {
    let config = local_config().max_connections(2).player_queue_capacity(4);
    let relay = Relay::with_config(config).await;
    let url = relay.url("/cam1");

    let mut publisher = publish(&relay, "/cam1").await;
    // Never reads after PLAY
    let _stalled = play(relay.addr, &url).await;
    let pusher = relay.server.get_pusher("/cam1").await.unwrap();
    assert_eq!(pusher.player_count().await, 1);

    let payload = Bytes::from(vec![0x5a; 60_000]);
    let mut dropped = false;
    for sent in 1..=4_000 {
        publisher.push_bytes(0, payload.clone()).await;
        if sent % 8 == 0 && pusher.player_count().await == 0 {
            dropped = true;
            break;
        }
    }
    assert!(dropped, "stalled viewer was never dropped");

    // The stalled session must give its connection slot back
    wait_for(|| accepts_connection(relay.addr), "a free connection slot").await;
    assert!(relay.server.get_pusher("/cam1").await.is_some());

    relay.shutdown().await;
}

#[tokio::test]
async fn test_pull_idle_timeout_removes_pusher() {
    let upstream = Relay::start().await;
    let edge = Relay::start().await;

    // Announces and records but never sends media
    let _publisher = publish(&upstream, "/quiet").await;

    let config = ClientConfig::new(upstream.url("/quiet"))
        .idle_timeout(Duration::from_millis(300))
        .heartbeat_interval(Duration::ZERO);
    let pulled = RtspClient::new(config).unwrap().start().await.unwrap();
    assert!(edge.server.add_pusher(Arc::clone(&pulled)).await);

    let upstream_pusher = upstream.server.get_pusher("/quiet").await.unwrap();
    assert_eq!(upstream_pusher.player_count().await, 1);

    wait_until_gone(&edge.server, "/quiet").await;
    wait_for(
        || {
            let pulled = Arc::clone(&pulled);
            async move { pulled.is_stopped() }
        },
        "pulled pusher to stop",
    )
    .await;

    // TEARDOWN ends the upstream viewer session
    wait_for(
        || {
            let pusher = Arc::clone(&upstream_pusher);
            async move { pusher.player_count().await == 0 }
        },
        "upstream viewer to detach",
    )
    .await;

    edge.shutdown().await;
    upstream.shutdown().await;
}

/// Scripted upstream answering one pull handshake
///
/// Reports the method and Session header of the first request after PLAY.
async fn scripted_upstream(listener: TcpListener, report: oneshot::Sender<(Method, Option<String>)>) {
    let (socket, _) = listener.accept().await.unwrap();
    let mut framed = Framed::new(socket, RtspCodec::default());
    let mut playing = false;

    while let Some(Ok(message)) = framed.next().await {
        let Message::Request(request) = message else {
            continue;
        };
        if playing {
            let _ = report.send((request.method.clone(), request.session().map(str::to_string)));
            return;
        }

        let mut response = RtspResponse::ok();
        match request.method {
            Method::Describe => {
                response = response
                    .header("Content-Base", format!("{}/", request.uri))
                    .with_body("application/sdp", SDP);
            }
            Method::Setup => {
                let transport = request.headers.get("Transport").unwrap_or_default().to_string();
                response = response
                    .header("Session", "feedface;timeout=60")
                    .header("Transport", transport);
            }
            Method::Play => playing = true,
            _ => {}
        }
        if let Some(cseq) = request.cseq() {
            response.headers.insert("CSeq", cseq.to_string());
        }
        framed.send(Message::Response(response)).await.unwrap();
    }
}

#[tokio::test]
async fn test_pull_sends_heartbeat() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (report_tx, report_rx) = oneshot::channel();
    let upstream = tokio::spawn(scripted_upstream(listener, report_tx));

    let config = ClientConfig::new(format!("rtsp://{}/cam1", addr))
        .heartbeat_interval(Duration::from_millis(100))
        .idle_timeout(Duration::from_secs(10));
    let pulled = RtspClient::new(config).unwrap().start().await.unwrap();
    assert_eq!(pulled.sdp().tracks().len(), 2);

    let (method, session) = tokio::time::timeout(WAIT, report_rx).await.unwrap().unwrap();
    assert_eq!(method, Method::Options);
    assert_eq!(session.as_deref(), Some("feedface"));

    pulled.stop().await;
    upstream.await.unwrap();
}

async fn udp_pair() -> (UdpSocket, UdpSocket, String) {
    let rtp = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let rtcp = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let ports = format!(
        "{}-{}",
        rtp.local_addr().unwrap().port(),
        rtcp.local_addr().unwrap().port()
    );
    (rtp, rtcp, ports)
}

fn server_ports(response: &RtspResponse) -> (u16, u16) {
    let header = response.headers.get("Transport").unwrap();
    Transport::parse(header).unwrap().server_port.unwrap()
}

async fn recv_datagram(socket: &UdpSocket) -> Vec<u8> {
    let mut buf = [0u8; 1500];
    let (n, _) = tokio::time::timeout(WAIT, socket.recv_from(&mut buf))
        .await
        .expect("timed out waiting for datagram")
        .unwrap();
    buf[..n].to_vec()
}

#[tokio::test]
async fn test_udp_publish_and_view() {
    let relay = Relay::start().await;
    let url = relay.url("/udp");
    let track = format!("{}/trackID=0", url);

    let mut publisher = Peer::connect(relay.addr).await;
    let announce = RtspRequest::new(Method::Announce, &url).with_body("application/sdp", SDP);
    assert_eq!(publisher.send(announce).await.status, 200);

    let (pub_rtp, pub_rtcp, pub_ports) = udp_pair().await;
    let setup = publisher
        .setup(&track, &format!("RTP/AVP;unicast;client_port={};mode=record", pub_ports))
        .await;
    assert_eq!(setup.status, 200);
    let (ingest_rtp, ingest_rtcp) = server_ports(&setup);
    assert_eq!(publisher.request(Method::Record, &url).await.status, 200);

    let pusher = relay.server.get_pusher("/udp").await.unwrap();
    assert_eq!(pusher.trans_type(), TransType::Udp);

    let mut viewer = Peer::connect(relay.addr).await;
    assert_eq!(viewer.request(Method::Describe, &url).await.status, 200);
    let (view_rtp, view_rtcp, view_ports) = udp_pair().await;
    let setup = viewer
        .setup(&track, &format!("RTP/AVP;unicast;client_port={}", view_ports))
        .await;
    assert_eq!(setup.status, 200);
    let (_, egress_rtcp) = server_ports(&setup);
    assert_eq!(viewer.request(Method::Play, &url).await.status, 200);

    pub_rtp.send_to(b"udp-rtp", ("127.0.0.1", ingest_rtp)).await.unwrap();
    assert_eq!(recv_datagram(&view_rtp).await, b"udp-rtp");

    pub_rtcp.send_to(b"udp-sr", ("127.0.0.1", ingest_rtcp)).await.unwrap();
    assert_eq!(recv_datagram(&view_rtcp).await, b"udp-sr");

    // Receiver reports from the viewer are counted against its Player
    let player = pusher.players().await.pop().unwrap();
    view_rtcp.send_to(b"rr", ("127.0.0.1", egress_rtcp)).await.unwrap();
    wait_for(
        || {
            let player = Arc::clone(&player);
            async move { player.in_bytes() == 2 }
        },
        "receiver report to be counted",
    )
    .await;
    assert_eq!(player.out_bytes(), 7 + 6);

    relay.shutdown().await;
}

#[tokio::test]
async fn test_rebind_by_session_token() {
    let relay = Relay::start().await;
    let url = relay.url("/cam1");
    let track = format!("{}/trackID=0", url);

    let mut publisher = publish(&relay, "/cam1").await;
    let mut first = play(relay.addr, &url).await;
    let token = first.session.clone().unwrap();
    let pusher = relay.server.get_pusher("/cam1").await.unwrap();

    publisher.push(0, b"one").await;
    assert_eq!(&first.next_frame().await.payload[..], b"one");

    let player = pusher.players().await.pop().unwrap();
    wait_for(
        || {
            let player = Arc::clone(&player);
            async move { player.out_bytes() == 3 }
        },
        "first delivery to be counted",
    )
    .await;

    // Same RTSP session over a new connection
    let mut second = Peer::connect(relay.addr).await;
    assert_eq!(second.request(Method::Describe, &url).await.status, 200);
    let setup = RtspRequest::new(Method::Setup, &track)
        .header("Transport", "RTP/AVP/TCP;unicast;interleaved=0-1")
        .header("Session", token.clone());
    assert_eq!(second.send(setup).await.status, 200);
    assert_eq!(second.session.as_deref(), Some(token.as_str()));
    assert_eq!(second.request(Method::Play, &url).await.status, 200);

    first.closed().await;

    let players = pusher.players().await;
    assert_eq!(players.len(), 1);
    assert_eq!(players[0].id(), player.id());
    assert_eq!(players[0].start_at(), player.start_at());

    publisher.push(0, b"two").await;
    assert_eq!(&second.next_frame().await.payload[..], b"two");
    wait_for(
        || {
            let player = Arc::clone(&player);
            async move { player.out_bytes() == 6 }
        },
        "counters to carry over",
    )
    .await;

    relay.shutdown().await;
}

#[tokio::test]
async fn test_pause_and_resume() {
    let relay = Relay::start().await;
    let url = relay.url("/cam1");

    let mut publisher = publish(&relay, "/cam1").await;
    let mut viewer = play(relay.addr, &url).await;
    let pusher = relay.server.get_pusher("/cam1").await.unwrap();

    publisher.push(0, b"before").await;
    assert_eq!(&viewer.next_frame().await.payload[..], b"before");

    assert_eq!(viewer.request(Method::Pause, &url).await.status, 200);
    publisher.push(0, b"paused").await;
    wait_for(
        || {
            let pusher = Arc::clone(&pusher);
            async move { pusher.out_bytes() == 12 }
        },
        "paused unit to be queued",
    )
    .await;

    let resume = viewer.request(Method::Play, &url).await;
    assert_eq!(resume.status, 200);
    assert_eq!(pusher.player_count().await, 1);

    publisher.push(0, b"resumed").await;
    assert_eq!(&viewer.next_frame().await.payload[..], b"resumed");

    relay.shutdown().await;
}
