//! RTSP pull client
//!
//! Plays a stream from an upstream server over interleaved TCP and feeds it
//! into a local Pusher, so local viewers can attach as if it had been
//! published here.
//!
//! # Example
//! ```no_run
//! use std::sync::Arc;
//! use rtsp_relay::client::{ClientConfig, RtspClient};
//! use rtsp_relay::server::{Server, ServerConfig};
//!
//! # async fn example() -> rtsp_relay::error::Result<()> {
//! let server = Server::new(ServerConfig::default());
//! let client = RtspClient::new(ClientConfig::new("rtsp://camera.local/stream1"))?;
//!
//! let pusher = client.start().await?;
//! if !server.add_pusher(Arc::clone(&pusher)).await {
//!     pusher.stop().await;
//! }
//! # Ok(())
//! # }
//! ```

use std::future;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::time::{self, Instant, Interval};
use tokio_util::codec::Framed;
use url::Url;

use super::config::ClientConfig;
use crate::error::{Error, Result};
use crate::protocol::{
    uri_path, Message, Method, RtspCodec, RtspRequest, RtspResponse, SessionDescription, TransType,
    Transport, DEFAULT_RTSP_PORT,
};
use crate::pusher::{MediaUnit, Pusher, PusherFeed, PusherSource};
use crate::session::{TrackTable, TrackTransport};

type Connection = Framed<TcpStream, RtspCodec>;

/// Pull agent for one upstream URL
#[derive(Debug)]
pub struct RtspClient {
    config: ClientConfig,
    url: Url,
    path: String,
    cseq: u32,
    session: Option<String>,
}

impl RtspClient {
    /// Validate the URL and derive the local path
    pub fn new(config: ClientConfig) -> Result<Self> {
        let url = Url::parse(&config.url)?;
        if url.scheme() != "rtsp" {
            return Err(Error::Connect(format!("unsupported scheme {}", url.scheme())));
        }

        let path = match config.custom_path.as_deref() {
            Some(custom) if custom.starts_with('/') => custom.to_string(),
            Some(custom) => format!("/{}", custom),
            None => uri_path(&config.url).unwrap_or_else(|| "/".to_string()),
        };

        Ok(Self {
            config,
            url,
            path,
            cseq: 0,
            session: None,
        })
    }

    /// Local path the pulled stream is published under
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn url(&self) -> &str {
        &self.config.url
    }

    /// Connect, negotiate and start pulling
    ///
    /// On success the returned Pusher is fed by a background task; register
    /// it with the server to make it visible. Nothing is left running on
    /// failure.
    pub async fn start(mut self) -> Result<Arc<Pusher>> {
        let connect_timeout = self.config.connect_timeout;
        let (framed, sdp, tracks) = time::timeout(connect_timeout, self.handshake())
            .await
            .map_err(|_| Error::Connect(format!("{}: timed out", self.config.url)))??;

        let (pusher, feed) = Pusher::new(
            self.path.clone(),
            PusherSource::Pull {
                url: self.config.url.clone(),
            },
            TransType::Tcp,
            sdp,
            self.config.pusher_options,
        );

        tracing::info!(
            url = %self.config.url,
            path = %self.path,
            pusher_id = pusher.id(),
            tracks = tracks.len(),
            "Pull started"
        );

        tokio::spawn(self.pull_loop(framed, feed, tracks));
        Ok(pusher)
    }

    async fn handshake(&mut self) -> Result<(Connection, SessionDescription, TrackTable)> {
        let host = self
            .url
            .host_str()
            .ok_or_else(|| Error::Connect(format!("{}: missing host", self.config.url)))?
            .to_string();
        let port = self.url.port().unwrap_or(DEFAULT_RTSP_PORT);

        let socket = TcpStream::connect((host.as_str(), port))
            .await
            .map_err(|e| Error::Connect(format!("{}:{}: {}", host, port, e)))?;
        socket.set_nodelay(true)?;
        let mut framed = Framed::new(socket, RtspCodec::default());

        let url = self.config.url.clone();

        let options = self.request(&mut framed, Method::Options, &url, &[]).await?;
        if !options.is_success() {
            tracing::debug!(url = %url, status = options.status, "OPTIONS refused, continuing");
        }

        let describe = self
            .request(&mut framed, Method::Describe, &url, &[("Accept", "application/sdp".into())])
            .await?;
        if !describe.is_success() {
            return Err(Error::Connect(format!(
                "DESCRIBE {} returned {} {}",
                url, describe.status, describe.reason
            )));
        }

        let sdp = SessionDescription::parse(&describe.body)
            .map_err(|e| Error::Negotiation(e.to_string()))?;
        let base = describe
            .headers
            .get("Content-Base")
            .or_else(|| describe.headers.get("Content-Location"))
            .unwrap_or(url.as_str())
            .to_string();

        let mut tracks = TrackTable::new();
        for index in 0..sdp.tracks().len() {
            let track_url = sdp
                .track_url(&base, index)
                .ok_or_else(|| Error::Negotiation(format!("no control URL for track {}", index)))?;
            let channel = u8::try_from(index * 2)
                .ok()
                .filter(|c| *c < u8::MAX)
                .ok_or_else(|| Error::Negotiation(format!("too many tracks ({})", sdp.tracks().len())))?;

            let offer = Transport::interleaved(channel).to_header();
            let setup = self
                .request(&mut framed, Method::Setup, &track_url, &[("Transport", offer)])
                .await?;
            if !setup.is_success() {
                return Err(Error::Negotiation(format!(
                    "SETUP {} returned {} {}",
                    track_url, setup.status, setup.reason
                )));
            }

            if self.session.is_none() {
                self.session = setup.session().map(str::to_string);
            }

            let reply = setup
                .headers
                .get("Transport")
                .map(Transport::parse)
                .transpose()
                .map_err(|e| Error::Negotiation(e.to_string()))?;
            let (rtp_channel, rtcp_channel) = match reply {
                Some(t) if t.trans_type != TransType::Tcp => {
                    return Err(Error::Negotiation(format!(
                        "SETUP {} answered with {} transport",
                        track_url, t.trans_type
                    )));
                }
                Some(Transport {
                    interleaved: Some(pair),
                    ..
                }) => pair,
                _ => (channel, channel + 1),
            };

            tracks
                .insert(index, TrackTransport::Interleaved { rtp_channel, rtcp_channel })
                .map_err(|e| Error::Negotiation(e.to_string()))?;
        }

        let play = self
            .request(&mut framed, Method::Play, &base, &[("Range", "npt=0.000-".into())])
            .await?;
        if !play.is_success() {
            return Err(Error::Negotiation(format!(
                "PLAY {} returned {} {}",
                base, play.status, play.reason
            )));
        }

        Ok((framed, sdp, tracks))
    }

    fn build_request(&mut self, method: Method, uri: &str, headers: &[(&str, String)]) -> RtspRequest {
        self.cseq += 1;

        let mut request = RtspRequest::new(method, uri)
            .header("CSeq", self.cseq.to_string())
            .header("User-Agent", self.config.user_agent.clone());
        if let Some(session) = &self.session {
            request = request.header("Session", session.clone());
        }
        for (name, value) in headers {
            request = request.header(*name, value.clone());
        }
        request
    }

    /// Send a request and wait for its response, skipping anything else
    async fn request(
        &mut self,
        framed: &mut Connection,
        method: Method,
        uri: &str,
        headers: &[(&str, String)],
    ) -> Result<RtspResponse> {
        let request = self.build_request(method, uri, headers);
        let cseq = self.cseq;
        framed.send(Message::Request(request)).await?;

        loop {
            match framed.next().await {
                Some(Ok(Message::Response(response))) => {
                    if response.cseq().map_or(true, |c| c == cseq) {
                        return Ok(response);
                    }
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(e),
                None => return Err(Error::Connect(format!("{}: connection closed", self.config.url))),
            }
        }
    }

    async fn pull_loop(mut self, mut framed: Connection, feed: PusherFeed, tracks: TrackTable) {
        let url = self.config.url.clone();
        let idle_timeout = self.config.idle_timeout;
        let heartbeat = self.config.heartbeat_interval;
        let mut ticker =
            (!heartbeat.is_zero()).then(|| time::interval_at(Instant::now() + heartbeat, heartbeat));
        let idle = time::sleep(idle_timeout);
        tokio::pin!(idle);

        let mut units: u64 = 0;
        loop {
            tokio::select! {
                _ = feed.closed() => {
                    tracing::info!(url = %url, "Pusher stopped, ending pull");
                    break;
                }
                _ = &mut idle, if !idle_timeout.is_zero() => {
                    tracing::info!(
                        url = %self.config.url,
                        error = %Error::IdleTimeout(idle_timeout),
                        "Pull ended"
                    );
                    break;
                }
                _ = tick(&mut ticker) => {
                    let keepalive = self.build_request(Method::Options, &url, &[]);
                    if let Err(e) = framed.send(Message::Request(keepalive)).await {
                        tracing::warn!(url = %self.config.url, error = %e, "Heartbeat failed");
                        break;
                    }
                }
                message = framed.next() => match message {
                    Some(Ok(Message::Frame(frame))) => {
                        if !idle_timeout.is_zero() {
                            idle.as_mut().reset(Instant::now() + idle_timeout);
                        }

                        let Some((track, kind)) = tracks.by_channel(frame.channel) else {
                            continue;
                        };
                        let unit = MediaUnit {
                            seq: 0,
                            track,
                            kind,
                            data: frame.payload,
                        };
                        if feed.send(unit).await.is_err() {
                            break;
                        }
                        units += 1;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::warn!(url = %self.config.url, error = %e, "Pull connection failed");
                        break;
                    }
                    None => {
                        tracing::info!(url = %self.config.url, "Upstream closed connection");
                        break;
                    }
                },
            }
        }

        let teardown = self.build_request(Method::Teardown, &url, &[]);
        let _ = time::timeout(Duration::from_secs(1), framed.send(Message::Request(teardown))).await;

        tracing::debug!(url = %url, units = units, "Pull loop finished");
    }
}

async fn tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => future::pending().await,
    }
}
