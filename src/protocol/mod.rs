//! RTSP/1.0 wire protocol
//!
//! Requests and responses follow HTTP/1.1 syntax (RFC 2326 §4); media may be
//! interleaved on the same connection as `$`-prefixed binary frames.
//!
//! | Method        | Role      | Purpose                                   |
//! |---------------|-----------|-------------------------------------------|
//! | OPTIONS       | any       | Capability discovery, keep-alive          |
//! | ANNOUNCE      | publisher | Declare a stream and its SDP              |
//! | DESCRIBE      | viewer    | Fetch the SDP of a published stream       |
//! | SETUP         | any       | Negotiate transport for one track         |
//! | RECORD        | publisher | Start sending media                       |
//! | PLAY          | viewer    | Start receiving media                     |
//! | PAUSE         | viewer    | Suspend delivery                          |
//! | GET_PARAMETER | any       | Keep-alive                                |
//! | TEARDOWN      | any       | End the session                           |

pub mod codec;
pub mod headers;
pub mod request;
pub mod response;
pub mod sdp;
pub mod transport;

pub use codec::{InterleavedFrame, Message, RtspCodec};
pub use headers::Headers;
pub use request::{Method, RtspRequest};
pub use response::{status, RtspResponse};
pub use sdp::{MediaKind, SdpTrack, SessionDescription};
pub use transport::{TransType, Transport};

use bytes::{BufMut, Bytes, BytesMut};

/// Protocol version string
pub const RTSP_VERSION: &str = "RTSP/1.0";

/// Default RTSP port; omitted from generated URLs
pub const DEFAULT_RTSP_PORT: u16 = 554;

/// First byte of an interleaved frame
pub const INTERLEAVED_MAGIC: u8 = b'$';

/// Default upper bound on a text message (head + body)
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// Product token sent in `Server` and `User-Agent` headers
pub const USER_AGENT: &str = concat!("rtsp-relay/", env!("CARGO_PKG_VERSION"));

/// Methods answered in the `Public` header
pub const PUBLIC_METHODS: &str =
    "OPTIONS, DESCRIBE, ANNOUNCE, SETUP, PLAY, PAUSE, RECORD, TEARDOWN, GET_PARAMETER, SET_PARAMETER";

/// Resource path of an RTSP URL, without a trailing slash
///
/// Returns `None` for `*` and for strings that are not absolute URLs.
pub fn uri_path(uri: &str) -> Option<String> {
    let url = url::Url::parse(uri).ok()?;
    let path = url.path().trim_end_matches('/');

    if path.is_empty() {
        Some("/".to_string())
    } else {
        Some(path.to_string())
    }
}

/// Build an `rtsp://` URL for a path, omitting the default port
pub fn format_url(host: &str, port: u16, path: &str) -> String {
    if port == DEFAULT_RTSP_PORT {
        format!("rtsp://{}{}", host, path)
    } else {
        format!("rtsp://{}:{}{}", host, port, path)
    }
}

fn encode_headers(headers: &Headers, body: &Bytes, dst: &mut BytesMut) {
    for (name, value) in headers.iter() {
        if name.eq_ignore_ascii_case("Content-Length") {
            continue;
        }
        dst.put_slice(name.as_bytes());
        dst.put_slice(b": ");
        dst.put_slice(value.as_bytes());
        dst.put_slice(b"\r\n");
    }

    if !body.is_empty() {
        dst.put_slice(format!("Content-Length: {}\r\n", body.len()).as_bytes());
    }

    dst.put_slice(b"\r\n");
    dst.put_slice(body);
}
