//! RTSP requests

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};

use super::headers::Headers;
use super::RTSP_VERSION;
use crate::error::ProtocolError;

/// RTSP method
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Method {
    Options,
    Describe,
    Announce,
    Setup,
    Play,
    Pause,
    Record,
    Teardown,
    GetParameter,
    SetParameter,
    /// Anything else; answered with 501
    Other(String),
}

impl Method {
    pub fn parse(s: &str) -> Self {
        match s {
            "OPTIONS" => Method::Options,
            "DESCRIBE" => Method::Describe,
            "ANNOUNCE" => Method::Announce,
            "SETUP" => Method::Setup,
            "PLAY" => Method::Play,
            "PAUSE" => Method::Pause,
            "RECORD" => Method::Record,
            "TEARDOWN" => Method::Teardown,
            "GET_PARAMETER" => Method::GetParameter,
            "SET_PARAMETER" => Method::SetParameter,
            other => Method::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Method::Options => "OPTIONS",
            Method::Describe => "DESCRIBE",
            Method::Announce => "ANNOUNCE",
            Method::Setup => "SETUP",
            Method::Play => "PLAY",
            Method::Pause => "PAUSE",
            Method::Record => "RECORD",
            Method::Teardown => "TEARDOWN",
            Method::GetParameter => "GET_PARAMETER",
            Method::SetParameter => "SET_PARAMETER",
            Method::Other(s) => s,
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parsed or outgoing RTSP request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtspRequest {
    pub method: Method,
    pub uri: String,
    pub headers: Headers,
    pub body: Bytes,
}

impl RtspRequest {
    /// Create a request with no headers
    pub fn new(method: Method, uri: impl Into<String>) -> Self {
        Self {
            method,
            uri: uri.into(),
            headers: Headers::new(),
            body: Bytes::new(),
        }
    }

    /// Add a header
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Attach a body with its content type
    pub fn with_body(mut self, content_type: &str, body: impl Into<Bytes>) -> Self {
        self.headers.insert("Content-Type", content_type);
        self.body = body.into();
        self
    }

    pub fn cseq(&self) -> Option<u32> {
        self.headers.cseq()
    }

    pub fn session(&self) -> Option<&str> {
        self.headers.session()
    }

    /// Build a request from a decoded message head
    pub(crate) fn from_parts(
        start_line: &str,
        headers: Headers,
        body: Bytes,
    ) -> Result<Self, ProtocolError> {
        let mut parts = start_line.split_whitespace();
        let (Some(method), Some(uri), Some(version), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(ProtocolError::InvalidRequestLine(start_line.to_string()));
        };

        if !version.starts_with("RTSP/") {
            return Err(ProtocolError::InvalidRequestLine(start_line.to_string()));
        }

        Ok(Self {
            method: Method::parse(method),
            uri: uri.to_string(),
            headers,
            body,
        })
    }

    /// Serialize onto the wire
    pub fn encode(&self, dst: &mut BytesMut) {
        dst.reserve(128 + self.body.len());
        dst.put_slice(self.method.as_str().as_bytes());
        dst.put_u8(b' ');
        dst.put_slice(self.uri.as_bytes());
        dst.put_u8(b' ');
        dst.put_slice(RTSP_VERSION.as_bytes());
        dst.put_slice(b"\r\n");

        super::encode_headers(&self.headers, &self.body, dst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_roundtrip_names() {
        assert_eq!(Method::parse("GET_PARAMETER"), Method::GetParameter);
        assert_eq!(Method::GetParameter.as_str(), "GET_PARAMETER");
        assert_eq!(Method::parse("REDIRECT"), Method::Other("REDIRECT".into()));
    }

    #[test]
    fn test_from_parts() {
        let req = RtspRequest::from_parts(
            "DESCRIBE rtsp://example.com/cam1 RTSP/1.0",
            Headers::new(),
            Bytes::new(),
        )
        .unwrap();

        assert_eq!(req.method, Method::Describe);
        assert_eq!(req.uri, "rtsp://example.com/cam1");
    }

    #[test]
    fn test_from_parts_rejects_garbage() {
        for line in ["DESCRIBE", "DESCRIBE rtsp://x HTTP/1.1", "A B RTSP/1.0 extra"] {
            assert!(
                RtspRequest::from_parts(line, Headers::new(), Bytes::new()).is_err(),
                "accepted {line}"
            );
        }
    }

    #[test]
    fn test_encode_adds_content_length() {
        let req = RtspRequest::new(Method::Announce, "rtsp://h/cam1")
            .header("CSeq", "2")
            .with_body("application/sdp", "v=0\r\n");

        let mut buf = BytesMut::new();
        req.encode(&mut buf);

        let text = std::str::from_utf8(&buf).unwrap();
        assert!(text.starts_with("ANNOUNCE rtsp://h/cam1 RTSP/1.0\r\n"));
        assert!(text.contains("CSeq: 2\r\n"));
        assert!(text.contains("Content-Length: 5\r\n"));
        assert!(text.ends_with("\r\n\r\nv=0\r\n"));
    }
}
