//! RTSP responses

use bytes::{BufMut, Bytes, BytesMut};

use super::headers::Headers;
use super::RTSP_VERSION;
use crate::error::ProtocolError;

/// Status codes used by the relay
pub mod status {
    pub const OK: u16 = 200;
    pub const BAD_REQUEST: u16 = 400;
    pub const NOT_FOUND: u16 = 404;
    pub const SESSION_NOT_FOUND: u16 = 454;
    pub const METHOD_NOT_VALID_IN_THIS_STATE: u16 = 455;
    pub const UNSUPPORTED_TRANSPORT: u16 = 461;
    pub const INTERNAL_SERVER_ERROR: u16 = 500;
    pub const NOT_IMPLEMENTED: u16 = 501;
    pub const SERVICE_UNAVAILABLE: u16 = 503;
}

/// Reason phrase for a status code (RFC 2326 §7.1.1)
pub fn reason_phrase(code: u16) -> &'static str {
    match code {
        200 => "OK",
        400 => "Bad Request",
        401 => "Unauthorized",
        404 => "Not Found",
        405 => "Method Not Allowed",
        454 => "Session Not Found",
        455 => "Method Not Valid in This State",
        459 => "Aggregate Operation Not Allowed",
        461 => "Unsupported Transport",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        503 => "Service Unavailable",
        _ => "Unknown",
    }
}

/// A parsed or outgoing RTSP response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtspResponse {
    pub status: u16,
    pub reason: String,
    pub headers: Headers,
    pub body: Bytes,
}

impl RtspResponse {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            reason: reason_phrase(status).to_string(),
            headers: Headers::new(),
            body: Bytes::new(),
        }
    }

    pub fn ok() -> Self {
        Self::new(status::OK)
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

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn cseq(&self) -> Option<u32> {
        self.headers.cseq()
    }

    pub fn session(&self) -> Option<&str> {
        self.headers.session()
    }

    /// Build a response from a decoded message head
    pub(crate) fn from_parts(
        start_line: &str,
        headers: Headers,
        body: Bytes,
    ) -> Result<Self, ProtocolError> {
        let mut parts = start_line.splitn(3, ' ');
        let version = parts.next().unwrap_or_default();
        let code = parts.next().unwrap_or_default();
        let reason = parts.next().unwrap_or_default();

        if !version.starts_with("RTSP/") {
            return Err(ProtocolError::InvalidStatusLine(start_line.to_string()));
        }

        let status = code
            .parse()
            .map_err(|_| ProtocolError::InvalidStatusLine(start_line.to_string()))?;

        Ok(Self {
            status,
            reason: reason.trim().to_string(),
            headers,
            body,
        })
    }

    /// Serialize onto the wire
    pub fn encode(&self, dst: &mut BytesMut) {
        dst.reserve(128 + self.body.len());
        dst.put_slice(RTSP_VERSION.as_bytes());
        dst.put_u8(b' ');
        dst.put_slice(self.status.to_string().as_bytes());
        dst.put_u8(b' ');
        dst.put_slice(self.reason.as_bytes());
        dst.put_slice(b"\r\n");

        super::encode_headers(&self.headers, &self.body, dst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_parts() {
        let resp = RtspResponse::from_parts(
            "RTSP/1.0 461 Unsupported Transport",
            Headers::new(),
            Bytes::new(),
        )
        .unwrap();

        assert_eq!(resp.status, 461);
        assert_eq!(resp.reason, "Unsupported Transport");
        assert!(!resp.is_success());
    }

    #[test]
    fn test_from_parts_invalid() {
        assert!(RtspResponse::from_parts("HTTP/1.1 200 OK", Headers::new(), Bytes::new()).is_err());
        assert!(RtspResponse::from_parts("RTSP/1.0 abc OK", Headers::new(), Bytes::new()).is_err());
    }

    #[test]
    fn test_encode() {
        let resp = RtspResponse::ok()
            .header("CSeq", "3")
            .header("Session", "abc;timeout=60");

        let mut buf = BytesMut::new();
        resp.encode(&mut buf);

        assert_eq!(
            std::str::from_utf8(&buf).unwrap(),
            "RTSP/1.0 200 OK\r\nCSeq: 3\r\nSession: abc;timeout=60\r\n\r\n"
        );
    }
}
