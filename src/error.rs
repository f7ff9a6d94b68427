//! Error types for the relay
//!
//! Errors are scoped to where they can be handled: a `ProtocolError` only
//! ever closes the session it happened on, `Bind` is fatal to server start,
//! and `Connect`/`Negotiation` only abort a single pull attempt.

use std::io;

use thiserror::Error;

/// Malformed or unsupported RTSP traffic
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Request line is not `METHOD URI RTSP/1.0`
    #[error("Invalid request line: {0}")]
    InvalidRequestLine(String),

    /// Status line is not `RTSP/1.0 CODE REASON`
    #[error("Invalid status line: {0}")]
    InvalidStatusLine(String),

    /// Header line without a colon or with non UTF-8 content
    #[error("Invalid header: {0}")]
    InvalidHeader(String),

    /// Content-Length is not a number
    #[error("Invalid Content-Length: {0}")]
    InvalidContentLength(String),

    /// Message head or body exceeds the configured bound
    #[error("Message too large: {size} bytes (max {max})")]
    MessageTooLarge { size: usize, max: usize },

    /// SDP body without usable media sections
    #[error("Invalid SDP: {0}")]
    InvalidSdp(String),

    /// Transport header could not be parsed
    #[error("Invalid Transport header: {0}")]
    InvalidTransport(String),

    /// Request is not valid in the current session state
    #[error("Method not valid in this state: {0}")]
    InvalidState(String),

    /// Unexpected message kind on the wire
    #[error("Unexpected message: {0}")]
    UnexpectedMessage(String),
}

/// Error type for relay operations
#[derive(Error, Debug)]
pub enum Error {
    /// Listener could not be established
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    /// Malformed control message
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Requested transport cannot be provided
    #[error("Transport mismatch: {0}")]
    TransportMismatch(String),

    /// Pull handshake could not be completed
    #[error("Connect failed: {0}")]
    Connect(String),

    /// Remote rejected the requested transport or session
    #[error("Negotiation failed: {0}")]
    Negotiation(String),

    /// No media within the configured window
    #[error("No media received for {0:?}")]
    IdleTimeout(std::time::Duration),

    /// Invalid RTSP URL
    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// Whether this error is a normal end of a feed rather than a failure
    pub fn is_idle_timeout(&self) -> bool {
        matches!(self, Error::IdleTimeout(_))
    }
}

/// Result type for relay operations
pub type Result<T> = std::result::Result<T, Error>;
