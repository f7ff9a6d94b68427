//! Framing for an RTSP control connection
//!
//! One TCP connection carries text requests/responses and, once media flows
//! over interleaved transport, binary frames (RFC 2326 §10.12):
//!
//! ```text
//! +-----+---------+-----------------+----------------+
//! | '$' | channel | length (u16 BE) | payload ...    |
//! +-----+---------+-----------------+----------------+
//! ```
//!
//! A leading `$` distinguishes a frame from a text message.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use super::headers::Headers;
use super::request::RtspRequest;
use super::response::RtspResponse;
use super::{DEFAULT_MAX_MESSAGE_SIZE, INTERLEAVED_MAGIC};
use crate::error::{Error, ProtocolError};

/// Binary media frame on the control connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterleavedFrame {
    pub channel: u8,
    pub payload: Bytes,
}

/// Anything that can travel on a control connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Request(RtspRequest),
    Response(RtspResponse),
    Frame(InterleavedFrame),
}

/// `tokio_util` codec for [`Message`]
#[derive(Debug, Clone)]
pub struct RtspCodec {
    max_message_size: usize,
}

impl RtspCodec {
    pub fn new(max_message_size: usize) -> Self {
        Self { max_message_size }
    }
}

impl Default for RtspCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_MESSAGE_SIZE)
    }
}

impl Decoder for RtspCodec {
    type Item = Message;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Message>, Error> {
        // Some clients terminate bodies with an extra CRLF
        while matches!(src.first(), Some(b'\r') | Some(b'\n')) {
            src.advance(1);
        }

        if src.is_empty() {
            return Ok(None);
        }

        if src[0] == INTERLEAVED_MAGIC {
            return Ok(decode_frame(src));
        }

        let Some(head_len) = find_head_end(src) else {
            if src.len() > self.max_message_size {
                return Err(ProtocolError::MessageTooLarge {
                    size: src.len(),
                    max: self.max_message_size,
                }
                .into());
            }
            return Ok(None);
        };

        let head = std::str::from_utf8(&src[..head_len])
            .map_err(|_| ProtocolError::InvalidHeader("message head is not UTF-8".into()))?;

        let mut lines = head.split("\r\n");
        let start_line = lines.next().unwrap_or_default().to_string();
        let mut headers = Headers::new();
        for line in lines.filter(|l| !l.is_empty()) {
            headers.parse_line(line)?;
        }

        let body_len = headers.content_length()?;
        let total = head_len + 4 + body_len;
        if total > self.max_message_size {
            return Err(ProtocolError::MessageTooLarge {
                size: total,
                max: self.max_message_size,
            }
            .into());
        }

        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }

        src.advance(head_len + 4);
        let body = src.split_to(body_len).freeze();

        let message = if start_line.starts_with("RTSP/") {
            Message::Response(RtspResponse::from_parts(&start_line, headers, body)?)
        } else {
            Message::Request(RtspRequest::from_parts(&start_line, headers, body)?)
        };

        Ok(Some(message))
    }
}

impl Encoder<Message> for RtspCodec {
    type Error = Error;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<(), Error> {
        match item {
            Message::Request(req) => req.encode(dst),
            Message::Response(resp) => resp.encode(dst),
            Message::Frame(frame) => {
                let len = u16::try_from(frame.payload.len()).map_err(|_| {
                    ProtocolError::MessageTooLarge {
                        size: frame.payload.len(),
                        max: u16::MAX as usize,
                    }
                })?;

                dst.reserve(4 + frame.payload.len());
                dst.put_u8(INTERLEAVED_MAGIC);
                dst.put_u8(frame.channel);
                dst.put_u16(len);
                dst.put_slice(&frame.payload);
            }
        }
        Ok(())
    }
}

fn decode_frame(src: &mut BytesMut) -> Option<Message> {
    if src.len() < 4 {
        return None;
    }

    let channel = src[1];
    let len = u16::from_be_bytes([src[2], src[3]]) as usize;

    if src.len() < 4 + len {
        src.reserve(4 + len - src.len());
        return None;
    }

    src.advance(4);
    let payload = src.split_to(len).freeze();

    Some(Message::Frame(InterleavedFrame { channel, payload }))
}

/// Length of the message head, excluding the blank line
fn find_head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}
