//! `Transport` header negotiation (RFC 2326 §12.39)
//!
//! Two delivery modes are supported:
//!
//! ```text
//! RTP/AVP/TCP;unicast;interleaved=0-1        media as $-frames on the control connection
//! RTP/AVP;unicast;client_port=5000-5001      media as UDP datagrams, one RTP/RTCP port pair
//! ```

use std::fmt;

use serde::Serialize;

use crate::error::ProtocolError;

/// Negotiated media transport mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum TransType {
    /// Interleaved over the RTSP control connection
    #[serde(rename = "TCP")]
    Tcp,
    /// Separate RTP/RTCP datagram channels
    #[serde(rename = "UDP")]
    Udp,
}

impl fmt::Display for TransType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransType::Tcp => f.write_str("TCP"),
            TransType::Udp => f.write_str("UDP"),
        }
    }
}

/// One transport specification from a `Transport` header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transport {
    pub trans_type: TransType,
    /// Multicast was requested; the relay only serves unicast
    pub multicast: bool,
    /// Interleaved RTP/RTCP channel pair
    pub interleaved: Option<(u8, u8)>,
    /// Client RTP/RTCP port pair
    pub client_port: Option<(u16, u16)>,
    /// Server RTP/RTCP port pair
    pub server_port: Option<(u16, u16)>,
    /// `mode=record` was present
    pub record: bool,
}

impl Transport {
    /// Interleaved transport on the given RTP channel (RTCP on `rtp + 1`)
    pub fn interleaved(rtp: u8) -> Self {
        Self {
            trans_type: TransType::Tcp,
            multicast: false,
            interleaved: Some((rtp, rtp.wrapping_add(1))),
            client_port: None,
            server_port: None,
            record: false,
        }
    }

    /// UDP transport with the given client port pair
    pub fn udp(client_port: (u16, u16)) -> Self {
        Self {
            trans_type: TransType::Udp,
            multicast: false,
            interleaved: None,
            client_port: Some(client_port),
            server_port: None,
            record: false,
        }
    }

    /// Parse the first transport specification of a header value
    ///
    /// Clients may offer several comma separated alternatives; the first one
    /// the relay understands wins.
    pub fn parse(header: &str) -> Result<Self, ProtocolError> {
        let mut last_err = ProtocolError::InvalidTransport(header.to_string());

        for spec in header.split(',') {
            match Self::parse_spec(spec.trim()) {
                Ok(t) => return Ok(t),
                Err(e) => last_err = e,
            }
        }

        Err(last_err)
    }

    fn parse_spec(spec: &str) -> Result<Self, ProtocolError> {
        let invalid = || ProtocolError::InvalidTransport(spec.to_string());
        let mut params = spec.split(';');

        let trans_type = match params.next().map(str::trim) {
            Some("RTP/AVP") | Some("RTP/AVP/UDP") => TransType::Udp,
            Some("RTP/AVP/TCP") => TransType::Tcp,
            _ => return Err(invalid()),
        };

        let mut transport = Self {
            trans_type,
            multicast: false,
            interleaved: None,
            client_port: None,
            server_port: None,
            record: false,
        };

        for param in params {
            let (key, value) = match param.split_once('=') {
                Some((k, v)) => (k.trim(), Some(v.trim())),
                None => (param.trim(), None),
            };

            match (key, value) {
                ("multicast", _) => transport.multicast = true,
                ("interleaved", Some(v)) => {
                    let (a, b) = parse_pair::<u8>(v).ok_or_else(invalid)?;
                    transport.interleaved = Some((a, b));
                }
                ("client_port", Some(v)) => {
                    transport.client_port = Some(parse_pair::<u16>(v).ok_or_else(invalid)?);
                }
                ("server_port", Some(v)) => {
                    transport.server_port = Some(parse_pair::<u16>(v).ok_or_else(invalid)?);
                }
                ("mode", Some(v)) => {
                    transport.record = v.trim_matches('"').eq_ignore_ascii_case("record");
                }
                _ => {}
            }
        }

        Ok(transport)
    }

    /// Encode as a header value
    pub fn to_header(&self) -> String {
        let mut out = match self.trans_type {
            TransType::Tcp => String::from("RTP/AVP/TCP"),
            TransType::Udp => String::from("RTP/AVP"),
        };

        out.push_str(if self.multicast { ";multicast" } else { ";unicast" });

        if let Some((a, b)) = self.interleaved {
            out.push_str(&format!(";interleaved={}-{}", a, b));
        }
        if let Some((a, b)) = self.client_port {
            out.push_str(&format!(";client_port={}-{}", a, b));
        }
        if let Some((a, b)) = self.server_port {
            out.push_str(&format!(";server_port={}-{}", a, b));
        }
        if self.record {
            out.push_str(";mode=record");
        }

        out
    }
}

/// Parse `a-b`, or a single `a` meaning `a-(a+1)`
fn parse_pair<T>(v: &str) -> Option<(T, T)>
where
    T: std::str::FromStr + TryFrom<u32>,
{
    match v.split_once('-') {
        Some((a, b)) => Some((a.trim().parse().ok()?, b.trim().parse().ok()?)),
        None => {
            let a: u32 = v.trim().parse().ok()?;
            Some((T::try_from(a).ok()?, T::try_from(a + 1).ok()?))
        }
    }
}
