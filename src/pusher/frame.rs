//! Media units routed from a source to viewers
//!
//! The relay never looks inside RTP payloads. A unit is the raw packet plus
//! the track it belongs to and whether it arrived on the RTP or RTCP channel
//! of that track.

use bytes::Bytes;

/// Channel a packet travels on within its track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketKind {
    Rtp,
    Rtcp,
}

/// One packet flowing through a Pusher
///
/// Cheap to clone: `data` is reference counted, so every Player shares the
/// same allocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaUnit {
    /// Arrival order at the Pusher, assigned by its fan-out loop
    pub seq: u64,
    /// Track index in the session description
    pub track: usize,
    pub kind: PacketKind,
    pub data: Bytes,
}

impl MediaUnit {
    /// RTP packet for a track
    pub fn rtp(track: usize, data: Bytes) -> Self {
        Self {
            seq: 0,
            track,
            kind: PacketKind::Rtp,
            data,
        }
    }

    /// RTCP packet for a track
    pub fn rtcp(track: usize, data: Bytes) -> Self {
        Self {
            seq: 0,
            track,
            kind: PacketKind::Rtcp,
            data,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
