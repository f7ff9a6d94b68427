//! Minimal SDP handling
//!
//! The relay never rewrites a session description: publishers ANNOUNCE it,
//! viewers receive it verbatim on DESCRIBE. Only the media sections and their
//! `a=control` attributes are read, to map SETUP URLs onto track indexes.

use bytes::Bytes;

use super::uri_path;
use crate::error::ProtocolError;

/// Kind of an SDP media section
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Video,
    Audio,
    Application,
    Other,
}

impl MediaKind {
    fn parse(s: &str) -> Self {
        match s {
            "video" => MediaKind::Video,
            "audio" => MediaKind::Audio,
            "application" => MediaKind::Application,
            _ => MediaKind::Other,
        }
    }
}

/// One `m=` section
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SdpTrack {
    pub kind: MediaKind,
    /// Control URL, relative or absolute
    pub control: String,
}

/// A parsed session description with its original text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionDescription {
    raw: Bytes,
    tracks: Vec<SdpTrack>,
}

impl SessionDescription {
    /// Parse an SDP body
    ///
    /// Media sections without `a=control` get `trackID=<index>`.
    pub fn parse(body: &[u8]) -> Result<Self, ProtocolError> {
        let text = std::str::from_utf8(body)
            .map_err(|_| ProtocolError::InvalidSdp("body is not UTF-8".into()))?;

        let mut tracks: Vec<SdpTrack> = Vec::new();
        let mut pending: Option<(MediaKind, Option<String>)> = None;

        for line in text.lines().map(str::trim) {
            if let Some(media) = line.strip_prefix("m=") {
                if let Some(done) = pending.take() {
                    tracks.push(finish_track(done, tracks.len()));
                }
                let kind = MediaKind::parse(media.split_whitespace().next().unwrap_or_default());
                pending = Some((kind, None));
            } else if let Some(control) = line.strip_prefix("a=control:") {
                if let Some((_, slot)) = pending.as_mut() {
                    *slot = Some(control.trim().to_string());
                }
            }
        }

        if let Some(done) = pending.take() {
            tracks.push(finish_track(done, tracks.len()));
        }

        if tracks.is_empty() {
            return Err(ProtocolError::InvalidSdp("no media sections".into()));
        }

        Ok(Self {
            raw: Bytes::copy_from_slice(body),
            tracks,
        })
    }

    /// Original SDP text
    pub fn raw(&self) -> &Bytes {
        &self.raw
    }

    pub fn tracks(&self) -> &[SdpTrack] {
        &self.tracks
    }

    /// Map a SETUP request URI to a track index
    pub fn resolve_track(&self, setup_uri: &str) -> Option<usize> {
        let uri = setup_uri.trim_end_matches('/');
        let setup_path = uri_path(uri);

        let found = self.tracks.iter().position(|track| {
            let control = track.control.trim_end_matches('/');
            if control.contains("://") {
                control == uri || (setup_path.is_some() && uri_path(control) == setup_path)
            } else {
                uri.ends_with(&format!("/{}", control))
            }
        });

        // Single-track sessions are often set up on the aggregate URL
        found.or_else(|| (self.tracks.len() == 1).then_some(0))
    }

    /// URL to SETUP a track against, given the DESCRIBE base URL
    pub fn track_url(&self, base: &str, index: usize) -> Option<String> {
        let track = self.tracks.get(index)?;
        if track.control.contains("://") {
            Some(track.control.clone())
        } else if track.control == "*" {
            Some(base.to_string())
        } else {
            Some(format!("{}/{}", base.trim_end_matches('/'), track.control))
        }
    }
}

fn finish_track((kind, control): (MediaKind, Option<String>), index: usize) -> SdpTrack {
    SdpTrack {
        kind,
        control: control.unwrap_or_else(|| format!("trackID={}", index)),
    }
}
