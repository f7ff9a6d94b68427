//! RTSP header map
//!
//! Header names are case-insensitive (RFC 2326 §4.2). Insertion order is kept
//! so encoded messages stay stable and readable in captures.

use crate::error::ProtocolError;

/// Ordered, case-insensitive header list
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers(Vec<(String, String)>);

impl Headers {
    /// Create an empty header list
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Get the first value for a header
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Set a header, replacing any existing value
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();

        if let Some(slot) = self.0.iter_mut().find(|(k, _)| k.eq_ignore_ascii_case(&name)) {
            slot.1 = value;
        } else {
            self.0.push((name, value));
        }
    }

    /// Remove a header
    pub fn remove(&mut self, name: &str) {
        self.0.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
    }

    /// Iterate over headers in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Parsed `Content-Length`, zero when absent
    pub fn content_length(&self) -> Result<usize, ProtocolError> {
        match self.get("Content-Length") {
            Some(v) => v
                .trim()
                .parse()
                .map_err(|_| ProtocolError::InvalidContentLength(v.to_string())),
            None => Ok(0),
        }
    }

    /// Parsed `CSeq`
    pub fn cseq(&self) -> Option<u32> {
        self.get("CSeq").and_then(|v| v.trim().parse().ok())
    }

    /// Session token without the `;timeout=` suffix
    pub fn session(&self) -> Option<&str> {
        self.get("Session")
            .map(|v| v.split(';').next().unwrap_or(v).trim())
            .filter(|v| !v.is_empty())
    }

    /// Parse a single `Name: value` line
    pub(crate) fn parse_line(&mut self, line: &str) -> Result<(), ProtocolError> {
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| ProtocolError::InvalidHeader(line.to_string()))?;

        let name = name.trim();
        if name.is_empty() {
            return Err(ProtocolError::InvalidHeader(line.to_string()));
        }

        self.0.push((name.to_string(), value.trim().to_string()));
        Ok(())
    }
}
