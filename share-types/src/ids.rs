//! Identity types for PeerShare.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque identifier the relay assigns to a live connection.
///
/// 8 bytes of random data, carried as URL-safe base64 (11 characters).
/// Only unique for the lifetime of the connection it names.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(String);

impl PeerId {
    /// Create a new random PeerId.
    pub fn random() -> Self {
        let mut bytes = [0u8; 8];
        getrandom::getrandom(&mut bytes).expect("getrandom failed");
        Self(URL_SAFE_NO_PAD.encode(bytes))
    }

    /// Wrap an id received over the wire.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerId({})", self.0)
    }
}

impl From<&str> for PeerId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Identifier of a transfer session.
///
/// 9 bytes of random data, carried as URL-safe base64 (12 characters).
/// Appears in share links, so it must stay URL-safe.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Create a new random SessionId.
    pub fn random() -> Self {
        let mut bytes = [0u8; 9];
        getrandom::getrandom(&mut bytes).expect("getrandom failed");
        Self(URL_SAFE_NO_PAD.encode(bytes))
    }

    /// Wrap an id received over the wire.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True when the id is empty (a missing field on the wire).
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionId({})", self.0)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// A 6-digit numeric share code (`100000..=999999`).
///
/// Humans type these, so they are only unique among active sessions.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ShortCode(String);

impl ShortCode {
    /// Smallest code value.
    pub const MIN: u32 = 100_000;
    /// Largest code value.
    pub const MAX: u32 = 999_999;

    /// Build a code from a number in `MIN..=MAX`.
    pub fn from_number(n: u32) -> Option<Self> {
        (Self::MIN..=Self::MAX)
            .contains(&n)
            .then(|| Self(n.to_string()))
    }

    /// Parse user input. Surrounding whitespace is ignored.
    pub fn parse(input: &str) -> Option<Self> {
        let trimmed = input.trim();
        if trimmed.len() != 6 || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        trimmed.parse().ok().and_then(Self::from_number)
    }

    /// Get the code as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ShortCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for ShortCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ShortCode({})", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peer_id_is_url_safe_and_sized() {
        let id = PeerId::random();
        assert_eq!(id.as_str().len(), 11);
        assert!(id
            .as_str()
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn session_id_is_twelve_chars() {
        let id = SessionId::random();
        assert_eq!(id.as_str().len(), 12);
        assert_ne!(id, SessionId::random());
    }

    #[test]
    fn ids_serialize_as_plain_strings() {
        let id = PeerId::new("abc");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"abc\"");

        let back: SessionId = serde_json::from_str("\"xyz\"").unwrap();
        assert_eq!(back.as_str(), "xyz");
    }

    #[test]
    fn short_code_range() {
        assert!(ShortCode::from_number(99_999).is_none());
        assert!(ShortCode::from_number(1_000_000).is_none());
        assert_eq!(ShortCode::from_number(123_456).unwrap().as_str(), "123456");
    }

    #[test]
    fn short_code_parse() {
        assert_eq!(ShortCode::parse(" 482913 ").unwrap().as_str(), "482913");
        assert!(ShortCode::parse("012345").is_none());
        assert!(ShortCode::parse("12345").is_none());
        assert!(ShortCode::parse("12a456").is_none());
    }

    #[test]
    fn debug_names_the_type() {
        assert_eq!(format!("{:?}", PeerId::new("p1")), "PeerId(p1)");
    }
}
