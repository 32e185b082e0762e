//! Error types for PeerShare.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Errors that can occur while encoding or decoding wire messages.
#[derive(Debug, Error)]
pub enum ShareError {
    /// JSON serialization failed
    #[error("serialization failed: {0}")]
    Serialization(#[source] serde_json::Error),

    /// Frame was not a JSON object with a string `type`
    #[error("invalid message format")]
    NotAnEnvelope,

    /// Discriminator not in the closed message set
    #[error("Unknown message type: {0}")]
    UnknownType(String),

    /// Known discriminator but the fields did not match
    #[error("invalid {kind} message: {source}")]
    Malformed {
        /// The message type that failed to decode.
        kind: String,
        /// Underlying JSON error.
        #[source]
        source: serde_json::Error,
    },
}

/// Typed reason attached to relay `error` messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// `create-session` or `send-to-peer` with an empty manifest.
    NoFiles,
    /// `join-by-code` without a code.
    MissingCode,
    /// `join-by-link` without a session id.
    MissingSessionId,
    /// Code does not match an active session.
    InvalidCode,
    /// Session id does not match an active session.
    SessionNotFound,
    /// Invite target is not connected.
    PeerNotFound,
    /// Receiver slot already bound to another peer.
    JoinRejected,
    /// Discriminator not recognised.
    UnknownType,
    /// Frame could not be decoded.
    InvalidMessage,
    /// Sender exceeded its message quota.
    RateLimited,
}

impl ErrorCode {
    /// Human readable default text for this code.
    pub fn default_message(self) -> &'static str {
        match self {
            Self::NoFiles => "No files provided",
            Self::MissingCode => "Code is required",
            Self::MissingSessionId => "Session ID is required",
            Self::InvalidCode => "Invalid code",
            Self::SessionNotFound => "Session not found",
            Self::PeerNotFound => "Peer not found",
            Self::JoinRejected => "Session already has a receiver",
            Self::UnknownType => "Unknown message type",
            Self::InvalidMessage => "Invalid message format",
            Self::RateLimited => "Too many messages",
        }
    }
}

/// Why a transfer failed on the client side.
///
/// Every failure is terminal; nothing retries automatically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureCode {
    /// Channel did not open within the connect deadline.
    Timeout,
    /// Connection could not be established.
    ConnectionFailed,
    /// Transport reported a hard failure.
    RtcFailed,
    /// Transport dropped after it was established.
    RtcDisconnected,
    /// Writing to the channel failed.
    SendFailed,
    /// Reading or assembling incoming data failed.
    ReceiveFailed,
    /// The counterpart reported an error.
    PeerError,
}

impl fmt::Display for FailureCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Timeout => "TIMEOUT",
            Self::ConnectionFailed => "CONNECTION_FAILED",
            Self::RtcFailed => "RTC_FAILED",
            Self::RtcDisconnected => "RTC_DISCONNECTED",
            Self::SendFailed => "SEND_FAILED",
            Self::ReceiveFailed => "RECEIVE_FAILED",
            Self::PeerError => "PEER_ERROR",
        };
        f.write_str(s)
    }
}
