//! Error types for share-relay.

use crate::limits::RateLimitError;
use share_types::{ErrorCode, ServerMessage, ShareError};

/// Main error type for share-relay operations.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// Protocol error.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Invalid bind address.
    #[error("invalid bind address {address}: {source}")]
    BindAddress {
        /// The configured address.
        address: String,
        /// Parse failure.
        source: std::net::AddrParseError,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Problems with one inbound frame. Each maps to an `error` reply.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Frame did not decode into a known message.
    #[error(transparent)]
    Decode(#[from] ShareError),

    /// `file-chunk` data was not valid base64.
    #[error("invalid chunk encoding: {0}")]
    InvalidChunk(#[from] base64::DecodeError),

    /// Binary frames are not part of the envelope.
    #[error("binary frames are not supported")]
    BinaryFrame,

    /// Peer exceeded its message quota.
    #[error("rate limit exceeded: {0}")]
    RateLimited(#[from] RateLimitError),
}

impl ProtocolError {
    /// Typed code reported to the peer.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Decode(ShareError::UnknownType(_)) => ErrorCode::UnknownType,
            Self::Decode(_) | Self::InvalidChunk(_) | Self::BinaryFrame => {
                ErrorCode::InvalidMessage
            }
            Self::RateLimited(_) => ErrorCode::RateLimited,
        }
    }

    /// The `error` message sent back to the peer.
    pub fn to_message(&self) -> ServerMessage {
        match self {
            Self::Decode(ShareError::UnknownType(_)) => {
                ServerMessage::error_with(ErrorCode::UnknownType, self.to_string())
            }
            _ => ServerMessage::error(self.code()),
        }
    }
}

/// Result type alias for relay operations.
pub type Result<T> = std::result::Result<T, RelayError>;

/// Result type alias for protocol operations.
pub type ProtocolResult<T> = std::result::Result<T, ProtocolError>;

#[cfg(test)]
mod tests {
    use super::*;
    use share_types::{ClientMessage, ErrorNotice};

    fn notice(message: ServerMessage) -> ErrorNotice {
        match message {
            ServerMessage::Error(notice) => notice,
            other => panic!("expected error, got {other:?}"),
        }
    }

    #[test]
    fn unknown_type_keeps_the_type_name() {
        let err = ProtocolError::from(ClientMessage::decode(r#"{"type":"bogus"}"#).unwrap_err());
        assert_eq!(err.code(), ErrorCode::UnknownType);
        let notice = notice(err.to_message());
        assert_eq!(notice.message, "Unknown message type: bogus");
        assert_eq!(notice.error_code, Some(ErrorCode::UnknownType));
    }

    #[test]
    fn malformed_frames_are_invalid_message() {
        let err = ProtocolError::from(ClientMessage::decode("not json").unwrap_err());
        assert_eq!(err.code(), ErrorCode::InvalidMessage);

        let err = ProtocolError::from(
            ClientMessage::decode(r#"{"type":"join-by-code","code":"1","extra":1}"#).unwrap_err(),
        );
        assert_eq!(err.code(), ErrorCode::InvalidMessage);
        assert_eq!(ProtocolError::BinaryFrame.code(), ErrorCode::InvalidMessage);
    }

    #[test]
    fn rate_limited_maps_to_code() {
        let err = ProtocolError::from(RateLimitError::MessageLimitExceeded);
        assert_eq!(notice(err.to_message()).error_code, Some(ErrorCode::RateLimited));
    }
}
