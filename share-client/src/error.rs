//! Error types for the PeerShare client.

use peershare_core::{ReceiveError, RelayStreamError};
use peershare_types::FailureCode;
use thiserror::Error;

use crate::transport::TransportError;

/// Errors that end a running transfer. Always terminal; never retried.
#[derive(Debug, Error)]
pub enum TransferError {
    /// The data channel did not open before the connect deadline.
    #[error("timed out waiting for the data channel")]
    Timeout,

    /// Connection could not be created or negotiated.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Transport reported failure.
    #[error("peer connection failed")]
    LinkFailed,

    /// Transport closed.
    #[error("peer connection closed")]
    LinkClosed,

    /// Writing a frame failed.
    #[error("send failed: {0}")]
    Send(#[source] TransportError),

    /// Reading the stream failed.
    #[error("receive failed: {0}")]
    Receive(String),

    /// Peer violated the framing protocol.
    #[error(transparent)]
    Protocol(#[from] ReceiveError),

    /// Relay stream could not be decoded.
    #[error(transparent)]
    RelayStream(#[from] RelayStreamError),
}

impl TransferError {
    /// Failure code reported to the state machine.
    pub fn code(&self) -> FailureCode {
        match self {
            Self::Timeout => FailureCode::Timeout,
            Self::ConnectionFailed(_) => FailureCode::ConnectionFailed,
            Self::LinkFailed => FailureCode::RtcFailed,
            Self::LinkClosed => FailureCode::RtcDisconnected,
            Self::Send(_) => FailureCode::SendFailed,
            Self::Receive(_) | Self::Protocol(_) | Self::RelayStream(_) => {
                FailureCode::ReceiveFailed
            }
        }
    }
}

/// Errors returned by the client API.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Input rejected before any state changed.
    #[error("invalid request: {0}")]
    Validation(&'static str),

    /// Relay socket is gone.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_distinguishable() {
        assert_eq!(TransferError::Timeout.code(), FailureCode::Timeout);
        assert_eq!(TransferError::LinkClosed.code(), FailureCode::RtcDisconnected);
        assert_eq!(
            TransferError::Send(TransportError::ChannelClosed).code(),
            FailureCode::SendFailed
        );
        assert_eq!(
            TransferError::Protocol(ReceiveError::DataOutsideFile).code(),
            FailureCode::ReceiveFailed
        );
    }
}
