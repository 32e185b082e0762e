//! Transport abstraction for PeerShare.
//!
//! This module provides a pluggable transport layer that abstracts
//! the underlying peer connection mechanism (WebRTC in a browser host,
//! mock for testing).
//!
//! # Design
//!
//! A transfer uses one [`PeerConnection`] and one ordered [`DataChannel`]:
//! - [`Connector::connect()`] creates a connection plus its event stream
//! - the initiator calls `create_offer()`, the responder `accept_offer()`
//! - locally discovered candidates and the opened channel arrive as
//!   [`TransportEvent`]s
//! - [`DataChannel::wait_writable()`] implements send-side backpressure
//!
//! Negotiation payloads (session descriptions, candidates) are opaque JSON.
//!
//! # Example
//!
//! ```ignore
//! let connector = MockConnector::new();
//! let (connection, mut events) = connector.connect().await?;
//! let offer = connection.create_offer().await?;
//! ```

pub mod mock;

pub use mock::{MockConnector, MockDataChannel, MockPeerConnection, RecordingLink};

use async_trait::async_trait;
use peershare_core::LinkPhase;
use peershare_types::ClientMessage;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection failed.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Not connected.
    #[error("not connected")]
    NotConnected,

    /// Data channel closed.
    #[error("channel closed")]
    ChannelClosed,

    /// Send failed.
    #[error("send failed: {0}")]
    SendFailed(String),

    /// Receive failed.
    #[error("receive failed: {0}")]
    ReceiveFailed(String),

    /// Offer/answer exchange failed.
    #[error("negotiation failed: {0}")]
    Negotiation(String),
}

/// One frame read from a data channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelFrame {
    /// Control record.
    Text(String),
    /// File bytes.
    Binary(Vec<u8>),
}

/// Events raised by a peer connection.
pub enum TransportEvent {
    /// A local connectivity candidate to forward to the counterpart.
    LocalCandidate(Value),
    /// Connection state changed.
    Phase(LinkPhase),
    /// The data channel is open and writable.
    ChannelOpen(Arc<dyn DataChannel>),
    /// A frame arrived on the data channel.
    Frame(ChannelFrame),
}

impl std::fmt::Debug for TransportEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LocalCandidate(c) => f.debug_tuple("LocalCandidate").field(c).finish(),
            Self::Phase(p) => f.debug_tuple("Phase").field(p).finish(),
            Self::ChannelOpen(_) => f.write_str("ChannelOpen"),
            Self::Frame(ChannelFrame::Text(t)) => write!(f, "Frame(Text({} chars))", t.len()),
            Self::Frame(ChannelFrame::Binary(b)) => write!(f, "Frame(Binary({} bytes))", b.len()),
        }
    }
}

/// Ordered, reliable data channel.
#[async_trait]
pub trait DataChannel: Send + Sync {
    /// Send a text frame.
    async fn send_text(&self, text: &str) -> Result<(), TransportError>;

    /// Send a binary frame.
    async fn send_binary(&self, data: &[u8]) -> Result<(), TransportError>;

    /// Bytes queued but not yet handed to the network.
    fn buffered_amount(&self) -> usize;

    /// Whether the channel still accepts frames.
    fn is_open(&self) -> bool;

    /// Close the channel.
    async fn close(&self);

    /// Wait until at most `high_water` bytes are buffered.
    ///
    /// The default polls every `poll_interval`. Transports with a
    /// low-watermark notification should override it.
    async fn wait_writable(
        &self,
        high_water: usize,
        poll_interval: Duration,
    ) -> Result<(), TransportError> {
        while self.buffered_amount() > high_water {
            if !self.is_open() {
                return Err(TransportError::ChannelClosed);
            }
            tokio::time::sleep(poll_interval).await;
        }
        Ok(())
    }
}

/// One peer connection.
#[async_trait]
pub trait PeerConnection: Send + Sync {
    /// Initiator: create the data channel and return the local offer.
    async fn create_offer(&self) -> Result<Value, TransportError>;

    /// Responder: apply the remote offer and return the local answer.
    async fn accept_offer(&self, offer: Value) -> Result<Value, TransportError>;

    /// Initiator: apply the remote answer.
    async fn apply_answer(&self, answer: Value) -> Result<(), TransportError>;

    /// Apply a remote connectivity candidate.
    async fn add_remote_candidate(&self, candidate: Value) -> Result<(), TransportError>;

    /// Release the connection. Idempotent.
    async fn close(&self);
}

/// Connection plus the stream of its events.
pub type Connection = (
    Arc<dyn PeerConnection>,
    mpsc::UnboundedReceiver<TransportEvent>,
);

/// Creates peer connections.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Create a fresh connection.
    async fn connect(&self) -> Result<Connection, TransportError>;
}

/// Outbound half of the relay socket.
pub trait SignalingLink: Send + Sync {
    /// Queue a message for the relay.
    fn send(&self, message: ClientMessage) -> Result<(), TransportError>;
}

impl SignalingLink for mpsc::UnboundedSender<ClientMessage> {
    fn send(&self, message: ClientMessage) -> Result<(), TransportError> {
        mpsc::UnboundedSender::send(self, message).map_err(|_| TransportError::NotConnected)
    }
}
