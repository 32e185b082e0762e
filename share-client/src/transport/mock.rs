//! Mock transports for testing.
//!
//! Allows scripting connection outcomes and capturing sent frames and
//! relay messages for verification.

use super::{
    ChannelFrame, Connection, Connector, DataChannel, PeerConnection, SignalingLink,
    TransportError, TransportEvent,
};
use async_trait::async_trait;
use peershare_core::LinkPhase;
use peershare_types::ClientMessage;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

// ===========================================
// MockDataChannel
// ===========================================

/// Mock data channel with a simulated send buffer.
///
/// Every send adds to the buffer; every `buffered_amount()` call drains
/// `drain_step` bytes, which models a network that empties the buffer
/// while the sender polls.
#[derive(Debug, Default)]
pub struct MockDataChannel {
    inner: Arc<Mutex<MockChannelInner>>,
}

#[derive(Debug, Default)]
struct MockChannelInner {
    closed: bool,
    sent: Vec<ChannelFrame>,
    buffered: usize,
    drain_step: usize,
    buffered_at_send: Vec<usize>,
    fail_next_send: Option<String>,
}

impl MockDataChannel {
    /// Create an open channel whose buffer drains instantly.
    pub fn new() -> Self {
        Self::with_drain(usize::MAX)
    }

    /// Create an open channel draining `drain_step` bytes per poll.
    pub fn with_drain(drain_step: usize) -> Self {
        let channel = Self::default();
        channel.inner.lock().unwrap().drain_step = drain_step;
        channel
    }

    /// Frames sent so far.
    pub fn sent_frames(&self) -> Vec<ChannelFrame> {
        self.inner.lock().unwrap().sent.clone()
    }

    /// Buffered amount observed right before each send.
    pub fn buffered_at_send(&self) -> Vec<usize> {
        self.inner.lock().unwrap().buffered_at_send.clone()
    }

    /// Cause the next send to fail.
    pub fn fail_next_send(&self, error: &str) {
        self.inner.lock().unwrap().fail_next_send = Some(error.to_string());
    }

    /// Whether `close()` was called.
    pub fn is_closed(&self) -> bool {
        self.inner.lock().unwrap().closed
    }

    fn push(&self, frame: ChannelFrame, len: usize) -> Result<(), TransportError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.closed {
            return Err(TransportError::ChannelClosed);
        }
        if let Some(error) = inner.fail_next_send.take() {
            return Err(TransportError::SendFailed(error));
        }
        let buffered = inner.buffered;
        inner.buffered_at_send.push(buffered);
        inner.buffered += len;
        inner.sent.push(frame);
        Ok(())
    }
}

impl Clone for MockDataChannel {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

#[async_trait]
impl DataChannel for MockDataChannel {
    async fn send_text(&self, text: &str) -> Result<(), TransportError> {
        self.push(ChannelFrame::Text(text.to_string()), text.len())
    }

    async fn send_binary(&self, data: &[u8]) -> Result<(), TransportError> {
        self.push(ChannelFrame::Binary(data.to_vec()), data.len())
    }

    fn buffered_amount(&self) -> usize {
        let mut inner = self.inner.lock().unwrap();
        let current = inner.buffered;
        inner.buffered = current.saturating_sub(inner.drain_step);
        current
    }

    fn is_open(&self) -> bool {
        !self.inner.lock().unwrap().closed
    }

    async fn close(&self) {
        self.inner.lock().unwrap().closed = true;
    }
}

// ===========================================
// MockPeerConnection / MockConnector
// ===========================================

/// Mock peer connection recording every negotiation step.
#[derive(Debug, Default)]
pub struct MockPeerConnection {
    inner: Arc<Mutex<MockConnectionInner>>,
}

#[derive(Debug, Default)]
struct MockConnectionInner {
    events: Option<mpsc::UnboundedSender<TransportEvent>>,
    channel: Option<MockDataChannel>,
    offers_created: usize,
    offers_accepted: Vec<Value>,
    answers_applied: Vec<Value>,
    remote_candidates: Vec<Value>,
    closed: bool,
    fail_offer: Option<String>,
}

impl MockPeerConnection {
    /// Offers created so far.
    pub fn offers_created(&self) -> usize {
        self.inner.lock().unwrap().offers_created
    }

    /// Remote offers applied.
    pub fn offers_accepted(&self) -> Vec<Value> {
        self.inner.lock().unwrap().offers_accepted.clone()
    }

    /// Remote answers applied.
    pub fn answers_applied(&self) -> Vec<Value> {
        self.inner.lock().unwrap().answers_applied.clone()
    }

    /// Remote candidates applied.
    pub fn remote_candidates(&self) -> Vec<Value> {
        self.inner.lock().unwrap().remote_candidates.clone()
    }

    /// Whether `close()` was called.
    pub fn is_closed(&self) -> bool {
        self.inner.lock().unwrap().closed
    }

    /// Push an event as if the transport raised it.
    pub fn emit(&self, event: TransportEvent) {
        if let Some(events) = &self.inner.lock().unwrap().events {
            let _ = events.send(event);
        }
    }

    /// Report connected and hand out the scripted channel, if any.
    fn open_scripted_channel(&self) {
        let channel = self.inner.lock().unwrap().channel.clone();
        if let Some(channel) = channel {
            self.emit(TransportEvent::Phase(LinkPhase::Established));
            self.emit(TransportEvent::ChannelOpen(Arc::new(channel)));
        }
    }
}

impl Clone for MockPeerConnection {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

#[async_trait]
impl PeerConnection for MockPeerConnection {
    async fn create_offer(&self) -> Result<Value, TransportError> {
        let n = {
            let mut inner = self.inner.lock().unwrap();
            if let Some(error) = inner.fail_offer.take() {
                return Err(TransportError::Negotiation(error));
            }
            inner.offers_created += 1;
            inner.offers_created
        };
        self.emit(TransportEvent::LocalCandidate(
            json!({ "candidate": "host-initiator" }),
        ));
        Ok(json!({ "type": "offer", "sdp": format!("mock-offer-{n}") }))
    }

    async fn accept_offer(&self, offer: Value) -> Result<Value, TransportError> {
        self.inner.lock().unwrap().offers_accepted.push(offer);
        self.emit(TransportEvent::LocalCandidate(
            json!({ "candidate": "host-responder" }),
        ));
        self.open_scripted_channel();
        Ok(json!({ "type": "answer", "sdp": "mock-answer" }))
    }

    async fn apply_answer(&self, answer: Value) -> Result<(), TransportError> {
        self.inner.lock().unwrap().answers_applied.push(answer);
        self.open_scripted_channel();
        Ok(())
    }

    async fn add_remote_candidate(&self, candidate: Value) -> Result<(), TransportError> {
        self.inner.lock().unwrap().remote_candidates.push(candidate);
        Ok(())
    }

    async fn close(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.closed = true;
        inner.events = None;
    }
}

/// Mock connector.
///
/// By default connections stall after negotiation (no channel ever opens).
/// Use [`MockConnector::with_channel`] to open a channel once the
/// offer/answer exchange completes.
#[derive(Debug, Default)]
pub struct MockConnector {
    inner: Arc<Mutex<MockConnectorInner>>,
}

#[derive(Debug, Default)]
struct MockConnectorInner {
    channel: Option<MockDataChannel>,
    connections: Vec<MockPeerConnection>,
    fail_next_connect: Option<String>,
    fail_next_offer: Option<String>,
}

impl MockConnector {
    /// Connector whose connections never open a channel.
    pub fn new() -> Self {
        Self::default()
    }

    /// Connector whose connections open `channel` after negotiation.
    pub fn with_channel(channel: MockDataChannel) -> Self {
        let connector = Self::default();
        connector.inner.lock().unwrap().channel = Some(channel);
        connector
    }

    /// Connections created so far.
    pub fn connections(&self) -> Vec<MockPeerConnection> {
        self.inner.lock().unwrap().connections.clone()
    }

    /// Most recent connection.
    pub fn last_connection(&self) -> Option<MockPeerConnection> {
        self.inner.lock().unwrap().connections.last().cloned()
    }

    /// Cause the next connect() to fail.
    pub fn fail_next_connect(&self, error: &str) {
        self.inner.lock().unwrap().fail_next_connect = Some(error.to_string());
    }

    /// Cause the next connection's offer to fail.
    pub fn fail_next_offer(&self, error: &str) {
        self.inner.lock().unwrap().fail_next_offer = Some(error.to_string());
    }
}

impl Clone for MockConnector {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self) -> Result<Connection, TransportError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(error) = inner.fail_next_connect.take() {
            return Err(TransportError::ConnectionFailed(error));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let connection = MockPeerConnection::default();
        {
            let mut conn = connection.inner.lock().unwrap();
            conn.events = Some(tx);
            conn.channel = inner.channel.clone();
            conn.fail_offer = inner.fail_next_offer.take();
        }
        inner.connections.push(connection.clone());
        Ok((Arc::new(connection), rx))
    }
}

// ===========================================
// RecordingLink
// ===========================================

/// Signaling link that records every message.
#[derive(Debug, Default)]
pub struct RecordingLink {
    inner: Arc<Mutex<RecordingInner>>,
}

#[derive(Debug, Default)]
struct RecordingInner {
    sent: Vec<ClientMessage>,
    disconnected: bool,
}

impl RecordingLink {
    /// Create a connected link.
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages sent so far.
    pub fn sent(&self) -> Vec<ClientMessage> {
        self.inner.lock().unwrap().sent.clone()
    }

    /// Message types sent so far, in order.
    pub fn sent_kinds(&self) -> Vec<&'static str> {
        self.inner
            .lock()
            .unwrap()
            .sent
            .iter()
            .map(ClientMessage::kind)
            .collect()
    }

    /// Make every later send fail.
    pub fn disconnect(&self) {
        self.inner.lock().unwrap().disconnected = true;
    }
}

impl Clone for RecordingLink {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl SignalingLink for RecordingLink {
    fn send(&self, message: ClientMessage) -> Result<(), TransportError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.disconnected {
            return Err(TransportError::NotConnected);
        }
        inner.sent.push(message);
        Ok(())
    }
}
