//! Connection negotiation for one transfer.
//!
//! A [`Negotiator`] owns exactly one [`PeerConnection`] and its data channel,
//! scoped to one counterpart and one session. A driver task pumps transport
//! events and relayed negotiation messages:
//!
//! ```text
//! initiator                      relay                      responder
//!   create_offer ── rtc-offer ──────►──────────────────► accept_offer
//!   apply_answer ◄────────────────◄──── rtc-answer ────────┘
//!   local candidates ◄──────── rtc-ice-candidate ────────► local candidates
//! ```
//!
//! Remote candidates that arrive before the remote description are held
//! back and applied once it is set.

use peershare_core::LinkPhase;
use peershare_types::{ClientMessage, PeerId, SessionId, Signal};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::TransferError;
use crate::signaling::{ListenerGuard, NegotiationSignal, SignalKind, SignalListener};
use crate::transport::{
    ChannelFrame, Connector, DataChannel, PeerConnection, SignalingLink, TransportEvent,
};

/// Which side of the offer/answer exchange this end plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiatorRole {
    /// Creates the channel and the offer (sender).
    Initiator,
    /// Answers the offer (receiver).
    Responder,
}

/// Counterpart and session a link is scoped to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkTarget {
    /// Counterpart peer.
    pub peer_id: PeerId,
    /// Session.
    pub session_id: SessionId,
}

impl LinkTarget {
    fn signal(&self, sdp: Option<Value>, candidate: Option<Value>) -> Signal {
        Signal {
            target_id: self.peer_id.clone(),
            session_id: Some(self.session_id.clone()),
            sdp,
            candidate,
        }
    }
}

#[derive(Clone)]
enum ChannelState {
    Pending,
    Open(Arc<dyn DataChannel>),
    Failed,
    Closed,
    Error(String),
}

/// One negotiated link.
pub struct Negotiator {
    target: LinkTarget,
    connection: Arc<dyn PeerConnection>,
    state: watch::Receiver<ChannelState>,
    frames: Mutex<Option<mpsc::UnboundedReceiver<ChannelFrame>>>,
    guard: Mutex<Option<ListenerGuard>>,
    driver: Mutex<Option<JoinHandle<()>>>,
    deadline: Instant,
    closed: AtomicBool,
}

impl std::fmt::Debug for Negotiator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Negotiator")
            .field("target", &self.target)
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish()
    }
}

impl Negotiator {
    /// Create the connection and start negotiating.
    ///
    /// `listener` must already be subscribed for the counterpart so no
    /// early message is lost. Link phases are reported on `phases`. The
    /// connect deadline starts now.
    pub async fn start(
        role: NegotiatorRole,
        target: LinkTarget,
        listener: SignalListener,
        connector: &dyn Connector,
        signaling: Arc<dyn SignalingLink>,
        phases: mpsc::UnboundedSender<LinkPhase>,
        connect_timeout: Duration,
    ) -> Result<Self, TransferError> {
        let deadline = Instant::now() + connect_timeout;
        let (signals, guard) = listener.into_parts();

        let (connection, events) = connector
            .connect()
            .await
            .map_err(|e| TransferError::ConnectionFailed(e.to_string()))?;
        let _ = phases.send(LinkPhase::Negotiating);

        let (state_tx, state_rx) = watch::channel(ChannelState::Pending);
        let (frames_tx, frames_rx) = mpsc::unbounded_channel();

        let driver = Driver {
            role,
            target: target.clone(),
            connection: Arc::clone(&connection),
            signaling: Arc::clone(&signaling),
            phases,
            state: state_tx,
            frames: frames_tx,
            remote_applied: false,
            pending_candidates: Vec::new(),
            open: false,
        };
        let handle = tokio::spawn(driver.run(events, signals));

        let negotiator = Self {
            target,
            connection,
            state: state_rx,
            frames: Mutex::new(Some(frames_rx)),
            guard: Mutex::new(Some(guard)),
            driver: Mutex::new(Some(handle)),
            deadline,
            closed: AtomicBool::new(false),
        };

        if role == NegotiatorRole::Initiator {
            if let Err(e) = negotiator.send_offer(signaling.as_ref()).await {
                negotiator.close().await;
                return Err(e);
            }
        }

        info!(
            peer = %negotiator.target.peer_id,
            session = %negotiator.target.session_id,
            ?role,
            "Negotiation started"
        );
        Ok(negotiator)
    }

    async fn send_offer(&self, signaling: &dyn SignalingLink) -> Result<(), TransferError> {
        let offer = self
            .connection
            .create_offer()
            .await
            .map_err(|e| TransferError::ConnectionFailed(e.to_string()))?;
        signaling
            .send(ClientMessage::RtcOffer(self.target.signal(Some(offer), None)))
            .map_err(|e| TransferError::ConnectionFailed(e.to_string()))
    }

    /// Counterpart and session.
    pub fn target(&self) -> &LinkTarget {
        &self.target
    }

    /// Wait for the data channel to open.
    ///
    /// Fails with [`TransferError::Timeout`] once the connect deadline
    /// passes.
    pub async fn wait_for_channel(&self) -> Result<Arc<dyn DataChannel>, TransferError> {
        let mut state = self.state.clone();
        let wait = async move {
            loop {
                let outcome = match &*state.borrow_and_update() {
                    ChannelState::Pending => None,
                    ChannelState::Open(channel) => Some(Ok(Arc::clone(channel))),
                    ChannelState::Failed => Some(Err(TransferError::LinkFailed)),
                    ChannelState::Closed => Some(Err(TransferError::LinkClosed)),
                    ChannelState::Error(msg) => {
                        Some(Err(TransferError::ConnectionFailed(msg.clone())))
                    }
                };
                if let Some(outcome) = outcome {
                    return outcome;
                }
                if state.changed().await.is_err() {
                    return Err(TransferError::LinkClosed);
                }
            }
        };
        tokio::time::timeout_at(self.deadline, wait)
            .await
            .map_err(|_| TransferError::Timeout)?
    }

    /// Take the incoming frame stream. Returns `None` after the first call.
    pub fn take_frames(&self) -> Option<mpsc::UnboundedReceiver<ChannelFrame>> {
        self.frames
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
    }

    /// Tear the link down. Idempotent.
    ///
    /// The relay listener is removed first and synchronously, so no
    /// negotiation message reaches this link once `close` has begun.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        drop(self.guard.lock().unwrap_or_else(|e| e.into_inner()).take());
        if let Some(driver) = self
            .driver
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            driver.abort();
        }

        let channel = match &*self.state.borrow() {
            ChannelState::Open(channel) => Some(Arc::clone(channel)),
            _ => None,
        };
        if let Some(channel) = channel {
            channel.close().await;
        }
        self.connection.close().await;
        debug!(peer = %self.target.peer_id, "Link closed");
    }

    /// Whether `close()` has run.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Drop for Negotiator {
    fn drop(&mut self) {
        if let Some(driver) = self
            .driver
            .get_mut()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            driver.abort();
        }
    }
}

struct Driver {
    role: NegotiatorRole,
    target: LinkTarget,
    connection: Arc<dyn PeerConnection>,
    signaling: Arc<dyn SignalingLink>,
    phases: mpsc::UnboundedSender<LinkPhase>,
    state: watch::Sender<ChannelState>,
    frames: mpsc::UnboundedSender<ChannelFrame>,
    remote_applied: bool,
    pending_candidates: Vec<Value>,
    open: bool,
}

impl Driver {
    async fn run(
        mut self,
        mut events: mpsc::UnboundedReceiver<TransportEvent>,
        mut signals: mpsc::UnboundedReceiver<NegotiationSignal>,
    ) {
        let mut listening = true;
        loop {
            tokio::select! {
                event = events.recv() => {
                    let Some(event) = event else {
                        self.finish(ChannelState::Closed, LinkPhase::Closed);
                        break;
                    };
                    if !self.on_transport(event) {
                        break;
                    }
                }
                signal = signals.recv(), if listening => match signal {
                    Some(signal) => self.on_signal(signal).await,
                    None => listening = false,
                },
            }
        }
    }

    /// Returns false once the link is finished.
    fn on_transport(&mut self, event: TransportEvent) -> bool {
        match event {
            TransportEvent::LocalCandidate(candidate) => {
                if !self.open {
                    let message =
                        ClientMessage::RtcIceCandidate(self.target.signal(None, Some(candidate)));
                    if let Err(e) = self.signaling.send(message) {
                        warn!(error = %e, "Failed to forward local candidate");
                    }
                }
                true
            }
            TransportEvent::Phase(phase @ (LinkPhase::Failed | LinkPhase::Closed)) => {
                let state = if phase == LinkPhase::Failed {
                    ChannelState::Failed
                } else {
                    ChannelState::Closed
                };
                self.finish(state, phase);
                false
            }
            TransportEvent::Phase(phase) => {
                let _ = self.phases.send(phase);
                true
            }
            TransportEvent::ChannelOpen(channel) => {
                self.open = true;
                self.state.send_replace(ChannelState::Open(channel));
                let _ = self.phases.send(LinkPhase::Active);
                true
            }
            TransportEvent::Frame(frame) => {
                let _ = self.frames.send(frame);
                true
            }
        }
    }

    fn finish(&mut self, state: ChannelState, phase: LinkPhase) {
        // An open channel keeps its state; the phase report ends the transfer.
        if !self.open {
            self.state.send_replace(state);
        }
        let _ = self.phases.send(phase);
    }

    async fn on_signal(&mut self, message: NegotiationSignal) {
        let signal = message.signal;
        match (message.kind, self.role) {
            (SignalKind::Offer, NegotiatorRole::Responder) => {
                let Some(offer) = signal.sdp else {
                    debug!("Offer without sdp ignored");
                    return;
                };
                match self.connection.accept_offer(offer).await {
                    Ok(answer) => {
                        self.remote_described().await;
                        let reply = ClientMessage::RtcAnswer(self.target.signal(Some(answer), None));
                        if let Err(e) = self.signaling.send(reply) {
                            self.fail(format!("failed to send answer: {e}"));
                        }
                    }
                    Err(e) => self.fail(e.to_string()),
                }
            }
            (SignalKind::Answer, NegotiatorRole::Initiator) => {
                let Some(answer) = signal.sdp else {
                    debug!("Answer without sdp ignored");
                    return;
                };
                match self.connection.apply_answer(answer).await {
                    Ok(()) => self.remote_described().await,
                    Err(e) => self.fail(e.to_string()),
                }
            }
            (SignalKind::Candidate, _) => {
                let Some(candidate) = signal.candidate else {
                    return;
                };
                if self.remote_applied {
                    self.add_candidate(candidate).await;
                } else {
                    self.pending_candidates.push(candidate);
                }
            }
            (kind, role) => debug!(?kind, ?role, "Signal not meant for this role"),
        }
    }

    async fn remote_described(&mut self) {
        self.remote_applied = true;
        for candidate in std::mem::take(&mut self.pending_candidates) {
            self.add_candidate(candidate).await;
        }
    }

    async fn add_candidate(&self, candidate: Value) {
        if let Err(e) = self.connection.add_remote_candidate(candidate).await {
            warn!(error = %e, "Remote candidate rejected");
        }
    }

    fn fail(&mut self, reason: String) {
        warn!(peer = %self.target.peer_id, %reason, "Negotiation failed");
        if !self.open {
            self.state.send_replace(ChannelState::Error(reason));
        }
        let _ = self.phases.send(LinkPhase::Failed);
    }
}
