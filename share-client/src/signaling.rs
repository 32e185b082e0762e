//! Fan-out of relayed negotiation messages to the active negotiator.
//!
//! The relay socket delivers `rtc-offer`, `rtc-answer` and
//! `rtc-ice-candidate` to the controller; [`SignalBus`] routes each one to
//! the listener registered for its sender. Dropping the [`ListenerGuard`]
//! removes the listener synchronously, so nothing reaches a torn-down
//! negotiator.

use peershare_types::{PeerId, RelayedSignal, ServerMessage, SessionId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::debug;

/// Negotiation message kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    /// `rtc-offer`
    Offer,
    /// `rtc-answer`
    Answer,
    /// `rtc-ice-candidate`
    Candidate,
}

/// A negotiation message addressed to this client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NegotiationSignal {
    /// Which message it was.
    pub kind: SignalKind,
    /// Payload as relayed.
    pub signal: RelayedSignal,
}

impl NegotiationSignal {
    /// Extract a negotiation signal from a relay message.
    pub fn from_server(message: &ServerMessage) -> Option<Self> {
        let (kind, signal) = match message {
            ServerMessage::RtcOffer(s) => (SignalKind::Offer, s),
            ServerMessage::RtcAnswer(s) => (SignalKind::Answer, s),
            ServerMessage::RtcIceCandidate(s) => (SignalKind::Candidate, s),
            _ => return None,
        };
        Some(Self {
            kind,
            signal: signal.clone(),
        })
    }
}

struct Listener {
    token: u64,
    session_id: SessionId,
    tx: mpsc::UnboundedSender<NegotiationSignal>,
}

#[derive(Default)]
struct BusInner {
    next_token: u64,
    listeners: HashMap<PeerId, Listener>,
}

/// Routes negotiation messages by counterpart id.
#[derive(Clone, Default)]
pub struct SignalBus {
    inner: Arc<Mutex<BusInner>>,
}

impl std::fmt::Debug for SignalBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        f.debug_struct("SignalBus")
            .field("listeners", &inner.listeners.len())
            .finish()
    }
}

impl SignalBus {
    /// Create an empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Listen for messages from `peer_id` about `session_id`.
    ///
    /// Replaces any previous listener for the same peer.
    pub fn subscribe(&self, peer_id: PeerId, session_id: SessionId) -> SignalListener {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.next_token += 1;
        let token = inner.next_token;
        inner.listeners.insert(
            peer_id.clone(),
            Listener {
                token,
                session_id,
                tx,
            },
        );
        SignalListener {
            receiver: rx,
            guard: ListenerGuard {
                bus: self.clone(),
                peer_id,
                token,
            },
        }
    }

    /// Deliver a signal. Returns false when nobody is listening.
    pub fn dispatch(&self, signal: NegotiationSignal) -> bool {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let Some(listener) = inner.listeners.get(&signal.signal.from_id) else {
            debug!(from = %signal.signal.from_id, kind = ?signal.kind, "No listener for signal");
            return false;
        };
        if let Some(session_id) = &signal.signal.session_id {
            if session_id != &listener.session_id {
                debug!(%session_id, "Dropping signal for another session");
                return false;
            }
        }
        listener.tx.send(signal).is_ok()
    }

    /// Number of registered listeners.
    pub fn listener_count(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .listeners
            .len()
    }

    fn unsubscribe(&self, peer_id: &PeerId, token: u64) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if inner
            .listeners
            .get(peer_id)
            .is_some_and(|l| l.token == token)
        {
            inner.listeners.remove(peer_id);
        }
    }
}

/// Removes its listener when dropped.
pub struct ListenerGuard {
    bus: SignalBus,
    peer_id: PeerId,
    token: u64,
}

impl std::fmt::Debug for ListenerGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerGuard")
            .field("peer_id", &self.peer_id)
            .finish()
    }
}

impl Drop for ListenerGuard {
    fn drop(&mut self) {
        self.bus.unsubscribe(&self.peer_id, self.token);
    }
}

/// A registered listener: the message stream plus its guard.
#[derive(Debug)]
pub struct SignalListener {
    receiver: mpsc::UnboundedReceiver<NegotiationSignal>,
    guard: ListenerGuard,
}

impl SignalListener {
    /// Split into the message stream and the guard.
    pub fn into_parts(self) -> (mpsc::UnboundedReceiver<NegotiationSignal>, ListenerGuard) {
        (self.receiver, self.guard)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signal(kind: SignalKind, from: &str, session: Option<&str>) -> NegotiationSignal {
        NegotiationSignal {
            kind,
            signal: RelayedSignal {
                from_id: PeerId::new(from),
                session_id: session.map(SessionId::new),
                sdp: None,
                candidate: None,
            },
        }
    }

    #[tokio::test]
    async fn routes_by_sender() {
        let bus = SignalBus::new();
        let (mut rx, _guard) = bus
            .subscribe(PeerId::new("alice"), SessionId::new("s1"))
            .into_parts();

        assert!(bus.dispatch(signal(SignalKind::Offer, "alice", Some("s1"))));
        assert!(!bus.dispatch(signal(SignalKind::Offer, "bob", Some("s1"))));
        assert!(!bus.dispatch(signal(SignalKind::Answer, "alice", Some("s2"))));

        let got = rx.recv().await.unwrap();
        assert_eq!(got.kind, SignalKind::Offer);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn dropping_guard_unsubscribes() {
        let bus = SignalBus::new();
        let listener = bus.subscribe(PeerId::new("alice"), SessionId::new("s1"));
        assert_eq!(bus.listener_count(), 1);

        drop(listener);
        assert_eq!(bus.listener_count(), 0);
        assert!(!bus.dispatch(signal(SignalKind::Candidate, "alice", None)));
    }

    #[test]
    fn stale_guard_keeps_newer_listener() {
        let bus = SignalBus::new();
        let old = bus.subscribe(PeerId::new("alice"), SessionId::new("s1"));
        let _new = bus.subscribe(PeerId::new("alice"), SessionId::new("s2"));

        drop(old);
        assert_eq!(bus.listener_count(), 1);
    }

    #[test]
    fn extracts_only_negotiation_messages() {
        let relayed = RelayedSignal {
            from_id: PeerId::new("a"),
            session_id: None,
            sdp: None,
            candidate: None,
        };
        assert!(NegotiationSignal::from_server(&ServerMessage::RtcAnswer(relayed.clone())).is_some());
        assert!(NegotiationSignal::from_server(&ServerMessage::ReceiverRtcReady(relayed)).is_none());
    }
}
