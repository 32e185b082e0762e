//! Main ShareRelay server coordination.
//!
//! ShareRelay owns the peer and session registries, the rate limiters and
//! the metrics. Every registry update and the outbound enqueues it causes
//! happen inside one critical section on [`RelayState`].

use crate::config::Config;
use crate::error::ProtocolError;
use crate::limits::RateLimits;
use crate::peers::{Outbound, Peer, PeerRegistry};
use crate::router::{self, Followup, RouteContext};
use crate::sessions::{SessionBreakdown, SessionInfo, SessionRegistry, StreamItem};
use share_core::generate_name;
use share_types::{
    ClientMessage, NearbyPeers, PeerId, PeerNotice, ServerMessage, SessionId, SessionRef,
    TransferProgress, Welcome,
};
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tokio::time::Instant;

/// Operational metrics for monitoring relay activity.
///
/// All counters are monotonically increasing (reset only on restart).
/// Thread-safe via `AtomicU64`, no locks needed for incrementing.
#[derive(Debug, Default)]
pub struct RelayMetrics {
    /// Total WebSocket connections accepted.
    pub connections_total: AtomicU64,
    /// Total inbound messages.
    pub messages_total: AtomicU64,
    /// Total sessions created.
    pub sessions_created: AtomicU64,
    /// Total successful joins and accepts.
    pub joins_total: AtomicU64,
    /// Total bytes forwarded to download streams.
    pub bytes_relayed: AtomicU64,
    /// Total chunks forwarded to download streams.
    pub chunks_relayed: AtomicU64,
    /// Total rate limit rejections (connection + message).
    pub rate_limit_hits: AtomicU64,
    /// Total protocol errors (undecodable frames, bad chunks).
    pub errors_total: AtomicU64,
}

impl RelayMetrics {
    /// Add `n` to a counter.
    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    /// Read a counter.
    pub fn get(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }
}

/// Registries guarded together.
#[derive(Debug, Default)]
pub struct RelayState {
    /// Connected peers.
    pub peers: PeerRegistry,
    /// Active sessions.
    pub sessions: SessionRegistry,
}

/// Main relay server.
pub struct ShareRelay {
    config: Config,
    /// Rate limiters for connections and messages.
    rate_limits: RateLimits,
    /// Operational metrics (counters).
    metrics: RelayMetrics,
    state: Mutex<RelayState>,
}

impl std::fmt::Debug for ShareRelay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShareRelay")
            .field("config", &self.config)
            .field("rate_limits", &self.rate_limits)
            .field("metrics", &self.metrics)
            .finish_non_exhaustive()
    }
}

impl ShareRelay {
    /// Create a relay with the given config.
    pub fn new(config: Config) -> Self {
        let rate_limits = RateLimits::new(&config.limits);
        Self {
            config,
            rate_limits,
            metrics: RelayMetrics::default(),
            state: Mutex::new(RelayState::default()),
        }
    }

    /// Get the relay configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Get access to the rate limiters.
    pub fn rate_limits(&self) -> &RateLimits {
        &self.rate_limits
    }

    /// Get access to the operational metrics.
    pub fn metrics(&self) -> &RelayMetrics {
        &self.metrics
    }

    fn state(&self) -> MutexGuard<'_, RelayState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    // ===========================================
    // Connection lifecycle
    // ===========================================

    /// Register a new connection and greet it.
    ///
    /// Sends `welcome` and `nearby-peers` to the newcomer and `peer-joined`
    /// to its locality.
    pub fn connect_peer(&self, address: IpAddr, outbound: Outbound) -> PeerId {
        RelayMetrics::add(&self.metrics.connections_total, 1);
        let mut state = self.state();

        let mut id = PeerId::random();
        while state.peers.get(&id).is_some() {
            id = PeerId::random();
        }
        let peer = Peer::new(id.clone(), generate_name(), address, outbound);

        peer.send(ServerMessage::Welcome(Welcome {
            peer_id: id.clone(),
            name: peer.name.clone(),
            locality: peer.locality.to_string(),
            is_private: peer.is_private(),
        }));
        state.peers.broadcast_locality(
            &peer.locality,
            &id,
            &ServerMessage::PeerJoined(PeerNotice {
                peer: peer.summary(),
            }),
        );
        let nearby = state
            .peers
            .locality_peers(&peer.locality, &id)
            .map(Peer::summary)
            .collect();
        peer.send(ServerMessage::NearbyPeers(NearbyPeers { peers: nearby }));

        tracing::info!(peer = %id, name = %peer.name, locality = %peer.locality, "Peer connected");
        state.peers.add(peer);
        id
    }

    /// Drop a connection and clean up its sessions.
    pub fn disconnect_peer(&self, peer_id: &PeerId) {
        let mut state = self.state();
        router::disconnect(&mut state, peer_id);
    }

    // ===========================================
    // Inbound messages
    // ===========================================

    /// Handle one text frame from `peer_id`.
    pub fn handle_text(self: &Arc<Self>, peer_id: &PeerId, text: &str) {
        RelayMetrics::add(&self.metrics.messages_total, 1);

        let decoded = ClientMessage::decode(text);
        let metered = match &decoded {
            Ok(message) => !self.is_stream_traffic(peer_id, message),
            Err(_) => true,
        };
        if metered {
            if let Err(e) = self.rate_limits.check_message(peer_id) {
                RelayMetrics::add(&self.metrics.rate_limit_hits, 1);
                tracing::warn!(peer = %peer_id, "{}", e);
                self.reject(peer_id, ProtocolError::from(e));
                return;
            }
        }

        match decoded {
            Ok(message) => self.handle_message(peer_id, message),
            Err(e) => self.reject(peer_id, ProtocolError::from(e)),
        }
    }

    /// Relayed bytes and progress from a live session's sender. These are
    /// bounded by the manifest and skip the per-peer message quota.
    fn is_stream_traffic(&self, peer_id: &PeerId, message: &ClientMessage) -> bool {
        let session_id = match message {
            ClientMessage::FileChunk(chunk) => &chunk.session_id,
            ClientMessage::FileChunkEnd(end) => &end.session_id,
            ClientMessage::TransferProgress(update) => &update.session_id,
            _ => return false,
        };
        self.state()
            .sessions
            .get(session_id)
            .is_some_and(|s| &s.sender_id == peer_id && !s.status.is_terminal())
    }

    /// Handle one decoded message from `peer_id`.
    pub fn handle_message(self: &Arc<Self>, peer_id: &PeerId, message: ClientMessage) {
        tracing::debug!(peer = %peer_id, kind = message.kind(), "Inbound message");
        let outcome = {
            let mut state = self.state();
            let ctx = RouteContext {
                config: &self.config,
                metrics: &self.metrics,
            };
            router::route(&mut state, &ctx, peer_id, message)
        };

        match outcome {
            Ok(Some(Followup::RemoveAfterGrace(session_id))) => {
                self.schedule_removal(session_id)
            }
            Ok(None) => {}
            Err(e) => self.reject(peer_id, e),
        }
    }

    /// Report a bad frame back to its sender.
    pub fn reject(&self, peer_id: &PeerId, error: ProtocolError) {
        if !matches!(error, ProtocolError::RateLimited(_)) {
            RelayMetrics::add(&self.metrics.errors_total, 1);
            tracing::warn!(peer = %peer_id, "Rejected frame: {}", error);
        }
        self.state().peers.send_to(peer_id, error.to_message());
    }

    fn schedule_removal(self: &Arc<Self>, session_id: SessionId) {
        let relay = Arc::downgrade(self);
        let grace = self.config.sessions.completion_grace();
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            if let Some(relay) = relay.upgrade() {
                if relay.state().sessions.remove(&session_id).is_some() {
                    tracing::debug!(session = %session_id, "Removed finished session");
                }
            }
        });
    }

    // ===========================================
    // Relay data plane
    // ===========================================

    /// Attach a download stream to a session and tell the sender to start.
    pub fn subscribe_chunks(&self, session_id: &SessionId) -> Option<mpsc::UnboundedReceiver<StreamItem>> {
        let mut state = self.state();
        let state = &mut *state;
        let session = state.sessions.get_mut(session_id)?;
        let (tx, rx) = mpsc::unbounded_channel();
        session.chunk_subscribers.push(tx);
        state.peers.send_to(
            &session.sender_id,
            ServerMessage::ReceiverReady(SessionRef::new(session_id.clone())),
        );
        tracing::debug!(session = %session_id, "Download stream attached");
        Some(rx)
    }

    /// Attach a progress stream to a session.
    pub fn subscribe_progress(
        &self,
        session_id: &SessionId,
    ) -> Option<mpsc::UnboundedReceiver<TransferProgress>> {
        let mut state = self.state();
        let session = state.sessions.get_mut(session_id)?;
        let (tx, rx) = mpsc::unbounded_channel();
        session.progress_subscribers.push(tx);
        Some(rx)
    }

    /// Public view of a session.
    pub fn session_info(&self, session_id: &SessionId) -> Option<SessionInfo> {
        self.state().sessions.get(session_id).map(|s| s.info())
    }

    // ===========================================
    // Housekeeping
    // ===========================================

    /// Remove sessions older than the configured age. Returns the count.
    pub fn sweep_expired(&self) -> usize {
        let max_age = self.config.sessions.max_age();
        self.state().sessions.sweep_expired(Instant::now(), max_age)
    }

    /// Number of connected peers.
    pub fn peer_count(&self) -> usize {
        self.state().peers.len()
    }

    /// Number of active sessions.
    pub fn session_count(&self) -> usize {
        self.state().sessions.len()
    }

    /// Active sessions per lifecycle stage.
    pub fn session_breakdown(&self) -> SessionBreakdown {
        self.state().sessions.breakdown()
    }
}
