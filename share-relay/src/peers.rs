//! Registry of connected peers.
//!
//! A peer lives exactly as long as its WebSocket. Outbound messages go
//! through an unbounded sender feeding the connection's writer task, so
//! enqueueing never blocks while the relay state lock is held.

use share_core::{derive_locality_key, is_private_address, LocalityKey};
use share_types::{PeerId, PeerSummary, ServerMessage};
use std::collections::HashMap;
use std::net::IpAddr;
use std::time::Instant;
use tokio::sync::mpsc;

/// Outbound half of a peer's socket.
pub type Outbound = mpsc::UnboundedSender<ServerMessage>;

/// A connected peer.
#[derive(Debug)]
pub struct Peer {
    /// Server-assigned id.
    pub id: PeerId,
    /// Display name.
    pub name: String,
    /// Source address the relay saw.
    pub address: IpAddr,
    /// Network segment key.
    pub locality: LocalityKey,
    /// Socket writer.
    pub outbound: Outbound,
    /// When the socket was accepted.
    pub connected_at: Instant,
}

impl Peer {
    /// Build a peer record for a fresh connection.
    pub fn new(id: PeerId, name: String, address: IpAddr, outbound: Outbound) -> Self {
        Self {
            id,
            name,
            address,
            locality: derive_locality_key(address),
            outbound,
            connected_at: Instant::now(),
        }
    }

    /// Whether the source address is in a private range.
    pub fn is_private(&self) -> bool {
        is_private_address(self.address)
    }

    /// Id and name, as shown to other peers.
    pub fn summary(&self) -> PeerSummary {
        PeerSummary {
            id: self.id.clone(),
            name: self.name.clone(),
        }
    }

    /// Enqueue a message. Returns false when the socket is gone.
    pub fn send(&self, message: ServerMessage) -> bool {
        self.outbound.send(message).is_ok()
    }
}

/// All live peers, keyed by id.
#[derive(Debug, Default)]
pub struct PeerRegistry {
    peers: HashMap<PeerId, Peer>,
}

impl PeerRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a peer. A duplicate id is ignored and returns false.
    pub fn add(&mut self, peer: Peer) -> bool {
        if self.peers.contains_key(&peer.id) {
            return false;
        }
        self.peers.insert(peer.id.clone(), peer);
        true
    }

    /// Look up a peer.
    pub fn get(&self, id: &PeerId) -> Option<&Peer> {
        self.peers.get(id)
    }

    /// Look up a peer for mutation.
    pub fn get_mut(&mut self, id: &PeerId) -> Option<&mut Peer> {
        self.peers.get_mut(id)
    }

    /// Remove a peer.
    pub fn remove(&mut self, id: &PeerId) -> Option<Peer> {
        self.peers.remove(id)
    }

    /// Peers sharing `key`, except `exclude`.
    pub fn locality_peers<'a>(
        &'a self,
        key: &'a LocalityKey,
        exclude: &'a PeerId,
    ) -> impl Iterator<Item = &'a Peer> + 'a {
        self.peers
            .values()
            .filter(move |p| &p.locality == key && &p.id != exclude)
    }

    /// Send `message` to every peer sharing `key`, except `exclude`.
    pub fn broadcast_locality(&self, key: &LocalityKey, exclude: &PeerId, message: &ServerMessage) {
        for peer in self.locality_peers(key, exclude) {
            peer.send(message.clone());
        }
    }

    /// Enqueue a message for `id`. Returns false when the peer is unknown
    /// or its socket is gone.
    pub fn send_to(&self, id: &PeerId, message: ServerMessage) -> bool {
        self.peers.get(id).is_some_and(|p| p.send(message))
    }

    /// Number of live peers.
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    /// Whether no peer is connected.
    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}
