//! Client-side list of nearby peers, kept in arrival order.

use peershare_types::{PeerId, PeerSummary};

/// Peers the relay has reported in this client's locality.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeerDirectory {
    peers: Vec<PeerSummary>,
}

impl PeerDirectory {
    /// Create an empty list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole list (`nearby-peers`).
    pub fn set(&mut self, peers: Vec<PeerSummary>) {
        self.peers.clear();
        for peer in peers {
            self.add(peer);
        }
    }

    /// Add a peer unless its id is already listed (`peer-joined`).
    pub fn add(&mut self, peer: PeerSummary) -> bool {
        if self.contains(&peer.id) {
            return false;
        }
        self.peers.push(peer);
        true
    }

    /// Rename a listed peer (`peer-updated`).
    pub fn update(&mut self, id: &PeerId, name: &str) -> bool {
        match self.peers.iter_mut().find(|p| &p.id == id) {
            Some(peer) => {
                peer.name = name.to_string();
                true
            }
            None => false,
        }
    }

    /// Drop a peer (`peer-left`).
    pub fn remove(&mut self, id: &PeerId) -> bool {
        let before = self.peers.len();
        self.peers.retain(|p| &p.id != id);
        self.peers.len() != before
    }

    /// Whether `id` is listed.
    pub fn contains(&self, id: &PeerId) -> bool {
        self.peers.iter().any(|p| &p.id == id)
    }

    /// Listed peers.
    pub fn as_slice(&self) -> &[PeerSummary] {
        &self.peers
    }

    /// Number of listed peers.
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    /// Whether the list is empty.
    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}
