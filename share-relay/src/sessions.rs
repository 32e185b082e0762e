//! Registry of active transfer sessions.
//!
//! Sessions are indexed by id and by short code. Codes are unique among
//! active sessions; an id or code stops resolving the moment its session
//! is removed.

use share_core::generate_code;
use share_types::{
    total_size, FileMeta, PeerId, SessionId, SessionStatus, ShortCode, TransferMode,
    TransferProgress,
};
use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

/// One item on a relay download stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamItem {
    /// Raw bytes pushed by the sender.
    Chunk(Vec<u8>),
    /// The sender finished.
    End,
}

/// Session counts by lifecycle stage, for health reporting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionBreakdown {
    /// No receiver yet.
    pub waiting: usize,
    /// Receiver bound, no bytes yet.
    pub connecting: usize,
    /// Bytes flowing.
    pub transferring: usize,
    /// Complete, failed or cancelled and still inside the grace period.
    pub finished: usize,
    /// Sessions whose bytes pass through the relay.
    pub relayed: usize,
    /// Open download streams.
    pub download_streams: usize,
}

/// A transfer session.
#[derive(Debug)]
pub struct Session {
    /// Session id.
    pub id: SessionId,
    /// Six-digit code.
    pub code: ShortCode,
    /// Sender peer.
    pub sender_id: PeerId,
    /// Sender display name at creation.
    pub sender_name: String,
    /// Bound receiver.
    pub receiver_id: Option<PeerId>,
    /// Receiver display name at join.
    pub receiver_name: Option<String>,
    /// Manifest.
    pub files: Vec<FileMeta>,
    /// Sum of file sizes.
    pub total_size: u64,
    /// Lifecycle status.
    pub status: SessionStatus,
    /// Direct or relayed.
    pub transfer_mode: TransferMode,
    /// Creation time, for the age sweep.
    pub created_at: Instant,
    /// Open download streams.
    pub chunk_subscribers: Vec<mpsc::UnboundedSender<StreamItem>>,
    /// Open progress streams.
    pub progress_subscribers: Vec<mpsc::UnboundedSender<TransferProgress>>,
}

impl Session {
    /// The other party of `peer_id`, if any.
    pub fn counterpart(&self, peer_id: &PeerId) -> Option<&PeerId> {
        if &self.sender_id == peer_id {
            self.receiver_id.as_ref()
        } else if self.receiver_id.as_ref() == Some(peer_id) {
            Some(&self.sender_id)
        } else {
            None
        }
    }

    /// Whether `peer_id` is the sender or the bound receiver.
    pub fn is_party(&self, peer_id: &PeerId) -> bool {
        &self.sender_id == peer_id || self.receiver_id.as_ref() == Some(peer_id)
    }

    /// Public view for the HTTP surface.
    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            id: self.id.clone(),
            code: self.code.to_string(),
            sender_name: self.sender_name.clone(),
            files: self.files.clone(),
            total_size: self.total_size,
            status: self.status,
            transfer_mode: self.transfer_mode,
        }
    }

    /// Forward bytes to every download stream. Returns how many got them.
    pub fn push_chunk(&mut self, bytes: &[u8]) -> usize {
        self.chunk_subscribers
            .retain(|tx| tx.send(StreamItem::Chunk(bytes.to_vec())).is_ok());
        self.chunk_subscribers.len()
    }

    /// End every download stream and forget them.
    pub fn end_chunks(&mut self) {
        for tx in self.chunk_subscribers.drain(..) {
            let _ = tx.send(StreamItem::End);
        }
    }

    /// Forward progress to every progress stream.
    pub fn push_progress(&mut self, progress: &TransferProgress) {
        self.progress_subscribers
            .retain(|tx| tx.send(progress.clone()).is_ok());
    }
}

/// Public, read-only view of a session served over HTTP.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    /// Session id.
    pub id: SessionId,
    /// Six-digit code.
    pub code: String,
    /// Sender display name.
    pub sender_name: String,
    /// Manifest.
    pub files: Vec<FileMeta>,
    /// Sum of file sizes.
    pub total_size: u64,
    /// Lifecycle status.
    pub status: SessionStatus,
    /// Direct or relayed.
    pub transfer_mode: TransferMode,
}

/// Why a join was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum JoinError {
    /// No such session.
    #[error("session not found")]
    NotFound,
    /// Another peer already holds the receiver slot.
    #[error("session already has a receiver")]
    ReceiverTaken,
}

/// All active sessions.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: HashMap<SessionId, Session>,
    codes: HashMap<ShortCode, SessionId>,
}

impl SessionRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a waiting session with a fresh id and a unique code.
    pub fn create(&mut self, sender_id: PeerId, sender_name: String, files: Vec<FileMeta>) -> &Session {
        let mut id = SessionId::random();
        while self.sessions.contains_key(&id) {
            id = SessionId::random();
        }
        let mut code = generate_code();
        while self.codes.contains_key(&code) {
            code = generate_code();
        }

        let session = Session {
            id: id.clone(),
            code: code.clone(),
            sender_id,
            sender_name,
            receiver_id: None,
            receiver_name: None,
            total_size: total_size(&files),
            files,
            status: SessionStatus::Waiting,
            transfer_mode: TransferMode::Unknown,
            created_at: Instant::now(),
            chunk_subscribers: Vec::new(),
            progress_subscribers: Vec::new(),
        };
        self.codes.insert(code, id.clone());
        self.sessions.entry(id).or_insert(session)
    }

    /// Look up by id.
    pub fn get(&self, id: &SessionId) -> Option<&Session> {
        self.sessions.get(id)
    }

    /// Look up by id for mutation.
    pub fn get_mut(&mut self, id: &SessionId) -> Option<&mut Session> {
        self.sessions.get_mut(id)
    }

    /// Look up by short code. Surrounding whitespace is ignored.
    pub fn get_by_code(&self, code: &str) -> Option<&Session> {
        let code = ShortCode::parse(code)?;
        self.codes.get(&code).and_then(|id| self.sessions.get(id))
    }

    /// Bind `receiver_id` to the session.
    ///
    /// The first receiver wins. A repeat join by the same peer succeeds
    /// and leaves the session as it was; the flag is true only when this
    /// call bound the receiver.
    pub fn join(
        &mut self,
        id: &SessionId,
        receiver_id: &PeerId,
        receiver_name: &str,
    ) -> Result<(&mut Session, bool), JoinError> {
        let session = self.sessions.get_mut(id).ok_or(JoinError::NotFound)?;
        match session.receiver_id.clone() {
            Some(bound) if &bound == receiver_id => Ok((session, false)),
            Some(_) => Err(JoinError::ReceiverTaken),
            None => {
                session.receiver_id = Some(receiver_id.clone());
                session.receiver_name = Some(receiver_name.to_string());
                session.status = SessionStatus::Connecting;
                Ok((session, true))
            }
        }
    }

    /// Change a session's status. Returns false when the session is absent.
    pub fn set_status(&mut self, id: &SessionId, status: SessionStatus) -> bool {
        match self.sessions.get_mut(id) {
            Some(session) => {
                session.status = status;
                true
            }
            None => false,
        }
    }

    /// Remove a session and its code. Open download streams are ended.
    pub fn remove(&mut self, id: &SessionId) -> Option<Session> {
        let mut session = self.sessions.remove(id)?;
        self.codes.remove(&session.code);
        session.end_chunks();
        Some(session)
    }

    /// Sessions `peer_id` is sending.
    pub fn by_sender(&self, peer_id: &PeerId) -> Vec<SessionId> {
        self.sessions
            .values()
            .filter(|s| &s.sender_id == peer_id)
            .map(|s| s.id.clone())
            .collect()
    }

    /// Sessions `peer_id` is receiving.
    pub fn by_receiver(&self, peer_id: &PeerId) -> Vec<SessionId> {
        self.sessions
            .values()
            .filter(|s| s.receiver_id.as_ref() == Some(peer_id))
            .map(|s| s.id.clone())
            .collect()
    }

    /// Remove every session created more than `max_age` before `now`,
    /// whatever its status. Returns how many were removed.
    pub fn sweep_expired(&mut self, now: Instant, max_age: Duration) -> usize {
        let expired: Vec<SessionId> = self
            .sessions
            .values()
            .filter(|s| now.saturating_duration_since(s.created_at) > max_age)
            .map(|s| s.id.clone())
            .collect();
        for id in &expired {
            self.remove(id);
        }
        expired.len()
    }

    /// Count sessions per status.
    pub fn breakdown(&self) -> SessionBreakdown {
        let mut counts = SessionBreakdown::default();
        for session in self.sessions.values() {
            match session.status {
                SessionStatus::Waiting => counts.waiting += 1,
                SessionStatus::Connecting => counts.connecting += 1,
                SessionStatus::Transferring => counts.transferring += 1,
                SessionStatus::Complete | SessionStatus::Error | SessionStatus::Cancelled => {
                    counts.finished += 1
                }
            }
            if session.transfer_mode == TransferMode::Remote {
                counts.relayed += 1;
            }
            counts.download_streams += session
                .chunk_subscribers
                .iter()
                .filter(|tx| !tx.is_closed())
                .count();
        }
        counts
    }

    /// Number of active sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether no session is active.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn files() -> Vec<FileMeta> {
        vec![
            FileMeta::new("a.txt", 1000, "text/plain"),
            FileMeta::new("b.txt", 2000, "text/plain"),
        ]
    }

    fn alice() -> PeerId {
        PeerId::new("alice")
    }

    #[test]
    fn create_sets_waiting_and_total() {
        let mut registry = SessionRegistry::new();
        let session = registry.create(alice(), "Alice".into(), files());
        assert_eq!(session.total_size, 3000);
        assert_eq!(session.status, SessionStatus::Waiting);
        assert_eq!(session.transfer_mode, TransferMode::Unknown);
        assert_eq!(session.code.as_str().len(), 6);
        let (id, code) = (session.id.clone(), session.code.clone());

        assert_eq!(registry.get_by_code(code.as_str()).unwrap().id, id);
        assert_eq!(
            registry.get_by_code(&format!(" {} ", code)).unwrap().id,
            id
        );
        assert!(registry.get_by_code("12345").is_none());
    }

    #[test]
    fn codes_are_unique_among_active_sessions() {
        let mut registry = SessionRegistry::new();
        let mut codes = HashSet::new();
        for _ in 0..2000 {
            let session = registry.create(alice(), "Alice".into(), files());
            assert!(codes.insert(session.code.clone()));
        }
        assert_eq!(registry.len(), 2000);
    }

    #[test]
    fn first_joiner_wins() {
        let mut registry = SessionRegistry::new();
        let id = registry.create(alice(), "Alice".into(), files()).id.clone();
        let bob = PeerId::new("bob");
        let eve = PeerId::new("eve");

        let (joined, newly_bound) = registry.join(&id, &bob, "Bob").unwrap();
        assert!(newly_bound);
        assert_eq!(joined.status, SessionStatus::Connecting);

        assert_eq!(
            registry.join(&id, &eve, "Eve").unwrap_err(),
            JoinError::ReceiverTaken
        );

        // Repeat join by the bound receiver keeps state intact.
        registry.set_status(&id, SessionStatus::Transferring);
        let (again, newly_bound) = registry.join(&id, &bob, "Someone Else").unwrap();
        assert!(!newly_bound);
        assert_eq!(again.receiver_name.as_deref(), Some("Bob"));
        assert_eq!(again.status, SessionStatus::Transferring);

        assert_eq!(
            registry.join(&SessionId::new("missing"), &bob, "Bob").unwrap_err(),
            JoinError::NotFound
        );
    }

    #[test]
    fn breakdown_counts_by_status() {
        let mut registry = SessionRegistry::new();
        let waiting = registry.create(alice(), "Alice".into(), files()).id.clone();
        let moving = registry.create(alice(), "Alice".into(), files()).id.clone();
        let done = registry.create(alice(), "Alice".into(), files()).id.clone();
        registry.join(&moving, &PeerId::new("bob"), "Bob").unwrap();
        registry.set_status(&done, SessionStatus::Complete);

        let (tx, _rx) = mpsc::unbounded_channel();
        let (closed_tx, closed_rx) = mpsc::unbounded_channel();
        drop(closed_rx);
        let session = registry.get_mut(&moving).unwrap();
        session.status = SessionStatus::Transferring;
        session.transfer_mode = TransferMode::Remote;
        session.chunk_subscribers.push(tx);
        session.chunk_subscribers.push(closed_tx);

        assert_eq!(
            registry.breakdown(),
            SessionBreakdown {
                waiting: 1,
                connecting: 0,
                transferring: 1,
                finished: 1,
                relayed: 1,
                download_streams: 1,
            }
        );
        assert!(registry.get(&waiting).is_some());
    }

    #[test]
    fn remove_clears_code_and_ends_streams() {
        let mut registry = SessionRegistry::new();
        let session = registry.create(alice(), "Alice".into(), files());
        let (id, code) = (session.id.clone(), session.code.clone());
        let (tx, mut rx) = mpsc::unbounded_channel();
        registry.get_mut(&id).unwrap().chunk_subscribers.push(tx);

        assert!(registry.remove(&id).is_some());
        assert!(registry.get(&id).is_none());
        assert!(registry.get_by_code(code.as_str()).is_none());
        assert_eq!(rx.try_recv().unwrap(), StreamItem::End);
        assert!(registry.remove(&id).is_none());
    }

    #[test]
    fn party_lookups() {
        let mut registry = SessionRegistry::new();
        let a = registry.create(alice(), "Alice".into(), files()).id.clone();
        let b = registry.create(PeerId::new("carol"), "Carol".into(), files()).id.clone();
        registry.join(&b, &alice(), "Alice").unwrap();

        assert_eq!(registry.by_sender(&alice()), vec![a.clone()]);
        assert_eq!(registry.by_receiver(&alice()), vec![b.clone()]);

        let session = registry.get(&b).unwrap();
        assert_eq!(session.counterpart(&alice()), Some(&PeerId::new("carol")));
        assert_eq!(session.counterpart(&PeerId::new("carol")), Some(&alice()));
        assert_eq!(session.counterpart(&PeerId::new("zed")), None);
        assert!(registry.get(&a).unwrap().counterpart(&alice()).is_none());
    }

    #[test]
    fn sweep_removes_old_sessions_of_any_status() {
        let mut registry = SessionRegistry::new();
        let session = registry.create(alice(), "Alice".into(), files());
        let (id, code) = (session.id.clone(), session.code.clone());
        registry.set_status(&id, SessionStatus::Transferring);
        let fresh = registry.create(alice(), "Alice".into(), files()).id.clone();
        registry.get_mut(&fresh).unwrap().created_at += Duration::from_secs(3600);

        let max_age = Duration::from_secs(1800);
        assert_eq!(registry.sweep_expired(Instant::now(), max_age), 0);

        let later = Instant::now() + Duration::from_secs(1801);
        assert_eq!(registry.sweep_expired(later, max_age), 1);
        assert!(registry.get(&id).is_none());
        assert!(registry.get_by_code(code.as_str()).is_none());
        assert!(registry.get(&fresh).is_some());
    }

    #[test]
    fn chunk_forwarding_prunes_dropped_streams() {
        let mut registry = SessionRegistry::new();
        let id = registry.create(alice(), "Alice".into(), files()).id.clone();
        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, rx2) = mpsc::unbounded_channel();
        let session = registry.get_mut(&id).unwrap();
        session.chunk_subscribers.push(tx1);
        session.chunk_subscribers.push(tx2);
        drop(rx2);

        assert_eq!(session.push_chunk(b"abc"), 1);
        assert_eq!(rx1.try_recv().unwrap(), StreamItem::Chunk(b"abc".to_vec()));

        session.end_chunks();
        assert_eq!(rx1.try_recv().unwrap(), StreamItem::End);
        assert!(session.chunk_subscribers.is_empty());
    }
}
