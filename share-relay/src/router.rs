//! Routing of inbound messages against the relay state.
//!
//! Every function here runs with the state lock held. Replies and
//! notifications are enqueued on the peers' outbound channels, so nothing
//! here awaits.

use crate::config::Config;
use crate::error::ProtocolResult;
use crate::server::{RelayMetrics, RelayState};
use crate::sessions::JoinError;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use share_core::{sanitize_display_name, LocalityKey};
use share_types::{
    ClientMessage, ErrorCode, FileChunk, FileMeta, IncomingTransfer, PeerId, PeerLeft, PeerNotice,
    ProgressUpdate, ReceiverJoined, SendToPeer, ServerMessage, SessionCreated, SessionId,
    SessionJoined, SessionRef, SessionStatus, Signal, TransferAccepted, TransferErrorNotice,
    TransferErrorReport, TransferMode,
};

const UNKNOWN_NAME: &str = "Unknown";

/// Borrowed relay context for one routing call.
#[derive(Debug)]
pub struct RouteContext<'a> {
    /// Relay configuration.
    pub config: &'a Config,
    /// Relay counters.
    pub metrics: &'a RelayMetrics,
}

/// Work left to do after the state lock is released.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Followup {
    /// Remove the session once the completion grace elapses.
    RemoveAfterGrace(SessionId),
}

/// How a join decides its transfer mode.
#[derive(Debug, Clone, Copy)]
enum JoinKind {
    /// Local when both parties share a locality key.
    ByLocality,
    /// Invites between listed peers are always local.
    Invite,
}

/// Route one decoded message from `from`.
pub fn route(
    state: &mut RelayState,
    ctx: &RouteContext<'_>,
    from: &PeerId,
    message: ClientMessage,
) -> ProtocolResult<Option<Followup>> {
    match message {
        ClientMessage::CreateSession(req) => create_session(state, ctx, from, req.files),
        ClientMessage::JoinByCode(req) => {
            let code = req.code.trim();
            if code.is_empty() {
                reply(state, from, ServerMessage::error(ErrorCode::MissingCode));
                return Ok(None);
            }
            match state.sessions.get_by_code(code).map(|s| s.id.clone()) {
                Some(id) => join(state, ctx, from, &id, JoinKind::ByLocality),
                None => reply(state, from, ServerMessage::error(ErrorCode::InvalidCode)),
            }
        }
        ClientMessage::JoinByLink(req) => {
            if req.session_id.is_empty() {
                reply(state, from, ServerMessage::error(ErrorCode::MissingSessionId));
                return Ok(None);
            }
            join(state, ctx, from, &req.session_id, JoinKind::ByLocality)
        }
        ClientMessage::SendToPeer(req) => send_to_peer(state, ctx, from, req),
        ClientMessage::AcceptTransfer(req) => {
            join(state, ctx, from, &req.session_id, JoinKind::Invite);
        }
        ClientMessage::DeclineTransfer(req) => decline(state, from, &req.session_id),
        ClientMessage::RtcOffer(signal) => {
            forward_signal(state, from, signal, ServerMessage::RtcOffer)
        }
        ClientMessage::RtcAnswer(signal) => {
            forward_signal(state, from, signal, ServerMessage::RtcAnswer)
        }
        ClientMessage::RtcIceCandidate(signal) => {
            forward_signal(state, from, signal, ServerMessage::RtcIceCandidate)
        }
        ClientMessage::ReceiverRtcReady(signal) => {
            forward_signal(state, from, signal, ServerMessage::ReceiverRtcReady)
        }
        ClientMessage::FileChunk(chunk) => file_chunk(state, ctx, from, chunk)?,
        ClientMessage::FileChunkEnd(req) => {
            if let Some(session) = state.sessions.get_mut(&req.session_id) {
                if &session.sender_id == from {
                    session.end_chunks();
                }
            }
        }
        ClientMessage::TransferProgress(update) => progress(state, from, update),
        ClientMessage::TransferComplete(req) => return Ok(complete(state, from, req.session_id)),
        ClientMessage::TransferCancel(req) => cancel(state, from, &req.session_id),
        ClientMessage::TransferError(report) => return Ok(transfer_error(state, from, report)),
        ClientMessage::UpdateIdentity(req) => update_identity(state, ctx, from, &req.name),
    }
    Ok(None)
}

fn reply(state: &RelayState, to: &PeerId, message: ServerMessage) {
    state.peers.send_to(to, message);
}

fn peer_name(state: &RelayState, id: &PeerId) -> String {
    state
        .peers
        .get(id)
        .map(|p| p.name.clone())
        .unwrap_or_else(|| UNKNOWN_NAME.to_string())
}

fn peer_locality(state: &RelayState, id: &PeerId) -> Option<LocalityKey> {
    state.peers.get(id).map(|p| p.locality.clone())
}

// ===========================================
// Sessions
// ===========================================

fn create_session(
    state: &mut RelayState,
    ctx: &RouteContext<'_>,
    from: &PeerId,
    files: Vec<FileMeta>,
) {
    if files.is_empty() {
        reply(state, from, ServerMessage::error(ErrorCode::NoFiles));
        return;
    }
    let name = peer_name(state, from);
    let session = state.sessions.create(from.clone(), name, files);
    RelayMetrics::add(&ctx.metrics.sessions_created, 1);
    tracing::info!(session = %session.id, sender = %from, files = session.files.len(), "Session created");

    let created = ServerMessage::SessionCreated(SessionCreated {
        session_id: session.id.clone(),
        code: session.code.to_string(),
        share_link: Some(ctx.config.server.share_link(session.id.as_str())),
        target_peer_id: None,
    });
    state.peers.send_to(from, created);
}

fn join(
    state: &mut RelayState,
    ctx: &RouteContext<'_>,
    from: &PeerId,
    session_id: &SessionId,
    kind: JoinKind,
) {
    let Some(session) = state.sessions.get(session_id) else {
        reply(state, from, ServerMessage::error(ErrorCode::SessionNotFound));
        return;
    };
    if session.status.is_terminal() {
        reply(state, from, ServerMessage::error(ErrorCode::JoinRejected));
        return;
    }

    let mode = match kind {
        JoinKind::Invite => TransferMode::Local,
        JoinKind::ByLocality => {
            let sender = peer_locality(state, &session.sender_id);
            let receiver = peer_locality(state, from);
            match (sender, receiver) {
                (Some(a), Some(b)) if a == b => TransferMode::Local,
                _ => TransferMode::Remote,
            }
        }
    };
    let receiver_name = peer_name(state, from);

    let session = match state.sessions.join(session_id, from, &receiver_name) {
        Ok((session, true)) => {
            session.transfer_mode = mode;
            RelayMetrics::add(&ctx.metrics.joins_total, 1);
            tracing::info!(session = %session_id, receiver = %from, mode = ?mode, "Receiver joined");
            session
        }
        // Same receiver again: repeat the notices, keep the decided mode.
        Ok((session, false)) => {
            tracing::debug!(session = %session_id, receiver = %from, "Repeat join");
            session
        }
        Err(JoinError::NotFound) => {
            reply(state, from, ServerMessage::error(ErrorCode::SessionNotFound));
            return;
        }
        Err(JoinError::ReceiverTaken) => {
            tracing::debug!(session = %session_id, peer = %from, "Join rejected, receiver already bound");
            reply(state, from, ServerMessage::error(ErrorCode::JoinRejected));
            return;
        }
    };
    let mode = session.transfer_mode;
    let receiver_name = session
        .receiver_name
        .clone()
        .unwrap_or_else(|| UNKNOWN_NAME.to_string());
    let sender_id = session.sender_id.clone();

    match kind {
        JoinKind::Invite => {
            state.peers.send_to(
                &sender_id,
                ServerMessage::TransferAccepted(TransferAccepted {
                    session_id: session_id.clone(),
                    receiver_id: from.clone(),
                    receiver_name,
                }),
            );
        }
        JoinKind::ByLocality => {
            let joined = ServerMessage::SessionJoined(SessionJoined {
                session_id: session_id.clone(),
                sender_id: sender_id.clone(),
                sender_name: session.sender_name.clone(),
                files: session.files.clone(),
                total_size: session.total_size,
                transfer_mode: mode,
            });
            state.peers.send_to(from, joined);
            state.peers.send_to(
                &sender_id,
                ServerMessage::ReceiverJoined(ReceiverJoined {
                    session_id: session_id.clone(),
                    receiver_id: from.clone(),
                    receiver_name,
                    transfer_mode: mode,
                }),
            );
        }
    }
}

fn send_to_peer(state: &mut RelayState, ctx: &RouteContext<'_>, from: &PeerId, req: SendToPeer) {
    if req.files.is_empty() {
        reply(state, from, ServerMessage::error(ErrorCode::NoFiles));
        return;
    }
    if &req.target_peer_id == from || state.peers.get(&req.target_peer_id).is_none() {
        reply(state, from, ServerMessage::error(ErrorCode::PeerNotFound));
        return;
    }

    let name = peer_name(state, from);
    let session = state.sessions.create(from.clone(), name, req.files);
    RelayMetrics::add(&ctx.metrics.sessions_created, 1);
    let session_id = session.id.clone();
    let code = session.code.to_string();
    let invite = ServerMessage::IncomingTransfer(IncomingTransfer {
        session_id: session_id.clone(),
        sender_id: from.clone(),
        sender_name: session.sender_name.clone(),
        files: session.files.clone(),
        total_size: session.total_size,
    });
    if let Some(session) = state.sessions.get_mut(&session_id) {
        session.transfer_mode = TransferMode::Local;
    }
    tracing::info!(session = %session_id, sender = %from, target = %req.target_peer_id, "Direct invite");

    state.peers.send_to(&req.target_peer_id, invite);
    state.peers.send_to(
        from,
        ServerMessage::SessionCreated(SessionCreated {
            session_id,
            code,
            share_link: None,
            target_peer_id: Some(req.target_peer_id),
        }),
    );
}

fn decline(state: &mut RelayState, from: &PeerId, session_id: &SessionId) {
    let Some(session) = state.sessions.get(session_id) else {
        return;
    };
    if &session.sender_id == from || session.status.is_terminal() {
        return;
    }
    let sender_id = session.sender_id.clone();
    state.sessions.remove(session_id);
    tracing::info!(session = %session_id, peer = %from, "Transfer declined");
    state.peers.send_to(
        &sender_id,
        ServerMessage::TransferDeclined(SessionRef::new(session_id.clone())),
    );
}

// ===========================================
// Negotiation
// ===========================================

fn forward_signal(
    state: &RelayState,
    from: &PeerId,
    signal: Signal,
    wrap: fn(share_types::RelayedSignal) -> ServerMessage,
) {
    let target = signal.target_id.clone();
    if !state.peers.send_to(&target, wrap(signal.relayed_from(from.clone()))) {
        tracing::debug!(from = %from, target = %target, "Dropped signal for unknown peer");
    }
}

// ===========================================
// Transfer
// ===========================================

fn file_chunk(
    state: &mut RelayState,
    ctx: &RouteContext<'_>,
    from: &PeerId,
    chunk: FileChunk,
) -> ProtocolResult<()> {
    let Some(session) = state.sessions.get_mut(&chunk.session_id) else {
        return Ok(());
    };
    if &session.sender_id != from || session.status.is_terminal() {
        return Ok(());
    }
    let bytes = STANDARD.decode(chunk.data.as_bytes())?;
    if session.status == SessionStatus::Connecting {
        session.status = SessionStatus::Transferring;
    }
    session.push_chunk(&bytes);
    RelayMetrics::add(&ctx.metrics.chunks_relayed, 1);
    RelayMetrics::add(&ctx.metrics.bytes_relayed, bytes.len() as u64);
    Ok(())
}

fn progress(state: &mut RelayState, from: &PeerId, update: ProgressUpdate) {
    let Some(session) = state.sessions.get_mut(&update.session_id) else {
        return;
    };
    if !session.is_party(from) || session.status.is_terminal() {
        return;
    }
    if matches!(session.status, SessionStatus::Waiting | SessionStatus::Connecting) {
        session.status = SessionStatus::Transferring;
    }
    session.push_progress(&update.progress);
    if let Some(other) = session.counterpart(from).cloned() {
        state
            .peers
            .send_to(&other, ServerMessage::TransferProgress(update));
    }
}

fn complete(state: &mut RelayState, from: &PeerId, session_id: SessionId) -> Option<Followup> {
    let session = state.sessions.get_mut(&session_id)?;
    if !session.is_party(from) || session.status.is_terminal() {
        return None;
    }
    session.status = SessionStatus::Complete;
    session.end_chunks();
    let parties: Vec<PeerId> = std::iter::once(session.sender_id.clone())
        .chain(session.receiver_id.clone())
        .collect();
    tracing::info!(session = %session_id, "Transfer complete");

    let done = ServerMessage::TransferComplete(SessionRef::new(session_id.clone()));
    for party in &parties {
        state.peers.send_to(party, done.clone());
    }
    Some(Followup::RemoveAfterGrace(session_id))
}

fn cancel(state: &mut RelayState, from: &PeerId, session_id: &SessionId) {
    let Some(session) = state.sessions.get(session_id) else {
        return;
    };
    if !session.is_party(from) || session.status.is_terminal() {
        return;
    }
    let other = session.counterpart(from).cloned();
    state.sessions.remove(session_id);
    tracing::info!(session = %session_id, peer = %from, "Transfer cancelled");
    if let Some(other) = other {
        state.peers.send_to(
            &other,
            ServerMessage::TransferCancelled(SessionRef::new(session_id.clone())),
        );
    }
}

fn transfer_error(
    state: &mut RelayState,
    from: &PeerId,
    report: TransferErrorReport,
) -> Option<Followup> {
    tracing::warn!(from = %from, target = %report.target_id, reason = %report.reason, "Transfer error reported");
    let notice = ServerMessage::TransferError(TransferErrorNotice {
        session_id: report.session_id.clone(),
        reason: report.reason,
        from_id: from.clone(),
    });
    state.peers.send_to(&report.target_id, notice);

    let session_id = report.session_id?;
    let session = state.sessions.get_mut(&session_id)?;
    if !session.is_party(from) || session.status.is_terminal() {
        return None;
    }
    session.status = SessionStatus::Error;
    session.end_chunks();
    Some(Followup::RemoveAfterGrace(session_id))
}

// ===========================================
// Identity
// ===========================================

fn update_identity(state: &mut RelayState, ctx: &RouteContext<'_>, from: &PeerId, name: &str) {
    let Some(name) = sanitize_display_name(name, ctx.config.limits.max_display_name_len) else {
        return;
    };
    let Some(peer) = state.peers.get_mut(from) else {
        return;
    };
    if peer.name == name {
        return;
    }
    tracing::debug!(peer = %from, old = %peer.name, new = %name, "Identity updated");
    peer.name = name;
    let locality = peer.locality.clone();
    let notice = ServerMessage::PeerUpdated(PeerNotice {
        peer: peer.summary(),
    });
    state.peers.broadcast_locality(&locality, from, &notice);
}

// ===========================================
// Disconnect
// ===========================================

/// Forget a peer and settle every session it was part of.
///
/// Sessions the peer was sending go away silently until bytes start
/// flowing. A transfer in flight, or a receiver leaving a joined session,
/// gives the other side a `transfer-error`. Each session is removed at
/// most once.
pub fn disconnect(state: &mut RelayState, peer_id: &PeerId) {
    let Some(peer) = state.peers.remove(peer_id) else {
        return;
    };
    tracing::info!(
        peer = %peer_id,
        name = %peer.name,
        connected_secs = peer.connected_at.elapsed().as_secs(),
        "Peer disconnected"
    );
    state.peers.broadcast_locality(
        &peer.locality,
        peer_id,
        &ServerMessage::PeerLeft(PeerLeft {
            peer_id: peer_id.clone(),
        }),
    );

    for session_id in state.sessions.by_sender(peer_id) {
        let Some(status) = state.sessions.get(&session_id).map(|s| s.status) else {
            continue;
        };
        if status.is_terminal() {
            continue;
        }
        let Some(session) = state.sessions.remove(&session_id) else {
            continue;
        };
        if status == SessionStatus::Transferring {
            if let Some(receiver) = session.receiver_id {
                notify_abandoned(state, &receiver, &session_id, peer_id, "Sender disconnected");
            }
        }
    }

    for session_id in state.sessions.by_receiver(peer_id) {
        let active = state
            .sessions
            .get(&session_id)
            .is_some_and(|s| matches!(s.status, SessionStatus::Connecting | SessionStatus::Transferring));
        if !active {
            continue;
        }
        if let Some(session) = state.sessions.remove(&session_id) {
            notify_abandoned(state, &session.sender_id, &session_id, peer_id, "Receiver disconnected");
        }
    }
}

fn notify_abandoned(
    state: &RelayState,
    to: &PeerId,
    session_id: &SessionId,
    gone: &PeerId,
    reason: &str,
) {
    if to == gone {
        return;
    }
    state.peers.send_to(
        to,
        ServerMessage::TransferError(TransferErrorNotice {
            session_id: Some(session_id.clone()),
            reason: reason.to_string(),
            from_id: gone.clone(),
        }),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peers::Peer;
    use crate::sessions::StreamItem;
    use share_types::{CreateSession, JoinByCode, TransferProgress, UpdateIdentity};
    use tokio::sync::mpsc;

    type Inbox = mpsc::UnboundedReceiver<ServerMessage>;

    struct Harness {
        state: RelayState,
        config: Config,
        metrics: RelayMetrics,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                state: RelayState::default(),
                config: Config::default(),
                metrics: RelayMetrics::default(),
            }
        }

        fn peer(&mut self, id: &str, ip: &str) -> (PeerId, Inbox) {
            let (tx, rx) = mpsc::unbounded_channel();
            let id = PeerId::new(id);
            let name = format!("{} peer", id);
            self.state
                .peers
                .add(Peer::new(id.clone(), name, ip.parse().unwrap(), tx));
            (id, rx)
        }

        fn send(&mut self, from: &PeerId, message: ClientMessage) -> ProtocolResult<Option<Followup>> {
            let ctx = RouteContext {
                config: &self.config,
                metrics: &self.metrics,
            };
            route(&mut self.state, &ctx, from, message)
        }

        fn create(&mut self, sender: &PeerId, inbox: &mut Inbox) -> (SessionId, String) {
            self.send(
                sender,
                ClientMessage::CreateSession(CreateSession { files: files() }),
            )
            .unwrap();
            match drain(inbox).pop() {
                Some(ServerMessage::SessionCreated(c)) => (c.session_id, c.code),
                other => panic!("expected session-created, got {other:?}"),
            }
        }

        fn join_code(&mut self, receiver: &PeerId, code: &str) {
            self.send(
                receiver,
                ClientMessage::JoinByCode(JoinByCode { code: code.into() }),
            )
            .unwrap();
        }

        fn status(&self, id: &SessionId) -> Option<SessionStatus> {
            self.state.sessions.get(id).map(|s| s.status)
        }
    }

    fn files() -> Vec<FileMeta> {
        vec![FileMeta::new("photo.jpg", 2048, "image/jpeg")]
    }

    fn drain(inbox: &mut Inbox) -> Vec<ServerMessage> {
        let mut out = Vec::new();
        while let Ok(message) = inbox.try_recv() {
            out.push(message);
        }
        out
    }

    fn error_codes(inbox: &mut Inbox) -> Vec<ErrorCode> {
        drain(inbox)
            .into_iter()
            .filter_map(|m| match m {
                ServerMessage::Error(e) => e.error_code,
                _ => None,
            })
            .collect()
    }

    fn progress_msg(id: &SessionId, bytes: u64) -> ClientMessage {
        ClientMessage::TransferProgress(ProgressUpdate {
            session_id: id.clone(),
            progress: TransferProgress {
                bytes_transferred: bytes,
                total_bytes: 2048,
                ..TransferProgress::default()
            },
        })
    }

    // ===========================================
    // Session creation and joining
    // ===========================================

    #[test]
    fn create_replies_with_code_and_link() {
        let mut h = Harness::new();
        let (alice, mut inbox) = h.peer("alice", "192.168.1.10");
        let (id, code) = h.create(&alice, &mut inbox);

        assert_eq!(code.len(), 6);
        let session = h.state.sessions.get(&id).unwrap();
        assert_eq!(session.status, SessionStatus::Waiting);
        assert_eq!(session.sender_name, "alice peer");
        assert_eq!(RelayMetrics::get(&h.metrics.sessions_created), 1);
    }

    #[test]
    fn create_without_files_is_rejected() {
        let mut h = Harness::new();
        let (alice, mut inbox) = h.peer("alice", "192.168.1.10");
        h.send(&alice, ClientMessage::CreateSession(CreateSession { files: vec![] }))
            .unwrap();
        assert_eq!(error_codes(&mut inbox), vec![ErrorCode::NoFiles]);
        assert!(h.state.sessions.is_empty());
    }

    #[test]
    fn join_on_same_segment_is_local() {
        let mut h = Harness::new();
        let (alice, mut a_in) = h.peer("alice", "192.168.1.10");
        let (bob, mut b_in) = h.peer("bob", "192.168.1.20");
        let (id, code) = h.create(&alice, &mut a_in);

        h.join_code(&bob, &format!(" {code} "));

        match drain(&mut b_in).as_slice() {
            [ServerMessage::SessionJoined(j)] => {
                assert_eq!(j.session_id, id);
                assert_eq!(j.sender_id, alice);
                assert_eq!(j.total_size, 2048);
                assert_eq!(j.transfer_mode, TransferMode::Local);
            }
            other => panic!("unexpected {other:?}"),
        }
        match drain(&mut a_in).as_slice() {
            [ServerMessage::ReceiverJoined(j)] => {
                assert_eq!(j.receiver_id, bob);
                assert_eq!(j.receiver_name, "bob peer");
                assert_eq!(j.transfer_mode, TransferMode::Local);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(h.status(&id), Some(SessionStatus::Connecting));
    }

    #[test]
    fn join_across_segments_is_remote() {
        let mut h = Harness::new();
        let (alice, mut a_in) = h.peer("alice", "192.168.1.10");
        let (bob, mut b_in) = h.peer("bob", "203.0.113.9");
        let (id, _) = h.create(&alice, &mut a_in);

        h.send(&bob, ClientMessage::JoinByLink(SessionRef::new(id.clone())))
            .unwrap();
        assert!(matches!(
            drain(&mut b_in).as_slice(),
            [ServerMessage::SessionJoined(j)] if j.transfer_mode == TransferMode::Remote
        ));
        assert_eq!(
            h.state.sessions.get(&id).unwrap().transfer_mode,
            TransferMode::Remote
        );
    }

    #[test]
    fn join_lookup_failures() {
        let mut h = Harness::new();
        let (bob, mut inbox) = h.peer("bob", "10.0.0.2");

        h.join_code(&bob, "   ");
        h.join_code(&bob, "000000");
        h.send(&bob, ClientMessage::JoinByLink(SessionRef::new(SessionId::new(""))))
            .unwrap();
        h.send(&bob, ClientMessage::JoinByLink(SessionRef::new(SessionId::new("nope"))))
            .unwrap();

        assert_eq!(
            error_codes(&mut inbox),
            vec![
                ErrorCode::MissingCode,
                ErrorCode::InvalidCode,
                ErrorCode::MissingSessionId,
                ErrorCode::SessionNotFound,
            ]
        );
    }

    #[test]
    fn second_receiver_is_rejected() {
        let mut h = Harness::new();
        let (alice, mut a_in) = h.peer("alice", "10.0.0.1");
        let (bob, mut b_in) = h.peer("bob", "10.0.0.2");
        let (eve, mut e_in) = h.peer("eve", "10.0.0.3");
        let (id, code) = h.create(&alice, &mut a_in);

        h.join_code(&bob, &code);
        h.join_code(&eve, &code);

        assert_eq!(error_codes(&mut e_in), vec![ErrorCode::JoinRejected]);
        assert_eq!(
            h.state.sessions.get(&id).unwrap().receiver_id.as_ref(),
            Some(&bob)
        );
        drain(&mut b_in);

        // The bound receiver may repeat its join; nothing is re-decided.
        h.join_code(&bob, &code);
        assert!(matches!(
            drain(&mut b_in).as_slice(),
            [ServerMessage::SessionJoined(j)] if j.transfer_mode == TransferMode::Local
        ));
        assert_eq!(
            h.state.sessions.get(&id).unwrap().transfer_mode,
            TransferMode::Local
        );
        assert_eq!(RelayMetrics::get(&h.metrics.joins_total), 1);
    }

    // ===========================================
    // Direct invites
    // ===========================================

    #[test]
    fn invite_accept_flow() {
        let mut h = Harness::new();
        let (alice, mut a_in) = h.peer("alice", "10.0.0.1");
        let (bob, mut b_in) = h.peer("bob", "172.16.5.5");

        h.send(
            &alice,
            ClientMessage::SendToPeer(SendToPeer {
                target_peer_id: bob.clone(),
                files: files(),
            }),
        )
        .unwrap();

        let id = match drain(&mut b_in).as_slice() {
            [ServerMessage::IncomingTransfer(inv)] => {
                assert_eq!(inv.sender_id, alice);
                assert_eq!(inv.total_size, 2048);
                inv.session_id.clone()
            }
            other => panic!("unexpected {other:?}"),
        };
        assert!(matches!(
            drain(&mut a_in).as_slice(),
            [ServerMessage::SessionCreated(c)]
                if c.session_id == id && c.share_link.is_none() && c.target_peer_id.as_ref() == Some(&bob)
        ));

        h.send(&bob, ClientMessage::AcceptTransfer(SessionRef::new(id.clone())))
            .unwrap();
        assert!(matches!(
            drain(&mut a_in).as_slice(),
            [ServerMessage::TransferAccepted(t)] if t.receiver_id == bob
        ));
        let session = h.state.sessions.get(&id).unwrap();
        assert_eq!(session.transfer_mode, TransferMode::Local);
        assert_eq!(session.status, SessionStatus::Connecting);
    }

    #[test]
    fn accepted_invite_keeps_local_mode_on_link_join() {
        let mut h = Harness::new();
        let (alice, mut a_in) = h.peer("alice", "10.0.0.1");
        let (bob, mut b_in) = h.peer("bob", "172.16.5.5");
        h.send(
            &alice,
            ClientMessage::SendToPeer(SendToPeer {
                target_peer_id: bob.clone(),
                files: files(),
            }),
        )
        .unwrap();
        drain(&mut a_in);
        let id = match drain(&mut b_in).as_slice() {
            [ServerMessage::IncomingTransfer(inv)] => inv.session_id.clone(),
            other => panic!("unexpected {other:?}"),
        };
        h.send(&bob, ClientMessage::AcceptTransfer(SessionRef::new(id.clone())))
            .unwrap();
        drain(&mut a_in);

        // Same receiver opens the share link from a different segment.
        h.send(&bob, ClientMessage::JoinByLink(SessionRef::new(id.clone())))
            .unwrap();

        assert!(matches!(
            drain(&mut b_in).as_slice(),
            [ServerMessage::SessionJoined(j)] if j.transfer_mode == TransferMode::Local
        ));
        assert!(matches!(
            drain(&mut a_in).as_slice(),
            [ServerMessage::ReceiverJoined(j)] if j.transfer_mode == TransferMode::Local
        ));
        let session = h.state.sessions.get(&id).unwrap();
        assert_eq!(session.transfer_mode, TransferMode::Local);
        assert_eq!(session.status, SessionStatus::Connecting);
        assert_eq!(RelayMetrics::get(&h.metrics.joins_total), 1);
    }

    #[test]
    fn invite_to_unknown_peer_fails() {
        let mut h = Harness::new();
        let (alice, mut inbox) = h.peer("alice", "10.0.0.1");
        h.send(
            &alice,
            ClientMessage::SendToPeer(SendToPeer {
                target_peer_id: PeerId::new("ghost"),
                files: files(),
            }),
        )
        .unwrap();
        h.send(
            &alice,
            ClientMessage::SendToPeer(SendToPeer {
                target_peer_id: alice.clone(),
                files: files(),
            }),
        )
        .unwrap();
        assert_eq!(
            error_codes(&mut inbox),
            vec![ErrorCode::PeerNotFound, ErrorCode::PeerNotFound]
        );
        assert!(h.state.sessions.is_empty());
    }

    #[test]
    fn decline_notifies_sender_and_removes() {
        let mut h = Harness::new();
        let (alice, mut a_in) = h.peer("alice", "10.0.0.1");
        let (bob, mut b_in) = h.peer("bob", "10.0.0.2");
        h.send(
            &alice,
            ClientMessage::SendToPeer(SendToPeer {
                target_peer_id: bob.clone(),
                files: files(),
            }),
        )
        .unwrap();
        drain(&mut b_in);
        let id = h.state.sessions.by_sender(&alice)[0].clone();
        drain(&mut a_in);

        h.send(&bob, ClientMessage::DeclineTransfer(SessionRef::new(id.clone())))
            .unwrap();
        assert_eq!(
            drain(&mut a_in),
            vec![ServerMessage::TransferDeclined(SessionRef::new(id.clone()))]
        );
        assert!(h.state.sessions.get(&id).is_none());
    }

    // ===========================================
    // Signaling
    // ===========================================

    #[test]
    fn signals_are_stamped_with_sender() {
        let mut h = Harness::new();
        let (alice, _a_in) = h.peer("alice", "10.0.0.1");
        let (bob, mut b_in) = h.peer("bob", "10.0.0.2");

        h.send(
            &alice,
            ClientMessage::RtcOffer(Signal {
                target_id: bob.clone(),
                session_id: Some(SessionId::new("s1")),
                sdp: Some(serde_json::json!({"type": "offer", "sdp": "v=0"})),
                candidate: None,
            }),
        )
        .unwrap();
        match drain(&mut b_in).as_slice() {
            [ServerMessage::RtcOffer(s)] => {
                assert_eq!(s.from_id, alice);
                assert_eq!(s.session_id, Some(SessionId::new("s1")));
                assert!(s.sdp.is_some());
            }
            other => panic!("unexpected {other:?}"),
        }

        // Unknown target: dropped without an error.
        h.send(
            &alice,
            ClientMessage::RtcIceCandidate(Signal {
                target_id: PeerId::new("ghost"),
                session_id: None,
                sdp: None,
                candidate: Some(serde_json::json!({"candidate": "c"})),
            }),
        )
        .unwrap();
    }

    // ===========================================
    // Transfer lifecycle
    // ===========================================

    fn joined(h: &mut Harness) -> (PeerId, Inbox, PeerId, Inbox, SessionId) {
        let (alice, mut a_in) = h.peer("alice", "10.0.0.1");
        let (bob, mut b_in) = h.peer("bob", "10.0.0.2");
        let (id, code) = h.create(&alice, &mut a_in);
        h.join_code(&bob, &code);
        drain(&mut a_in);
        drain(&mut b_in);
        (alice, a_in, bob, b_in, id)
    }

    #[test]
    fn progress_forwards_and_starts_transferring() {
        let mut h = Harness::new();
        let (alice, _a_in, _bob, mut b_in, id) = joined(&mut h);
        let (tx, mut rx) = mpsc::unbounded_channel();
        h.state.sessions.get_mut(&id).unwrap().progress_subscribers.push(tx);

        h.send(&alice, progress_msg(&id, 1024)).unwrap();

        assert_eq!(h.status(&id), Some(SessionStatus::Transferring));
        assert!(matches!(
            drain(&mut b_in).as_slice(),
            [ServerMessage::TransferProgress(p)] if p.progress.bytes_transferred == 1024
        ));
        assert_eq!(rx.try_recv().unwrap().bytes_transferred, 1024);
    }

    #[test]
    fn complete_notifies_both_and_defers_removal() {
        let mut h = Harness::new();
        let (alice, mut a_in, bob, mut b_in, id) = joined(&mut h);

        let followup = h
            .send(&bob, ClientMessage::TransferComplete(SessionRef::new(id.clone())))
            .unwrap();
        assert_eq!(followup, Some(Followup::RemoveAfterGrace(id.clone())));
        assert_eq!(h.status(&id), Some(SessionStatus::Complete));

        let done = ServerMessage::TransferComplete(SessionRef::new(id.clone()));
        assert_eq!(drain(&mut a_in), vec![done.clone()]);
        assert_eq!(drain(&mut b_in), vec![done]);

        // Terminal sessions ignore further traffic.
        assert_eq!(
            h.send(&alice, ClientMessage::TransferComplete(SessionRef::new(id.clone())))
                .unwrap(),
            None
        );
        h.send(&alice, progress_msg(&id, 1)).unwrap();
        h.send(&alice, ClientMessage::TransferCancel(SessionRef::new(id.clone())))
            .unwrap();
        assert_eq!(h.status(&id), Some(SessionStatus::Complete));
        assert!(drain(&mut b_in).is_empty());
    }

    #[test]
    fn cancel_notifies_counterpart_and_removes() {
        let mut h = Harness::new();
        let (alice, mut a_in, bob, _b_in, id) = joined(&mut h);

        h.send(&bob, ClientMessage::TransferCancel(SessionRef::new(id.clone())))
            .unwrap();
        assert_eq!(
            drain(&mut a_in),
            vec![ServerMessage::TransferCancelled(SessionRef::new(id.clone()))]
        );
        assert!(h.state.sessions.get(&id).is_none());

        // Strangers cannot cancel.
        let (id2, _) = h.create(&alice, &mut a_in);
        let (eve, _e_in) = h.peer("eve", "10.0.0.9");
        h.send(&eve, ClientMessage::TransferCancel(SessionRef::new(id2.clone())))
            .unwrap();
        assert!(h.state.sessions.get(&id2).is_some());
    }

    #[test]
    fn transfer_error_forwards_and_marks_session() {
        let mut h = Harness::new();
        let (alice, _a_in, bob, mut b_in, id) = joined(&mut h);

        let followup = h
            .send(
                &alice,
                ClientMessage::TransferError(TransferErrorReport {
                    target_id: bob.clone(),
                    session_id: Some(id.clone()),
                    reason: "disk full".into(),
                }),
            )
            .unwrap();
        assert_eq!(followup, Some(Followup::RemoveAfterGrace(id.clone())));
        assert_eq!(h.status(&id), Some(SessionStatus::Error));
        match drain(&mut b_in).as_slice() {
            [ServerMessage::TransferError(e)] => {
                assert_eq!(e.reason, "disk full");
                assert_eq!(e.from_id, alice);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn chunks_flow_to_download_streams() {
        let mut h = Harness::new();
        let (alice, _a_in, bob, _b_in, id) = joined(&mut h);
        let (tx, mut rx) = mpsc::unbounded_channel();
        h.state.sessions.get_mut(&id).unwrap().chunk_subscribers.push(tx);

        h.send(
            &alice,
            ClientMessage::FileChunk(FileChunk {
                session_id: id.clone(),
                data: "aGVsbG8=".into(),
            }),
        )
        .unwrap();
        // Only the sender may push bytes.
        h.send(
            &bob,
            ClientMessage::FileChunk(FileChunk {
                session_id: id.clone(),
                data: "eA==".into(),
            }),
        )
        .unwrap();
        h.send(&alice, ClientMessage::FileChunkEnd(SessionRef::new(id.clone())))
            .unwrap();

        assert_eq!(rx.try_recv().unwrap(), StreamItem::Chunk(b"hello".to_vec()));
        assert_eq!(rx.try_recv().unwrap(), StreamItem::End);
        assert_eq!(h.status(&id), Some(SessionStatus::Transferring));
        assert_eq!(RelayMetrics::get(&h.metrics.bytes_relayed), 5);
    }

    #[test]
    fn bad_chunk_encoding_is_an_error() {
        let mut h = Harness::new();
        let (alice, _a_in, _bob, _b_in, id) = joined(&mut h);
        let err = h
            .send(
                &alice,
                ClientMessage::FileChunk(FileChunk {
                    session_id: id,
                    data: "!!not base64!!".into(),
                }),
            )
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidMessage);
    }

    // ===========================================
    // Identity
    // ===========================================

    #[test]
    fn identity_update_broadcasts_on_change() {
        let mut h = Harness::new();
        let (alice, _a_in) = h.peer("alice", "10.0.0.1");
        let (_bob, mut b_in) = h.peer("bob", "10.0.0.2");
        let (_far, mut far_in) = h.peer("far", "10.9.9.9");

        let rename = |name: &str| {
            ClientMessage::UpdateIdentity(UpdateIdentity { name: name.into() })
        };
        h.send(&alice, rename("  Alice's Laptop  ")).unwrap();
        h.send(&alice, rename("Alice's Laptop")).unwrap();
        h.send(&alice, rename("   ")).unwrap();

        match drain(&mut b_in).as_slice() {
            [ServerMessage::PeerUpdated(n)] => {
                assert_eq!(n.peer.id, alice);
                assert_eq!(n.peer.name, "Alice's Laptop");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(drain(&mut far_in).is_empty());
    }

    // ===========================================
    // Disconnect
    // ===========================================

    #[test]
    fn sender_disconnect_while_waiting_removes_silently() {
        let mut h = Harness::new();
        let (alice, mut a_in) = h.peer("alice", "10.0.0.1");
        let (_bob, mut b_in) = h.peer("bob", "10.0.0.2");
        let (id, code) = h.create(&alice, &mut a_in);

        disconnect(&mut h.state, &alice);

        assert!(h.state.sessions.get(&id).is_none());
        assert!(h.state.sessions.get_by_code(&code).is_none());
        assert_eq!(
            drain(&mut b_in),
            vec![ServerMessage::PeerLeft(PeerLeft { peer_id: alice })]
        );
    }

    #[test]
    fn sender_disconnect_before_bytes_flow_is_silent() {
        let mut h = Harness::new();
        let (alice, _a_in, _bob, mut b_in, id) = joined(&mut h);

        disconnect(&mut h.state, &alice);

        assert!(h.state.sessions.get(&id).is_none());
        assert!(drain(&mut b_in)
            .iter()
            .all(|m| matches!(m, ServerMessage::PeerLeft(_))));
    }

    #[test]
    fn sender_disconnect_mid_transfer_errors_receiver_once() {
        let mut h = Harness::new();
        let (alice, _a_in, _bob, mut b_in, id) = joined(&mut h);
        h.send(&alice, progress_msg(&id, 10)).unwrap();
        drain(&mut b_in);

        disconnect(&mut h.state, &alice);
        disconnect(&mut h.state, &alice);

        let errors: Vec<_> = drain(&mut b_in)
            .into_iter()
            .filter_map(|m| match m {
                ServerMessage::TransferError(e) => Some(e),
                _ => None,
            })
            .collect();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].reason, "Sender disconnected");
        assert_eq!(errors[0].session_id, Some(id.clone()));
        assert!(h.state.sessions.get(&id).is_none());
    }

    #[test]
    fn receiver_disconnect_errors_sender() {
        let mut h = Harness::new();
        let (_alice, mut a_in, bob, _b_in, id) = joined(&mut h);

        disconnect(&mut h.state, &bob);

        let to_sender = drain(&mut a_in);
        assert!(to_sender.iter().any(|m| matches!(
            m,
            ServerMessage::TransferError(e) if e.reason == "Receiver disconnected" && e.from_id == bob
        )));
        assert!(h.state.sessions.get(&id).is_none());
    }

    #[test]
    fn completed_sessions_survive_disconnect_until_grace() {
        let mut h = Harness::new();
        let (alice, _a_in, bob, _b_in, id) = joined(&mut h);
        h.send(&bob, ClientMessage::TransferComplete(SessionRef::new(id.clone())))
            .unwrap();

        disconnect(&mut h.state, &alice);
        disconnect(&mut h.state, &bob);
        assert_eq!(h.status(&id), Some(SessionStatus::Complete));
    }

    #[test]
    fn self_join_disconnect_removes_once() {
        let mut h = Harness::new();
        let (alice, mut a_in) = h.peer("alice", "10.0.0.1");
        let (id, code) = h.create(&alice, &mut a_in);
        h.join_code(&alice, &code);

        disconnect(&mut h.state, &alice);
        assert!(h.state.sessions.get(&id).is_none());
        assert!(h.state.sessions.is_empty());
    }
}
