//! Transfer state machine for PeerShare.
//!
//! One reducer consumes every input a client sees: user intents, relay
//! messages and events from the local transport. It updates the
//! [`TransferView`] and returns the [`Action`]s the caller must execute.
//! No I/O happens here.
//!
//! The machine also owns the single-link guard. While a [`LinkLock`] is held,
//! every attempt to start another link is a silent no-op, and local events
//! tagged with any other session are dropped as stale.

use peershare_types::{
    ClientMessage, CreateSession, FailureCode, FileMeta, IncomingTransfer, JoinByCode, PeerId,
    SendToPeer, ServerMessage, SessionId, SessionRef, Signal, TransferErrorReport, TransferMode,
    TransferProgress,
};

/// Client-side transfer phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Phase {
    /// Nothing in flight.
    #[default]
    Idle,
    /// Session created, waiting for a receiver.
    Waiting,
    /// Counterpart known, link being set up.
    Connecting,
    /// Bytes are flowing.
    Transferring,
    /// All files delivered.
    Complete,
    /// Transfer failed.
    Error,
    /// Counterpart cancelled.
    Cancelled,
}

impl Phase {
    /// Complete, Error and Cancelled.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Error | Self::Cancelled)
    }

    /// Waiting, Connecting and Transferring.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Waiting | Self::Connecting | Self::Transferring)
    }
}

/// Which end of the transfer this client is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Offers files.
    Sender,
    /// Receives files.
    Receiver,
}

/// Lifecycle of the transport link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkPhase {
    /// Offer/answer and candidates in flight.
    Negotiating,
    /// Transport connected.
    Established,
    /// Data channel open.
    Active,
    /// Transport failed.
    Failed,
    /// Transport closed.
    Closed,
}

/// The counterpart of the current transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemotePeer {
    /// Peer id.
    pub id: PeerId,
    /// Display name, once known.
    pub name: Option<String>,
}

/// Why the transfer ended in [`Phase::Error`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    /// Typed reason; `None` for relay rejections.
    pub code: Option<FailureCode>,
    /// Human readable text.
    pub message: String,
}

/// Proof that a link is running for one counterpart and session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkLock {
    /// Counterpart the link talks to.
    pub peer_id: PeerId,
    /// Session the link serves.
    pub session_id: SessionId,
}

/// Everything a UI needs to render the transfer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransferView {
    /// Current phase.
    pub phase: Phase,
    /// Role, once an intent was issued.
    pub role: Option<Role>,
    /// Session id, once assigned.
    pub session_id: Option<SessionId>,
    /// Share code (sender).
    pub code: Option<String>,
    /// Share link (sender, code sessions).
    pub share_link: Option<String>,
    /// Counterpart.
    pub remote: Option<RemotePeer>,
    /// Transfer mode decided by the relay.
    pub mode: TransferMode,
    /// Manifest.
    pub files: Vec<FileMeta>,
    /// Latest progress.
    pub progress: TransferProgress,
    /// Pending invite from a nearby peer.
    pub incoming: Option<IncomingTransfer>,
    /// Set in [`Phase::Error`].
    pub failure: Option<Failure>,
    /// Files received so far (receiver).
    pub received: Vec<FileMeta>,
}

/// Inputs to the reducer.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// Offer files under a code and link.
    Share {
        /// Manifest.
        files: Vec<FileMeta>,
    },
    /// Invite a nearby peer.
    SendToPeer {
        /// Target peer.
        peer_id: PeerId,
        /// Manifest.
        files: Vec<FileMeta>,
    },
    /// Join by 6-digit code.
    JoinByCode {
        /// Code as typed.
        code: String,
    },
    /// Join by share link.
    JoinByLink {
        /// Session id from the link.
        session_id: SessionId,
    },
    /// Accept an invite.
    Accept {
        /// Invited session.
        session_id: SessionId,
        /// Inviting peer.
        sender_id: PeerId,
    },
    /// Decline an invite.
    Decline {
        /// Invited session.
        session_id: SessionId,
    },
    /// Abort the current transfer.
    Cancel,
    /// Return to idle, dropping everything.
    Reset,
    /// Message from the relay.
    Relay(ServerMessage),
    /// Event from the local transport, tagged with its session.
    Local {
        /// Session the reporting link serves.
        session_id: SessionId,
        /// What happened.
        event: LocalEvent,
    },
}

/// Events raised by the local transport and transfer engine.
#[derive(Debug, Clone, PartialEq)]
pub enum LocalEvent {
    /// Link changed phase.
    Link(LinkPhase),
    /// Progress snapshot.
    Progress(TransferProgress),
    /// A file was fully received.
    FileReceived(FileMeta),
    /// The engine finished.
    Complete,
    /// The engine failed. Always terminal.
    Failed {
        /// Typed reason.
        code: FailureCode,
        /// Human readable text.
        message: String,
    },
}

/// Instructions for the client runtime.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Send a message to the relay.
    Send(ClientMessage),
    /// Start a link as initiator and stream the manifest to `peer_id`.
    StartSending {
        /// Receiver.
        peer_id: PeerId,
        /// Session.
        session_id: SessionId,
    },
    /// Start a link as responder and reassemble what `peer_id` sends.
    StartReceiving {
        /// Sender.
        peer_id: PeerId,
        /// Session.
        session_id: SessionId,
    },
    /// Push the manifest through the relay.
    StartRelaySending {
        /// Session.
        session_id: SessionId,
    },
    /// Attach to the relay download stream.
    OpenRelayDownload {
        /// Session.
        session_id: SessionId,
    },
    /// Close whatever link is running.
    TearDownLink,
}

/// The transfer reducer.
#[derive(Debug, Clone, Default)]
pub struct TransferMachine {
    view: TransferView,
    link: Option<LinkLock>,
}

impl TransferMachine {
    /// Create an idle machine.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current view.
    pub fn view(&self) -> &TransferView {
        &self.view
    }

    /// Current phase.
    pub fn phase(&self) -> Phase {
        self.view.phase
    }

    /// The running link, if any.
    pub fn link(&self) -> Option<&LinkLock> {
        self.link.as_ref()
    }

    /// True when no link is running, so a new one may start.
    pub fn is_available(&self) -> bool {
        self.link.is_none()
    }

    /// Process one event and return the actions to execute.
    pub fn on_event(&mut self, event: Event) -> Vec<Action> {
        match event {
            Event::Share { files } => self.on_share(files),
            Event::SendToPeer { peer_id, files } => self.on_send_to_peer(peer_id, files),
            Event::JoinByCode { code } => self.on_join_by_code(code),
            Event::JoinByLink { session_id } => self.on_join_by_link(session_id),
            Event::Accept {
                session_id,
                sender_id,
            } => self.on_accept(session_id, sender_id),
            Event::Decline { session_id } => self.on_decline(session_id),
            Event::Cancel => self.on_cancel(),
            Event::Reset => self.on_reset(),
            Event::Relay(message) => self.on_relay(message),
            Event::Local { session_id, event } => self.on_local(session_id, event),
        }
    }

    // ===========================================
    // Intents
    // ===========================================

    fn can_start(&self) -> bool {
        self.link.is_none() && !self.view.phase.is_active()
    }

    fn begin(&mut self, role: Role) {
        let incoming = self.view.incoming.take();
        self.view = TransferView {
            role: Some(role),
            incoming,
            ..TransferView::default()
        };
    }

    fn on_share(&mut self, files: Vec<FileMeta>) -> Vec<Action> {
        if files.is_empty() || !self.can_start() {
            return vec![];
        }
        self.begin(Role::Sender);
        self.view.files = files.clone();
        vec![Action::Send(ClientMessage::CreateSession(CreateSession {
            files,
        }))]
    }

    fn on_send_to_peer(&mut self, peer_id: PeerId, files: Vec<FileMeta>) -> Vec<Action> {
        if files.is_empty() || !self.can_start() {
            return vec![];
        }
        self.begin(Role::Sender);
        self.view.files = files.clone();
        self.view.remote = Some(RemotePeer {
            id: peer_id.clone(),
            name: None,
        });
        vec![Action::Send(ClientMessage::SendToPeer(SendToPeer {
            target_peer_id: peer_id,
            files,
        }))]
    }

    fn on_join_by_code(&mut self, code: String) -> Vec<Action> {
        let code = code.trim().to_string();
        if code.is_empty() || !self.can_start() {
            return vec![];
        }
        self.begin(Role::Receiver);
        vec![Action::Send(ClientMessage::JoinByCode(JoinByCode { code }))]
    }

    fn on_join_by_link(&mut self, session_id: SessionId) -> Vec<Action> {
        if session_id.is_empty() || !self.can_start() {
            return vec![];
        }
        self.begin(Role::Receiver);
        vec![Action::Send(ClientMessage::JoinByLink(SessionRef::new(
            session_id,
        )))]
    }

    fn on_accept(&mut self, session_id: SessionId, sender_id: PeerId) -> Vec<Action> {
        if !self.can_start() {
            return vec![];
        }
        let invite = self
            .view
            .incoming
            .take()
            .filter(|i| i.session_id == session_id);
        self.begin(Role::Receiver);

        let (name, files) = match invite {
            Some(i) => (Some(i.sender_name), i.files),
            None => (None, Vec::new()),
        };
        self.view.phase = Phase::Connecting;
        self.view.session_id = Some(session_id.clone());
        self.view.remote = Some(RemotePeer {
            id: sender_id.clone(),
            name,
        });
        self.view.mode = TransferMode::Local;
        self.view.files = files;
        self.link = Some(LinkLock {
            peer_id: sender_id.clone(),
            session_id: session_id.clone(),
        });

        vec![
            Action::Send(ClientMessage::AcceptTransfer(SessionRef::new(
                session_id.clone(),
            ))),
            Action::StartReceiving {
                peer_id: sender_id.clone(),
                session_id: session_id.clone(),
            },
            Action::Send(ready_signal(sender_id, session_id)),
        ]
    }

    fn on_decline(&mut self, session_id: SessionId) -> Vec<Action> {
        if self
            .view
            .incoming
            .as_ref()
            .is_some_and(|i| i.session_id == session_id)
        {
            self.view.incoming = None;
        }
        vec![Action::Send(ClientMessage::DeclineTransfer(SessionRef::new(
            session_id,
        )))]
    }

    fn on_cancel(&mut self) -> Vec<Action> {
        let mut actions = Vec::new();
        if let Some(session_id) = self.view.session_id.clone() {
            if !self.view.phase.is_terminal() {
                actions.push(Action::Send(ClientMessage::TransferCancel(SessionRef::new(
                    session_id,
                ))));
            }
        }
        if self.link.take().is_some() {
            actions.push(Action::TearDownLink);
        }
        self.view = TransferView::default();
        actions
    }

    fn on_reset(&mut self) -> Vec<Action> {
        let mut actions = Vec::new();
        if self.link.take().is_some() {
            actions.push(Action::TearDownLink);
        }
        self.view = TransferView::default();
        actions
    }

    // ===========================================
    // Relay messages
    // ===========================================

    fn is_current(&self, session_id: &SessionId) -> bool {
        self.view.session_id.as_ref() == Some(session_id)
    }

    fn is_role(&self, role: Role) -> bool {
        self.view.role == Some(role)
    }

    fn on_relay(&mut self, message: ServerMessage) -> Vec<Action> {
        match message {
            ServerMessage::SessionCreated(created) => {
                if self.is_role(Role::Sender)
                    && self.view.phase == Phase::Idle
                    && self.view.session_id.is_none()
                {
                    self.view.phase = Phase::Waiting;
                    self.view.session_id = Some(created.session_id);
                    self.view.code = Some(created.code);
                    self.view.share_link = created.share_link;
                }
                vec![]
            }
            ServerMessage::SessionJoined(joined) => {
                if !self.is_role(Role::Receiver)
                    || self.view.phase != Phase::Idle
                    || self.view.session_id.is_some()
                    || self.link.is_some()
                {
                    return vec![];
                }
                let session_id = joined.session_id;
                let sender_id = joined.sender_id;
                self.view.phase = Phase::Connecting;
                self.view.session_id = Some(session_id.clone());
                self.view.remote = Some(RemotePeer {
                    id: sender_id.clone(),
                    name: Some(joined.sender_name),
                });
                self.view.files = joined.files;
                self.view.mode = joined.transfer_mode;
                self.link = Some(LinkLock {
                    peer_id: sender_id.clone(),
                    session_id: session_id.clone(),
                });

                match joined.transfer_mode {
                    TransferMode::Remote => vec![Action::OpenRelayDownload { session_id }],
                    _ => vec![
                        Action::StartReceiving {
                            peer_id: sender_id.clone(),
                            session_id: session_id.clone(),
                        },
                        Action::Send(ready_signal(sender_id, session_id)),
                    ],
                }
            }
            ServerMessage::ReceiverJoined(joined) => {
                if self.is_role(Role::Sender)
                    && self.is_current(&joined.session_id)
                    && self.view.phase == Phase::Waiting
                {
                    self.view.phase = Phase::Connecting;
                    self.view.remote = Some(RemotePeer {
                        id: joined.receiver_id,
                        name: Some(joined.receiver_name),
                    });
                    self.view.mode = joined.transfer_mode;
                }
                vec![]
            }
            ServerMessage::TransferAccepted(accepted) => {
                if self.is_role(Role::Sender)
                    && self.is_current(&accepted.session_id)
                    && self.view.phase == Phase::Waiting
                {
                    self.view.phase = Phase::Connecting;
                    self.view.remote = Some(RemotePeer {
                        id: accepted.receiver_id,
                        name: Some(accepted.receiver_name),
                    });
                    self.view.mode = TransferMode::Local;
                }
                vec![]
            }
            ServerMessage::TransferDeclined(declined) => {
                if self.is_role(Role::Sender)
                    && self.is_current(&declined.session_id)
                    && self.link.is_none()
                {
                    self.view = TransferView::default();
                }
                vec![]
            }
            ServerMessage::IncomingTransfer(invite) => {
                if self.can_start() {
                    self.view.incoming = Some(invite);
                }
                vec![]
            }
            ServerMessage::ReceiverRtcReady(signal) => {
                let session_id = match (signal.session_id, self.view.session_id.clone()) {
                    (Some(theirs), Some(ours)) if theirs == ours => ours,
                    (None, Some(ours)) => ours,
                    _ => return vec![],
                };
                if !self.is_role(Role::Sender)
                    || self.view.files.is_empty()
                    || self.view.phase.is_terminal()
                    || self.link.is_some()
                {
                    return vec![];
                }
                // Only the receiver the relay bound to this session may start the link.
                let peer_id = signal.from_id;
                if self.view.remote.as_ref().map(|r| &r.id) != Some(&peer_id) {
                    return vec![];
                }
                self.view.phase = Phase::Connecting;
                self.link = Some(LinkLock {
                    peer_id: peer_id.clone(),
                    session_id: session_id.clone(),
                });
                vec![Action::StartSending {
                    peer_id,
                    session_id,
                }]
            }
            ServerMessage::ReceiverReady(ready) => {
                if !self.is_role(Role::Sender)
                    || !self.is_current(&ready.session_id)
                    || self.view.phase.is_terminal()
                    || self.link.is_some()
                {
                    return vec![];
                }
                let Some(remote) = self.view.remote.as_ref() else {
                    return vec![];
                };
                self.link = Some(LinkLock {
                    peer_id: remote.id.clone(),
                    session_id: ready.session_id.clone(),
                });
                self.view.phase = Phase::Transferring;
                vec![Action::StartRelaySending {
                    session_id: ready.session_id,
                }]
            }
            ServerMessage::TransferProgress(update) => {
                if self.is_current(&update.session_id) && !self.view.phase.is_terminal() {
                    self.view.progress = update.progress;
                    if self.view.phase == Phase::Connecting {
                        self.view.phase = Phase::Transferring;
                    }
                }
                vec![]
            }
            ServerMessage::TransferComplete(done) => {
                // With a link running, completion is driven by the engine.
                if self.is_current(&done.session_id)
                    && !self.view.phase.is_terminal()
                    && self.link.is_none()
                {
                    self.view.phase = Phase::Complete;
                }
                vec![]
            }
            ServerMessage::TransferCancelled(cancelled) => {
                if !self.is_current(&cancelled.session_id) || self.view.phase.is_terminal() {
                    return vec![];
                }
                self.view.phase = Phase::Cancelled;
                self.release_link()
            }
            ServerMessage::TransferError(notice) => {
                let matches = match &notice.session_id {
                    Some(session_id) => self.is_current(session_id),
                    None => self.view.remote.as_ref().map(|r| &r.id) == Some(&notice.from_id),
                };
                if !matches || self.view.phase.is_terminal() {
                    return vec![];
                }
                self.view.phase = Phase::Error;
                self.view.failure = Some(Failure {
                    code: Some(FailureCode::PeerError),
                    message: if notice.reason.is_empty() {
                        "Connection lost".to_string()
                    } else {
                        notice.reason
                    },
                });
                self.release_link()
            }
            ServerMessage::Error(notice) => {
                // The relay rejected part of a relayed stream; the receiver
                // would end up with a gap.
                if self.is_relay_sending() {
                    return self.fail(FailureCode::SendFailed, notice.message);
                }
                if self.view.phase == Phase::Idle
                    && self.view.role.is_some()
                    && self.view.session_id.is_none()
                {
                    self.view.phase = Phase::Error;
                    self.view.failure = Some(Failure {
                        code: None,
                        message: notice.message,
                    });
                }
                vec![]
            }
            _ => vec![],
        }
    }

    fn is_relay_sending(&self) -> bool {
        self.is_role(Role::Sender)
            && self.view.mode == TransferMode::Remote
            && self.link.is_some()
            && !self.view.phase.is_terminal()
    }

    fn release_link(&mut self) -> Vec<Action> {
        match self.link.take() {
            Some(_) => vec![Action::TearDownLink],
            None => vec![],
        }
    }

    // ===========================================
    // Local transport events
    // ===========================================

    fn on_local(&mut self, session_id: SessionId, event: LocalEvent) -> Vec<Action> {
        match &self.link {
            Some(link) if link.session_id == session_id => {}
            _ => return vec![],
        }

        match event {
            LocalEvent::Link(LinkPhase::Negotiating) => vec![],
            LocalEvent::Link(LinkPhase::Established | LinkPhase::Active) => {
                if self.view.phase == Phase::Connecting {
                    self.view.phase = Phase::Transferring;
                }
                vec![]
            }
            LocalEvent::Link(LinkPhase::Failed) => {
                self.fail(FailureCode::RtcFailed, "Peer connection failed".to_string())
            }
            LocalEvent::Link(LinkPhase::Closed) => self.fail(
                FailureCode::RtcDisconnected,
                "Peer connection disconnected".to_string(),
            ),
            LocalEvent::Progress(progress) => {
                self.view.progress = progress;
                if self.view.phase == Phase::Connecting {
                    self.view.phase = Phase::Transferring;
                }
                vec![]
            }
            LocalEvent::FileReceived(meta) => {
                self.view.received.push(meta);
                vec![]
            }
            LocalEvent::Complete => {
                self.view.phase = Phase::Complete;
                let mut actions = Vec::new();
                if self.is_role(Role::Sender) {
                    actions.push(Action::Send(ClientMessage::TransferComplete(
                        SessionRef::new(session_id),
                    )));
                }
                actions.extend(self.release_link());
                actions
            }
            LocalEvent::Failed { code, message } => self.fail(code, message),
        }
    }

    /// Terminal local failure: record it, release the link and tell the
    /// counterpart through the relay.
    fn fail(&mut self, code: FailureCode, message: String) -> Vec<Action> {
        let Some(link) = self.link.take() else {
            return vec![];
        };
        self.view.phase = Phase::Error;
        self.view.failure = Some(Failure {
            code: Some(code),
            message: message.clone(),
        });
        vec![
            Action::Send(ClientMessage::TransferError(TransferErrorReport {
                target_id: link.peer_id,
                session_id: Some(link.session_id),
                reason: message,
            })),
            Action::TearDownLink,
        ]
    }
}

fn ready_signal(target_id: PeerId, session_id: SessionId) -> ClientMessage {
    ClientMessage::ReceiverRtcReady(Signal {
        target_id,
        session_id: Some(session_id),
        sdp: None,
        candidate: None,
    })
}
