//! TransferController - the main interface for PeerShare clients.
//!
//! This module provides [`TransferController`], the API a UI or host app
//! drives. It owns the relay socket's outbound half, the signal bus and at
//! most one active link.
//!
//! # Architecture
//!
//! The controller feeds every input into the pure state machine from
//! share-core and interprets the returned actions to perform actual I/O.
//!
//! ```text
//! UI intents ─┐
//! relay msgs ─┼─► TransferMachine ─► actions ─► signaling / negotiator / engine
//! link events ┘         │
//!                       └─► watch channels (view, progress, peers, prompt)
//! ```
//!
//! # Example
//!
//! ```ignore
//! let controller = TransferController::new(config, signaling, connector, fetcher);
//! let mut view = controller.watch_transfer();
//! controller.share(vec![OutgoingFile::new("a.txt", "text/plain", data)]).await?;
//! // feed relay messages as they arrive
//! controller.handle_server_message(msg).await?;
//! ```

use peershare_core::{
    Action, Event, LocalEvent, PeerDirectory, ReceivedFile, TransferMachine, TransferView,
};
use peershare_types::{
    ClientMessage, FailureCode, FileMeta, IncomingTransfer, PeerId, PeerSummary, ServerMessage,
    SessionId, TransferProgress, UpdateIdentity, Welcome,
};
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::engine::{self, EngineEvent, OutgoingFile};
use crate::error::{ClientError, TransferError};
use crate::negotiator::{LinkTarget, Negotiator, NegotiatorRole};
use crate::relay_fetch::RelayFetcher;
use crate::signaling::{NegotiationSignal, SignalBus, SignalListener};
use crate::transport::{Connector, SignalingLink};

type LocalSender = mpsc::UnboundedSender<(SessionId, LocalEvent)>;
type NegotiatorSlot = Arc<Mutex<Option<Arc<Negotiator>>>>;

struct ActiveLink {
    session_id: SessionId,
    tasks: Vec<JoinHandle<()>>,
    negotiator: NegotiatorSlot,
}

/// Drives one client's transfers.
pub struct TransferController {
    config: ClientConfig,
    machine: tokio::sync::Mutex<TransferMachine>,
    signaling: Arc<dyn SignalingLink>,
    connector: Arc<dyn Connector>,
    fetcher: Arc<dyn RelayFetcher>,
    bus: SignalBus,
    outgoing: Mutex<Vec<OutgoingFile>>,
    link: Mutex<Option<ActiveLink>>,
    local_tx: LocalSender,
    view_tx: watch::Sender<TransferView>,
    progress_tx: watch::Sender<TransferProgress>,
    incoming_tx: watch::Sender<Option<IncomingTransfer>>,
    peers: Mutex<PeerDirectory>,
    peers_tx: watch::Sender<Vec<PeerSummary>>,
    identity_tx: watch::Sender<Option<Welcome>>,
    files_tx: mpsc::UnboundedSender<ReceivedFile>,
    files_rx: Mutex<Option<mpsc::UnboundedReceiver<ReceivedFile>>>,
}

impl std::fmt::Debug for TransferController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferController")
            .field("config", &self.config)
            .field("bus", &self.bus)
            .finish_non_exhaustive()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl TransferController {
    /// Create a controller. Must be called inside a tokio runtime.
    pub fn new(
        config: ClientConfig,
        signaling: Arc<dyn SignalingLink>,
        connector: Arc<dyn Connector>,
        fetcher: Arc<dyn RelayFetcher>,
    ) -> Arc<Self> {
        let (local_tx, local_rx) = mpsc::unbounded_channel();
        let (files_tx, files_rx) = mpsc::unbounded_channel();

        let controller = Arc::new(Self {
            config,
            machine: tokio::sync::Mutex::new(TransferMachine::new()),
            signaling,
            connector,
            fetcher,
            bus: SignalBus::new(),
            outgoing: Mutex::new(Vec::new()),
            link: Mutex::new(None),
            local_tx,
            view_tx: watch::channel(TransferView::default()).0,
            progress_tx: watch::channel(TransferProgress::default()).0,
            incoming_tx: watch::channel(None).0,
            peers: Mutex::new(PeerDirectory::new()),
            peers_tx: watch::channel(Vec::new()).0,
            identity_tx: watch::channel(None).0,
            files_tx,
            files_rx: Mutex::new(Some(files_rx)),
        });

        tokio::spawn(pump_local_events(Arc::downgrade(&controller), local_rx));
        controller
    }

    // ===========================================
    // Subscriptions
    // ===========================================

    /// Transfer snapshot.
    pub fn watch_transfer(&self) -> watch::Receiver<TransferView> {
        self.view_tx.subscribe()
    }

    /// Latest progress.
    pub fn watch_progress(&self) -> watch::Receiver<TransferProgress> {
        self.progress_tx.subscribe()
    }

    /// Nearby peers.
    pub fn watch_peers(&self) -> watch::Receiver<Vec<PeerSummary>> {
        self.peers_tx.subscribe()
    }

    /// Pending invite.
    pub fn watch_incoming(&self) -> watch::Receiver<Option<IncomingTransfer>> {
        self.incoming_tx.subscribe()
    }

    /// This client's identity, once welcomed.
    pub fn watch_identity(&self) -> watch::Receiver<Option<Welcome>> {
        self.identity_tx.subscribe()
    }

    /// Stream of received files. Returns `None` after the first call.
    pub fn take_received_files(&self) -> Option<mpsc::UnboundedReceiver<ReceivedFile>> {
        lock(&self.files_rx).take()
    }

    /// Whether a new transfer may start.
    pub async fn is_available(&self) -> bool {
        self.machine.lock().await.is_available()
    }

    // ===========================================
    // Intents
    // ===========================================

    /// Offer `files` under a share code and link.
    pub async fn share(&self, files: Vec<OutgoingFile>) -> Result<(), ClientError> {
        if files.is_empty() {
            return Err(ClientError::Validation("No files provided"));
        }
        let metas = metas(&files);
        self.start_send(Event::Share { files: metas }, files).await
    }

    /// Invite a nearby peer to receive `files`.
    pub async fn send_to_peer(
        &self,
        peer_id: PeerId,
        files: Vec<OutgoingFile>,
    ) -> Result<(), ClientError> {
        if files.is_empty() {
            return Err(ClientError::Validation("No files provided"));
        }
        if peer_id.as_str().is_empty() {
            return Err(ClientError::Validation("Missing peer id"));
        }
        let metas = metas(&files);
        self.start_send(Event::SendToPeer { peer_id, files: metas }, files)
            .await
    }

    async fn start_send(&self, event: Event, files: Vec<OutgoingFile>) -> Result<(), ClientError> {
        let mut machine = self.machine.lock().await;
        let actions = machine.on_event(event);
        if !actions.is_empty() {
            *lock(&self.outgoing) = files;
        }
        self.apply(&mut machine, actions).await
    }

    /// Join by 6-digit code.
    pub async fn join_by_code(&self, code: &str) -> Result<(), ClientError> {
        let code = code.trim();
        if code.is_empty() {
            return Err(ClientError::Validation("Missing code"));
        }
        self.dispatch(Event::JoinByCode {
            code: code.to_string(),
        })
        .await
    }

    /// Join by share link.
    pub async fn join_by_link(&self, session_id: SessionId) -> Result<(), ClientError> {
        if session_id.is_empty() {
            return Err(ClientError::Validation("Missing session id"));
        }
        self.dispatch(Event::JoinByLink { session_id }).await
    }

    /// Accept an invite.
    pub async fn accept_incoming(
        &self,
        session_id: SessionId,
        sender_id: PeerId,
    ) -> Result<(), ClientError> {
        if session_id.is_empty() {
            return Err(ClientError::Validation("Missing session id"));
        }
        self.dispatch(Event::Accept {
            session_id,
            sender_id,
        })
        .await
    }

    /// Decline an invite.
    pub async fn decline_incoming(&self, session_id: SessionId) -> Result<(), ClientError> {
        if session_id.is_empty() {
            return Err(ClientError::Validation("Missing session id"));
        }
        self.dispatch(Event::Decline { session_id }).await
    }

    /// Abort the current transfer.
    pub async fn cancel(&self) -> Result<(), ClientError> {
        self.dispatch(Event::Cancel).await
    }

    /// Return to idle.
    pub async fn reset(&self) -> Result<(), ClientError> {
        lock(&self.outgoing).clear();
        self.dispatch(Event::Reset).await
    }

    /// Change this client's display name.
    pub fn update_identity(&self, name: &str) -> Result<(), ClientError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ClientError::Validation("Missing name"));
        }
        self.signaling
            .send(ClientMessage::UpdateIdentity(UpdateIdentity {
                name: name.to_string(),
            }))?;
        Ok(())
    }

    // ===========================================
    // Relay input
    // ===========================================

    /// Handle one message from the relay.
    pub async fn handle_server_message(&self, message: ServerMessage) -> Result<(), ClientError> {
        if let Some(signal) = NegotiationSignal::from_server(&message) {
            self.bus.dispatch(signal);
            return Ok(());
        }
        match message {
            ServerMessage::Welcome(welcome) => {
                info!(peer = %welcome.peer_id, name = %welcome.name, "Welcomed by relay");
                self.identity_tx.send_replace(Some(welcome));
                Ok(())
            }
            ServerMessage::NearbyPeers(list) => {
                self.update_peers(|peers| {
                    peers.set(list.peers);
                    true
                });
                Ok(())
            }
            ServerMessage::PeerJoined(notice) => {
                self.update_peers(|peers| peers.add(notice.peer));
                Ok(())
            }
            ServerMessage::PeerUpdated(notice) => {
                self.update_peers(|peers| peers.update(&notice.peer.id, &notice.peer.name));
                Ok(())
            }
            ServerMessage::PeerLeft(left) => {
                self.update_peers(|peers| peers.remove(&left.peer_id));
                Ok(())
            }
            other => self.dispatch(Event::Relay(other)).await,
        }
    }

    /// Parse and handle one relay text frame.
    pub async fn handle_server_text(&self, text: &str) -> Result<(), ClientError> {
        match ServerMessage::from_json(text) {
            Ok(message) => self.handle_server_message(message).await,
            Err(e) => {
                warn!(error = %e, "Ignoring malformed relay message");
                Ok(())
            }
        }
    }

    fn update_peers(&self, change: impl FnOnce(&mut PeerDirectory) -> bool) {
        let mut peers = lock(&self.peers);
        if change(&mut peers) {
            self.peers_tx.send_replace(peers.as_slice().to_vec());
        }
    }

    // ===========================================
    // Reducer
    // ===========================================

    async fn dispatch(&self, event: Event) -> Result<(), ClientError> {
        let mut machine = self.machine.lock().await;
        let actions = machine.on_event(event);
        self.apply(&mut machine, actions).await
    }

    async fn apply(
        &self,
        machine: &mut TransferMachine,
        actions: Vec<Action>,
    ) -> Result<(), ClientError> {
        self.publish(machine.view());
        let mut first_error = None;
        for action in actions {
            if let Err(e) = self.execute(machine.view(), action).await {
                warn!(error = %e, "Action failed");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    fn publish(&self, view: &TransferView) {
        self.view_tx.send_if_modified(|current| {
            if current == view {
                return false;
            }
            *current = view.clone();
            true
        });
        self.progress_tx.send_if_modified(|current| {
            if current == &view.progress {
                return false;
            }
            *current = view.progress.clone();
            true
        });
        self.incoming_tx.send_if_modified(|current| {
            if current == &view.incoming {
                return false;
            }
            current.clone_from(&view.incoming);
            true
        });
    }

    async fn execute(&self, view: &TransferView, action: Action) -> Result<(), ClientError> {
        match action {
            Action::Send(message) => {
                debug!(kind = message.kind(), "Sending to relay");
                self.signaling.send(message)?;
            }
            Action::StartSending {
                peer_id,
                session_id,
            } => {
                let listener = self.bus.subscribe(peer_id.clone(), session_id.clone());
                let files = lock(&self.outgoing).clone();
                self.launch_direct(
                    NegotiatorRole::Initiator,
                    LinkTarget {
                        peer_id,
                        session_id,
                    },
                    listener,
                    DirectJob::Send(files),
                )
                .await;
            }
            Action::StartReceiving {
                peer_id,
                session_id,
            } => {
                let listener = self.bus.subscribe(peer_id.clone(), session_id.clone());
                self.launch_direct(
                    NegotiatorRole::Responder,
                    LinkTarget {
                        peer_id,
                        session_id,
                    },
                    listener,
                    DirectJob::Receive,
                )
                .await;
            }
            Action::StartRelaySending { session_id } => {
                let files = lock(&self.outgoing).clone();
                let task = tokio::spawn(relay_send(
                    Arc::clone(&self.signaling),
                    session_id.clone(),
                    files,
                    self.config.flow,
                    self.local_tx.clone(),
                ));
                self.install(session_id, vec![task], NegotiatorSlot::default())
                    .await;
            }
            Action::OpenRelayDownload { session_id } => {
                let task = tokio::spawn(relay_download(
                    Arc::clone(&self.fetcher),
                    session_id.clone(),
                    view.files.clone(),
                    self.local_tx.clone(),
                    self.files_tx.clone(),
                ));
                self.install(session_id, vec![task], NegotiatorSlot::default())
                    .await;
            }
            Action::TearDownLink => self.tear_down().await,
        }
        Ok(())
    }

    async fn launch_direct(
        &self,
        role: NegotiatorRole,
        target: LinkTarget,
        listener: SignalListener,
        job: DirectJob,
    ) {
        let slot = NegotiatorSlot::default();
        let (phase_tx, mut phase_rx) = mpsc::unbounded_channel();

        let session_id = target.session_id.clone();
        let local_tx = self.local_tx.clone();
        let forward_session = session_id.clone();
        let forwarder = tokio::spawn(async move {
            while let Some(phase) = phase_rx.recv().await {
                if local_tx
                    .send((forward_session.clone(), LocalEvent::Link(phase)))
                    .is_err()
                {
                    break;
                }
            }
        });

        let link = DirectLink {
            role,
            target,
            listener,
            connector: Arc::clone(&self.connector),
            signaling: Arc::clone(&self.signaling),
            config: self.config.clone(),
            slot: Arc::clone(&slot),
            local_tx: self.local_tx.clone(),
            files_tx: self.files_tx.clone(),
        };
        let task = tokio::spawn(link.run(job, phase_tx));
        self.install(session_id, vec![task, forwarder], slot).await;
    }

    async fn install(&self, session_id: SessionId, tasks: Vec<JoinHandle<()>>, slot: NegotiatorSlot) {
        let previous = lock(&self.link).replace(ActiveLink {
            session_id,
            tasks,
            negotiator: slot,
        });
        if let Some(previous) = previous {
            warn!(session = %previous.session_id, "Replacing a running link");
            close_link(previous).await;
        }
    }

    async fn tear_down(&self) {
        let active = lock(&self.link).take();
        if let Some(active) = active {
            debug!(session = %active.session_id, "Tearing down link");
            close_link(active).await;
        }
    }
}

async fn close_link(link: ActiveLink) {
    for task in &link.tasks {
        task.abort();
    }
    let negotiator = lock(&link.negotiator).take();
    if let Some(negotiator) = negotiator {
        negotiator.close().await;
    }
}

fn metas(files: &[OutgoingFile]) -> Vec<FileMeta> {
    files.iter().map(|f| f.meta.clone()).collect()
}

async fn pump_local_events(
    controller: Weak<TransferController>,
    mut events: mpsc::UnboundedReceiver<(SessionId, LocalEvent)>,
) {
    while let Some((session_id, event)) = events.recv().await {
        let Some(controller) = controller.upgrade() else {
            break;
        };
        if let Err(e) = controller.dispatch(Event::Local { session_id, event }).await {
            warn!(error = %e, "Local event handling failed");
        }
    }
}

// ===========================================
// Link tasks
// ===========================================

enum DirectJob {
    Send(Vec<OutgoingFile>),
    Receive,
}

struct DirectLink {
    role: NegotiatorRole,
    target: LinkTarget,
    listener: SignalListener,
    connector: Arc<dyn Connector>,
    signaling: Arc<dyn SignalingLink>,
    config: ClientConfig,
    slot: NegotiatorSlot,
    local_tx: LocalSender,
    files_tx: mpsc::UnboundedSender<ReceivedFile>,
}

impl DirectLink {
    async fn run(self, job: DirectJob, phases: mpsc::UnboundedSender<peershare_core::LinkPhase>) {
        let session_id = self.target.session_id.clone();
        let local_tx = self.local_tx.clone();
        let result = self.transfer(job, phases).await;
        let _ = local_tx.send((session_id, outcome(result)));
    }

    async fn transfer(
        self,
        job: DirectJob,
        phases: mpsc::UnboundedSender<peershare_core::LinkPhase>,
    ) -> Result<(), TransferError> {
        let session_id = self.target.session_id.clone();
        let negotiator = Arc::new(
            Negotiator::start(
                self.role,
                self.target,
                self.listener,
                self.connector.as_ref(),
                self.signaling,
                phases,
                self.config.connect_timeout,
            )
            .await?,
        );
        *lock(&self.slot) = Some(Arc::clone(&negotiator));

        let local_tx = self.local_tx;
        let files_tx = self.files_tx;
        let report = |event: EngineEvent| forward(&local_tx, &files_tx, &session_id, event);

        match job {
            DirectJob::Send(files) => {
                let channel = negotiator.wait_for_channel().await?;
                engine::send_files(channel.as_ref(), &files, &self.config.flow, report).await?;
            }
            DirectJob::Receive => {
                let mut frames = negotiator
                    .take_frames()
                    .ok_or_else(|| TransferError::ConnectionFailed("frames taken".into()))?;
                negotiator.wait_for_channel().await?;
                engine::receive_files(&mut frames, report).await?;
            }
        }
        Ok(())
    }
}

async fn relay_send(
    signaling: Arc<dyn SignalingLink>,
    session_id: SessionId,
    files: Vec<OutgoingFile>,
    flow: crate::config::FlowControl,
    local_tx: LocalSender,
) {
    let (files_tx, _) = mpsc::unbounded_channel();
    let report = |event: EngineEvent| forward(&local_tx, &files_tx, &session_id, event);
    let result = engine::send_via_relay(signaling.as_ref(), &session_id, &files, &flow, report)
        .await
        .map(|_| ());
    let _ = local_tx.send((session_id, outcome(result)));
}

async fn relay_download(
    fetcher: Arc<dyn RelayFetcher>,
    session_id: SessionId,
    files: Vec<FileMeta>,
    local_tx: LocalSender,
    files_tx: mpsc::UnboundedSender<ReceivedFile>,
) {
    let report = |event: EngineEvent| forward(&local_tx, &files_tx, &session_id, event);
    let event = match engine::download_via_relay(fetcher.as_ref(), &session_id, files, report).await
    {
        Ok(result) if result.complete => LocalEvent::Complete,
        Ok(_) => LocalEvent::Failed {
            code: FailureCode::ReceiveFailed,
            message: "Relay stream ended before all files arrived".to_string(),
        },
        Err(e) => outcome(Err(e)),
    };
    let _ = local_tx.send((session_id, event));
}

fn forward(
    local_tx: &LocalSender,
    files_tx: &mpsc::UnboundedSender<ReceivedFile>,
    session_id: &SessionId,
    event: EngineEvent,
) {
    let local = match event {
        EngineEvent::Progress(progress) => LocalEvent::Progress(progress),
        EngineEvent::File(file) => {
            let meta = file.meta.clone();
            let _ = files_tx.send(file);
            LocalEvent::FileReceived(meta)
        }
    };
    let _ = local_tx.send((session_id.clone(), local));
}

fn outcome(result: Result<(), TransferError>) -> LocalEvent {
    match result {
        Ok(()) => LocalEvent::Complete,
        Err(e) => {
            warn!(error = %e, "Transfer failed");
            LocalEvent::Failed {
                code: e.code(),
                message: e.to_string(),
            }
        }
    }
}
