//! Signaling envelope for the relay WebSocket.
//!
//! Every frame is a JSON object whose string field `type` selects one
//! variant of a closed set. Inbound frames decode into [`ClientMessage`],
//! outbound frames encode from [`ServerMessage`]. Field names are camelCase.
//!
//! Inbound payloads reject unknown fields. Missing fields the relay answers
//! with a typed error (`code`, `sessionId`, `files`) default to empty so the
//! router can tell "absent" apart from "malformed".

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    ErrorCode, FileMeta, PeerId, PeerSummary, SessionId, ShareError, TransferMode,
    TransferProgress,
};

/// Discriminators accepted from clients.
pub const CLIENT_MESSAGE_TYPES: &[&str] = &[
    "create-session",
    "join-by-code",
    "join-by-link",
    "send-to-peer",
    "accept-transfer",
    "decline-transfer",
    "rtc-offer",
    "rtc-answer",
    "rtc-ice-candidate",
    "receiver-rtc-ready",
    "file-chunk",
    "file-chunk-end",
    "transfer-progress",
    "transfer-complete",
    "transfer-cancel",
    "transfer-error",
    "update-identity",
];

/// Messages a client sends to the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientMessage {
    /// Offer files under a new code and link.
    CreateSession(CreateSession),
    /// Join a session by its 6-digit code.
    JoinByCode(JoinByCode),
    /// Join a session by its id (share link).
    JoinByLink(SessionRef),
    /// Invite a nearby peer directly.
    SendToPeer(SendToPeer),
    /// Accept an incoming invite.
    AcceptTransfer(SessionRef),
    /// Decline an incoming invite.
    DeclineTransfer(SessionRef),
    /// Connection offer for the counterpart.
    RtcOffer(Signal),
    /// Connection answer for the counterpart.
    RtcAnswer(Signal),
    /// Connectivity candidate for the counterpart.
    RtcIceCandidate(Signal),
    /// Receiver is ready for the sender to start negotiating.
    ReceiverRtcReady(Signal),
    /// Relay-mode data frame.
    FileChunk(FileChunk),
    /// Relay-mode end of stream.
    FileChunkEnd(SessionRef),
    /// Progress report for the counterpart.
    TransferProgress(ProgressUpdate),
    /// Sender finished.
    TransferComplete(SessionRef),
    /// Either party cancelled.
    TransferCancel(SessionRef),
    /// Local failure report for the counterpart.
    TransferError(TransferErrorReport),
    /// Change display name.
    UpdateIdentity(UpdateIdentity),
}

impl ClientMessage {
    /// Decode one inbound text frame.
    ///
    /// Unknown discriminators are reported separately from malformed
    /// payloads so the relay can answer with the right error code.
    pub fn decode(text: &str) -> Result<Self, ShareError> {
        let value: Value = serde_json::from_str(text).map_err(|_| ShareError::NotAnEnvelope)?;
        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or(ShareError::NotAnEnvelope)?
            .to_string();
        if !CLIENT_MESSAGE_TYPES.contains(&kind.as_str()) {
            return Err(ShareError::UnknownType(kind));
        }
        serde_json::from_value(value).map_err(|source| ShareError::Malformed { kind, source })
    }

    /// Encode to a text frame.
    pub fn to_json(&self) -> Result<String, ShareError> {
        serde_json::to_string(self).map_err(ShareError::Serialization)
    }

    /// Wire discriminator of this message.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::CreateSession(_) => "create-session",
            Self::JoinByCode(_) => "join-by-code",
            Self::JoinByLink(_) => "join-by-link",
            Self::SendToPeer(_) => "send-to-peer",
            Self::AcceptTransfer(_) => "accept-transfer",
            Self::DeclineTransfer(_) => "decline-transfer",
            Self::RtcOffer(_) => "rtc-offer",
            Self::RtcAnswer(_) => "rtc-answer",
            Self::RtcIceCandidate(_) => "rtc-ice-candidate",
            Self::ReceiverRtcReady(_) => "receiver-rtc-ready",
            Self::FileChunk(_) => "file-chunk",
            Self::FileChunkEnd(_) => "file-chunk-end",
            Self::TransferProgress(_) => "transfer-progress",
            Self::TransferComplete(_) => "transfer-complete",
            Self::TransferCancel(_) => "transfer-cancel",
            Self::TransferError(_) => "transfer-error",
            Self::UpdateIdentity(_) => "update-identity",
        }
    }
}

/// `create-session` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct CreateSession {
    /// Files on offer.
    #[serde(default)]
    pub files: Vec<FileMeta>,
}

/// `join-by-code` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct JoinByCode {
    /// The code as typed.
    #[serde(default)]
    pub code: String,
}

/// Payload that names a session and nothing else.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct SessionRef {
    /// Session id.
    #[serde(default = "empty_session_id")]
    pub session_id: SessionId,
}

fn empty_session_id() -> SessionId {
    SessionId::new("")
}

impl SessionRef {
    /// Wrap a session id.
    pub fn new(session_id: SessionId) -> Self {
        Self { session_id }
    }
}

/// `send-to-peer` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct SendToPeer {
    /// Invite target.
    pub target_peer_id: PeerId,
    /// Files on offer.
    #[serde(default)]
    pub files: Vec<FileMeta>,
}

/// Negotiation message addressed to another peer.
///
/// `sdp` and `candidate` are opaque to the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct Signal {
    /// Recipient peer.
    pub target_id: PeerId,
    /// Session the negotiation belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
    /// Session description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp: Option<Value>,
    /// Connectivity candidate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub candidate: Option<Value>,
}

impl Signal {
    /// The relayed form, stamped with the sender id.
    pub fn relayed_from(self, from_id: PeerId) -> RelayedSignal {
        RelayedSignal {
            from_id,
            session_id: self.session_id,
            sdp: self.sdp,
            candidate: self.candidate,
        }
    }
}

/// Relay-mode data frame. `data` is base64.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct FileChunk {
    /// Session the bytes belong to.
    pub session_id: SessionId,
    /// Base64-encoded bytes.
    pub data: String,
}

/// Progress report forwarded to the counterpart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct ProgressUpdate {
    /// Session id.
    pub session_id: SessionId,
    /// Progress snapshot.
    pub progress: TransferProgress,
}

/// Failure report addressed to the counterpart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct TransferErrorReport {
    /// Counterpart peer.
    pub target_id: PeerId,
    /// Session id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
    /// Free-form reason.
    #[serde(default)]
    pub reason: String,
}

/// `update-identity` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct UpdateIdentity {
    /// Requested display name.
    #[serde(default)]
    pub name: String,
}

/// Messages the relay sends to a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerMessage {
    /// First message on every connection.
    Welcome(Welcome),
    /// Peers already present in the same locality.
    NearbyPeers(NearbyPeers),
    /// A peer arrived in the locality.
    PeerJoined(PeerNotice),
    /// A peer changed its display name.
    PeerUpdated(PeerNotice),
    /// A peer left the locality.
    PeerLeft(PeerLeft),
    /// Reply to `create-session` and `send-to-peer`.
    SessionCreated(SessionCreated),
    /// Reply to a successful join.
    SessionJoined(SessionJoined),
    /// Tells the sender who joined.
    ReceiverJoined(ReceiverJoined),
    /// Invite from a nearby peer.
    IncomingTransfer(IncomingTransfer),
    /// Invite accepted.
    TransferAccepted(TransferAccepted),
    /// Invite declined.
    TransferDeclined(SessionRef),
    /// Relayed connection offer.
    RtcOffer(RelayedSignal),
    /// Relayed connection answer.
    RtcAnswer(RelayedSignal),
    /// Relayed connectivity candidate.
    RtcIceCandidate(RelayedSignal),
    /// Relayed receiver readiness.
    ReceiverRtcReady(RelayedSignal),
    /// A relay download stream attached; sender may push chunks.
    ReceiverReady(SessionRef),
    /// Forwarded progress.
    TransferProgress(ProgressUpdate),
    /// Transfer finished.
    TransferComplete(SessionRef),
    /// Counterpart cancelled.
    TransferCancelled(SessionRef),
    /// Counterpart failed or disconnected.
    TransferError(TransferErrorNotice),
    /// Request rejected.
    Error(ErrorNotice),
}

impl ServerMessage {
    /// Encode to a text frame.
    pub fn to_json(&self) -> Result<String, ShareError> {
        serde_json::to_string(self).map_err(ShareError::Serialization)
    }

    /// Decode an outbound frame (client side).
    pub fn from_json(text: &str) -> Result<Self, ShareError> {
        serde_json::from_str(text).map_err(|source| ShareError::Malformed {
            kind: "server".to_string(),
            source,
        })
    }

    /// An `error` with the default text for `code`.
    pub fn error(code: ErrorCode) -> Self {
        Self::error_with(code, code.default_message())
    }

    /// An `error` with custom text.
    pub fn error_with(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Error(ErrorNotice {
            message: message.into(),
            error_code: Some(code),
        })
    }
}

/// `welcome` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Welcome {
    /// Id assigned to this connection.
    pub peer_id: PeerId,
    /// Generated display name.
    pub name: String,
    /// Locality key the peer was placed in.
    pub locality: String,
    /// Whether the source address is private.
    pub is_private: bool,
}

/// `nearby-peers` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NearbyPeers {
    /// Peers sharing the locality key.
    pub peers: Vec<PeerSummary>,
}

/// Payload carrying one peer summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerNotice {
    /// The peer.
    pub peer: PeerSummary,
}

/// `peer-left` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerLeft {
    /// The departed peer.
    pub peer_id: PeerId,
}

/// `session-created` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionCreated {
    /// New session id.
    pub session_id: SessionId,
    /// 6-digit code.
    pub code: String,
    /// Shareable link (code sessions only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub share_link: Option<String>,
    /// Invite target (direct invites only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_peer_id: Option<PeerId>,
}

/// `session-joined` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionJoined {
    /// Session id.
    pub session_id: SessionId,
    /// Sender peer.
    pub sender_id: PeerId,
    /// Sender display name.
    pub sender_name: String,
    /// Manifest.
    pub files: Vec<FileMeta>,
    /// Sum of file sizes.
    pub total_size: u64,
    /// Decided transfer mode.
    pub transfer_mode: TransferMode,
}

/// `receiver-joined` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiverJoined {
    /// Session id.
    pub session_id: SessionId,
    /// Receiver peer.
    pub receiver_id: PeerId,
    /// Receiver display name.
    pub receiver_name: String,
    /// Decided transfer mode.
    pub transfer_mode: TransferMode,
}

/// `incoming-transfer` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncomingTransfer {
    /// Session id.
    pub session_id: SessionId,
    /// Inviting peer.
    pub sender_id: PeerId,
    /// Inviting peer's display name.
    pub sender_name: String,
    /// Manifest.
    pub files: Vec<FileMeta>,
    /// Sum of file sizes.
    pub total_size: u64,
}

/// `transfer-accepted` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferAccepted {
    /// Session id.
    pub session_id: SessionId,
    /// Accepting peer.
    pub receiver_id: PeerId,
    /// Accepting peer's display name.
    pub receiver_name: String,
}

/// Negotiation message as delivered to its recipient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayedSignal {
    /// Originating peer, stamped by the relay.
    pub from_id: PeerId,
    /// Session the negotiation belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
    /// Session description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp: Option<Value>,
    /// Connectivity candidate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub candidate: Option<Value>,
}

/// `transfer-error` as delivered to the counterpart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferErrorNotice {
    /// Session id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
    /// Free-form reason.
    pub reason: String,
    /// Reporting peer.
    pub from_id: PeerId,
}

/// `error` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorNotice {
    /// Human readable text.
    pub message: String,
    /// Typed reason.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<ErrorCode>,
}
