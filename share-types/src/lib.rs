//! # share-types
//!
//! Wire format types for the PeerShare transfer coordination protocol.
//!
//! This crate provides the foundational types used across all PeerShare crates:
//! - [`PeerId`], [`SessionId`], [`ShortCode`] - Identity types
//! - [`ClientMessage`], [`ServerMessage`] - Relay signaling envelope
//! - [`ControlRecord`] - Framing records on the direct data channel
//! - [`FileMeta`], [`TransferProgress`], [`SessionStatus`] - Manifest and lifecycle
//! - [`ShareError`], [`ErrorCode`], [`FailureCode`] - Error types

#![warn(missing_docs)]
#![warn(clippy::all)]

mod control;
mod error;
mod ids;
mod manifest;
mod messages;

pub use control::{ControlRecord, FileEnd, FileStart};
pub use error::{ErrorCode, FailureCode, ShareError};
pub use ids::{PeerId, SessionId, ShortCode};
pub use manifest::{
    total_size, FileMeta, PeerSummary, SessionStatus, TransferMode, TransferProgress,
    DEFAULT_MIME_TYPE,
};
pub use messages::{
    ClientMessage, CreateSession, ErrorNotice, FileChunk, IncomingTransfer, JoinByCode,
    NearbyPeers, PeerLeft, PeerNotice, ProgressUpdate, ReceiverJoined, RelayedSignal, SendToPeer,
    ServerMessage, SessionCreated, SessionJoined, SessionRef, Signal, TransferAccepted,
    TransferErrorNotice, TransferErrorReport, UpdateIdentity, Welcome, CLIENT_MESSAGE_TYPES,
};
