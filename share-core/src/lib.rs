//! # share-core
//!
//! Pure logic for PeerShare (no I/O, instant tests).
//!
//! This crate implements the state machine and algorithms behind a transfer
//! without any network or disk I/O, enabling fast unit tests.
//!
//! ## Design Philosophy
//!
//! All modules in this crate are **pure** - they take input and produce output
//! without side effects. This enables:
//! - Instant unit tests (no mocks, no async)
//! - Deterministic behavior (same input → same output)
//! - Easy reasoning about state transitions
//!
//! The actual I/O (signaling socket, data channels, relay downloads) is
//! performed by `share-client` and `share-relay`, which interpret the actions
//! and values produced here.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod locality;
pub mod names;
pub mod peers;
pub mod progress;
pub mod receiver;
pub mod relay_stream;
pub mod state;

pub use locality::{derive_locality_key, is_private_address, normalize, LocalityKey};
pub use names::{generate_code, generate_name, sanitize_display_name};
pub use peers::PeerDirectory;
pub use progress::{format_bytes, format_eta, ProgressTracker};
pub use receiver::{ReceiveAssembler, ReceiveError, ReceiveProgress, ReceiveStep, ReceivedFile};
pub use relay_stream::{DownloadStep, RelayDownload, RelayStreamError, RelayStreamEvent, SseDecoder};
pub use state::{
    Action, Event, Failure, LinkLock, LinkPhase, LocalEvent, Phase, RemotePeer, Role,
    TransferMachine, TransferView,
};
