//! # share-client
//!
//! Client library for PeerShare browser-style file transfers.
//!
//! This is the library a UI embeds to send and receive files.
//!
//! ## Features
//!
//! - **Direct Links**: Offer/answer negotiation over the relay, then files
//!   stream peer to peer with send-buffer backpressure
//! - **Relay Fallback**: Cross-network transfers push chunks through the relay
//!   and download them as a server-sent event stream
//! - **Transport Abstraction**: Pluggable peer connection layer (mock included)
//! - **Pure State Machine**: Uses share-core for side-effect-free logic
//!
//! ## Example
//!
//! ```ignore
//! use share_client::{ClientConfig, HttpRelayFetcher, OutgoingFile, TransferController};
//!
//! let config = ClientConfig::new("http://localhost:3000");
//! let fetcher = Arc::new(HttpRelayFetcher::new(&config.relay_url));
//! let controller = TransferController::new(config, socket, connector, fetcher);
//!
//! controller.share(vec![OutgoingFile::new("notes.txt", "text/plain", bytes)]).await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod controller;
pub mod engine;
pub mod error;
pub mod negotiator;
pub mod relay_fetch;
pub mod signaling;
pub mod transport;

pub use config::{ClientConfig, FlowControl};
pub use controller::TransferController;
pub use engine::{
    download_via_relay, receive_files, send_files, send_via_relay, EngineEvent, OutgoingFile,
    RelayOutcome,
};
pub use error::{ClientError, TransferError};
pub use negotiator::{LinkTarget, Negotiator, NegotiatorRole};
pub use relay_fetch::{EventStream, HttpRelayFetcher, MockRelayFetcher, RelayFetcher};
pub use signaling::{NegotiationSignal, SignalBus, SignalKind, SignalListener};
pub use transport::{
    ChannelFrame, Connection, Connector, DataChannel, MockConnector, MockDataChannel,
    MockPeerConnection, PeerConnection, RecordingLink, SignalingLink, TransportError,
    TransportEvent,
};
